//! Scratch checkout management.
//!
//! Building an index usually means materializing a target commit first:
//! clone into a uniquely named scratch directory, check out the commit,
//! optionally apply a base patch, parse, and delete the scratch directory.
//! The directory is an owned, scope-bound resource: it is removed on every
//! exit path, including early errors, because the guard's drop handles it.
//! An explicit `close` at the end surfaces removal failures, the one
//! condition this crate treats as a defect rather than a normal error.

use crate::index::builder::{IndexError, RepositoryIndex};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("git {op} failed: {detail}")]
    Git { op: &'static str, detail: String },

    #[error("I/O error during checkout: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("failed to remove scratch directory {path}: {source}")]
    ScratchCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Version-control collaborator. Each operation fails atomically; a failed
/// step never exposes a partial checkout to the index builder.
pub trait Vcs {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), CheckoutError>;
    fn checkout(&self, dest: &Path, commit: &str) -> Result<(), CheckoutError>;
    fn apply_patch(&self, dest: &Path, patch: &str) -> Result<(), CheckoutError>;
}

/// `Vcs` implementation shelling out to the `git` binary.
pub struct SystemGit;

impl SystemGit {
    fn run(op: &'static str, args: &[&str]) -> Result<(), CheckoutError> {
        let output = Command::new("git").args(args).output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(CheckoutError::Git {
                op,
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Vcs for SystemGit {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), CheckoutError> {
        Self::run("clone", &["clone", url, &dest.to_string_lossy()])
    }

    fn checkout(&self, dest: &Path, commit: &str) -> Result<(), CheckoutError> {
        Self::run(
            "checkout",
            &["-C", &dest.to_string_lossy(), "checkout", commit],
        )
    }

    fn apply_patch(&self, dest: &Path, patch: &str) -> Result<(), CheckoutError> {
        let mut file = tempfile::Builder::new()
            .prefix("base-patch-")
            .suffix(".diff")
            .tempfile_in(dest)?;
        file.write_all(patch.as_bytes())?;
        file.flush()?;
        Self::run(
            "apply",
            &[
                "-C",
                &dest.to_string_lossy(),
                "apply",
                &file.path().to_string_lossy(),
            ],
        )
    }
}

/// What to materialize before indexing.
pub struct CheckoutRequest<'a> {
    pub url: &'a str,
    pub commit: &'a str,
    /// Literal diff text applied on top of the commit before parsing.
    pub base_patch: Option<&'a str>,
}

/// Repository directory name used as the index root key, derived from the
/// clone URL (`https://host/org/name.git` -> `name`).
pub fn top_folder(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last)
}

/// Clone, check out, optionally patch, and index a repository inside a
/// scratch directory that is removed on every exit path.
pub fn build_at_commit(
    vcs: &dyn Vcs,
    scratch_root: &Path,
    request: &CheckoutRequest<'_>,
) -> Result<RepositoryIndex, CheckoutError> {
    std::fs::create_dir_all(scratch_root)?;
    // Unique name; collision-free under concurrent builds.
    let scratch = tempfile::Builder::new()
        .prefix("scratch-")
        .tempdir_in(scratch_root)?;

    let dest = scratch.path().join(top_folder(request.url));
    tracing::debug!(url = request.url, commit = request.commit, dest = %dest.display(), "materializing checkout");

    vcs.clone_repo(request.url, &dest)?;
    vcs.checkout(&dest, request.commit)?;
    if let Some(patch) = request.base_patch {
        vcs.apply_patch(&dest, patch)?;
    }

    let index = RepositoryIndex::build(&dest)?;

    let scratch_path = scratch.path().to_path_buf();
    scratch.close().map_err(|source| {
        tracing::error!(path = %scratch_path.display(), "scratch directory was not removed");
        CheckoutError::ScratchCleanup {
            path: scratch_path,
            source,
        }
    })?;

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn top_folder_from_url() {
        assert_eq!(top_folder("https://github.com/psf/requests.git"), "requests");
        assert_eq!(top_folder("https://github.com/pallets/flask"), "flask");
        assert_eq!(top_folder("https://example.com/group/repo/"), "repo");
    }

    /// Fake collaborator that writes a tiny repo instead of cloning.
    struct FakeVcs {
        fail_on: Option<&'static str>,
        seen: Mutex<Vec<&'static str>>,
    }

    impl FakeVcs {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                fail_on,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn step(&self, op: &'static str) -> Result<(), CheckoutError> {
            self.seen.lock().expect("test lock").push(op);
            if self.fail_on == Some(op) {
                return Err(CheckoutError::Git {
                    op,
                    detail: "injected failure".to_string(),
                });
            }
            Ok(())
        }
    }

    impl Vcs for FakeVcs {
        fn clone_repo(&self, _url: &str, dest: &Path) -> Result<(), CheckoutError> {
            std::fs::create_dir_all(dest)?;
            std::fs::write(dest.join("main.py"), "def entry():\n    return 1\n")?;
            self.step("clone")
        }

        fn checkout(&self, _dest: &Path, _commit: &str) -> Result<(), CheckoutError> {
            self.step("checkout")
        }

        fn apply_patch(&self, dest: &Path, patch: &str) -> Result<(), CheckoutError> {
            std::fs::write(dest.join("patched.py"), patch)?;
            self.step("apply")
        }
    }

    fn request() -> CheckoutRequest<'static> {
        CheckoutRequest {
            url: "https://example.com/org/demo.git",
            commit: "abc123",
            base_patch: None,
        }
    }

    fn scratch_is_empty(root: &Path) -> bool {
        std::fs::read_dir(root).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[test]
    fn build_at_commit_indexes_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let vcs = FakeVcs::new(None);

        let index = build_at_commit(&vcs, root.path(), &request()).unwrap();
        assert!(index.module("main.py").is_some());
        assert_eq!(index.root_name(), Some("demo"));
        assert!(scratch_is_empty(root.path()));
    }

    #[test]
    fn checkout_failure_leaves_no_scratch_state() {
        let root = tempfile::tempdir().unwrap();
        let vcs = FakeVcs::new(Some("checkout"));

        let result = build_at_commit(&vcs, root.path(), &request());
        assert!(matches!(result, Err(CheckoutError::Git { op: "checkout", .. })));
        assert!(scratch_is_empty(root.path()));
    }

    #[test]
    fn patch_failure_leaves_no_scratch_state() {
        let root = tempfile::tempdir().unwrap();
        let vcs = FakeVcs::new(Some("apply"));
        let req = CheckoutRequest {
            base_patch: Some("diff --git a/x b/x\n"),
            ..request()
        };

        let result = build_at_commit(&vcs, root.path(), &req);
        assert!(matches!(result, Err(CheckoutError::Git { op: "apply", .. })));
        assert!(scratch_is_empty(root.path()));
    }

    #[test]
    fn base_patch_is_applied_before_parsing() {
        let root = tempfile::tempdir().unwrap();
        let vcs = FakeVcs::new(None);
        let req = CheckoutRequest {
            base_patch: Some("def from_patch():\n    return 2\n"),
            ..request()
        };

        let index = build_at_commit(&vcs, root.path(), &req).unwrap();
        assert!(index.module("patched.py").is_some());
        let ops: Vec<&str> = vcs.seen.lock().expect("test lock").clone();
        assert_eq!(ops, vec!["clone", "checkout", "apply"]);
    }
}

//! Unified diff emission.
//!
//! Candidates are reported as git-style unified diffs: one `diff --git`
//! section per changed file, three context lines, no "no newline" hints.
//! Composition against a pristine baseline folds a previous round's edits
//! and the current round's edits into a single reviewable patch.

use std::collections::BTreeMap;

use similar::TextDiff;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiffError {
    #[error("file list and content lists must have equal length: {files} vs {contents}")]
    LengthMismatch { files: usize, contents: usize },
}

/// Emit one unified diff covering every file whose content changed.
///
/// Files run in the given order; unchanged files produce no section. The
/// result is `""` when nothing changed.
pub fn emit(files: &[&str], originals: &[&str], news: &[&str]) -> Result<String, DiffError> {
    if files.len() != originals.len() || files.len() != news.len() {
        return Err(DiffError::LengthMismatch {
            files: files.len(),
            contents: originals.len().min(news.len()),
        });
    }

    let mut out = String::new();
    for ((file, original), new) in files.iter().zip(originals).zip(news) {
        if original == new {
            continue;
        }
        out.push_str(&format!("diff --git a/{file} b/{file}\n"));
        let text = TextDiff::from_lines(*original, *new)
            .unified_diff()
            .context_radius(3)
            .missing_newline_hint(false)
            .header(&format!("a/{file}"), &format!("b/{file}"))
            .to_string();
        out.push_str(&text);
    }
    Ok(out)
}

/// Diff a full working state against the pristine baseline.
///
/// `current` is the state edits were computed against (it may already
/// carry earlier rounds of changes); `edited`/`news` overlay this round on
/// top. Every file differing from `pristine` appears, sorted by path, so
/// the patch stays apply-clean against the original checkout.
pub fn compose_with_base(
    pristine: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
    edited: &[&str],
    news: &[&str],
) -> Result<String, DiffError> {
    if edited.len() != news.len() {
        return Err(DiffError::LengthMismatch {
            files: edited.len(),
            contents: news.len(),
        });
    }

    let mut merged: BTreeMap<&str, &str> = current
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    for (file, new) in edited.iter().zip(news) {
        merged.insert(file, new);
    }

    let mut files: Vec<&str> = Vec::new();
    let mut originals: Vec<&str> = Vec::new();
    let mut finals: Vec<&str> = Vec::new();
    for (&file, &content) in &merged {
        let base = pristine.get(file).map(String::as_str).unwrap_or("");
        if base != content {
            files.push(file);
            originals.push(base);
            finals.push(content);
        }
    }

    emit(&files, &originals, &finals)
}

/// Split a multi-file unified diff back into per-file sections, keyed by
/// the `b/` path of each `diff --git` line.
pub fn split_diff_by_file(diff: &str) -> BTreeMap<String, String> {
    let mut sections: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            let b_path = rest
                .split_whitespace()
                .last()
                .and_then(|p| p.strip_prefix("b/"))
                .unwrap_or(rest);
            current = Some(b_path.to_string());
            sections.entry(b_path.to_string()).or_default();
        }
        if let Some(file) = &current {
            let section = sections.entry(file.clone()).or_default();
            section.push_str(line);
            section.push('\n');
        }
    }
    sections
}

/// Drop the marker `similar` would otherwise explain a missing trailing
/// newline with; candidate diffs always end files with a newline.
pub fn strip_no_newline_markers(diff: &str) -> String {
    diff.replace("\\ No newline at end of file\n", "")
}

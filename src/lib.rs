//! repairkit: structural indexing and patch synthesis for automated
//! program repair.
//!
//! The crate models one repair attempt end to end. An indexing pass
//! parses a repository checkout into a path-keyed structural tree
//! ([`index::RepositoryIndex`]); a resolver turns free-text location
//! hints into merged line intervals ([`locate::resolve`]); and a
//! synthesis pass converts raw collaborator output into validated
//! unified diffs ([`synthesize::synthesize`]). Orchestration helpers in
//! [`run`] fan attempts over a bounded pool and persist results.
//!
//! Nothing here talks to a model. Callers feed in raw text and get back
//! intervals, structured outcomes, and diffs; every fallible step returns
//! an explicit error instead of best-guessing.

pub mod diff;
pub mod edit;
pub mod index;
pub mod interval;
pub mod locate;
pub mod run;
pub mod synthesize;
pub mod validate;

pub use edit::{EditBatch, EditCommand, MatchTolerance};
pub use index::{ModuleIndex, RepositoryIndex};
pub use interval::{merge_spans, LineSpan};
pub use locate::{resolve, ResolvedLocation};
pub use run::{AttemptRecord, ResultLog, RunContext, WorkerPool};
pub use synthesize::{synthesize, PatchOutcome, SynthesisInput};
pub use validate::{StaticAnalyzer, TreeSitterAnalyzer, Validation};

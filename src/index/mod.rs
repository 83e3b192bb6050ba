//! Structural indexing: per-file parsing and repository-wide tree assembly.

pub mod builder;
pub mod checkout;
pub mod parser;
pub mod pool;
pub mod structure;

pub use builder::{IndexError, IndexNode, RepositoryIndex};
pub use checkout::{build_at_commit, top_folder, CheckoutError, CheckoutRequest, SystemGit, Vcs};
pub use parser::{ParsedSource, ParserError, PythonParser};
pub use structure::{DefKind, Definition, ModuleIndex, StructureError, IMPORT_GAP_TOLERANCE};

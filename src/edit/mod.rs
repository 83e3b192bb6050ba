//! Edit command parsing and application.

pub mod apply;
pub mod parser;

pub use apply::{apply_commands, ApplyError, MatchTolerance};
pub use parser::{
    extract_blocks, split_by_file, EditBatch, EditCommand, DIVIDER, REPLACE_MARKER, SEARCH_MARKER,
};

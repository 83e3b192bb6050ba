//! Thread-local parser pooling.
//!
//! Building a repository index parses every source file in the checkout;
//! creating a fresh tree-sitter parser per file would dominate the cost.
//! Each thread lazily creates one parser and reuses it.

use crate::index::parser::{ParserError, PythonParser};
use std::cell::RefCell;

thread_local! {
    static PYTHON_PARSER: RefCell<Option<PythonParser>> = const { RefCell::new(None) };
}

/// Execute `f` with this thread's pooled parser instance.
pub fn with_parser<F, R>(f: F) -> Result<R, ParserError>
where
    F: FnOnce(&mut PythonParser) -> R,
{
    PYTHON_PARSER.with(|cell| {
        let mut opt = cell.borrow_mut();
        if opt.is_none() {
            *opt = Some(PythonParser::new()?);
        }
        let parser = opt.as_mut().ok_or(ParserError::ParseFailed)?;
        Ok(f(parser))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_parser_reused_across_calls() {
        let first = with_parser(|p| p.parse("x = 1").is_ok()).unwrap();
        let second = with_parser(|p| p.parse("y = 2").is_ok()).unwrap();
        assert!(first && second);
    }
}

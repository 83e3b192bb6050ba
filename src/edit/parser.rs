//! Edit command extraction.
//!
//! Collaborator output arrives as free text containing fenced code blocks.
//! Inside a block, `### path/to/file.py` lines switch the target file and
//! conflict-style sentinels delimit search/replace hunks. Malformed blocks
//! are quarantined whole rather than half-applied.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

pub const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
pub const DIVIDER: &str = "=======";
pub const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

static PYTHON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```python\s*\n(.*?)```").expect("static pattern"));

/// One edit against one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditCommand {
    pub target_file: String,
    /// Lines to locate in the original. `None` replaces the whole file.
    pub match_text: Option<String>,
    pub replacement: String,
}

/// All commands recovered from one raw output, grouped per file in
/// document order, plus the material that could not be used.
#[derive(Debug, Clone, Default)]
pub struct EditBatch {
    pub commands: Vec<(String, Vec<EditCommand>)>,
    /// Blocks whose sentinel structure was unbalanced; kept verbatim for
    /// diagnostics.
    pub unparsed: Vec<String>,
    /// Paths named by commands but absent from the known file set.
    pub missing_files: Vec<String>,
}

/// Pull every ```python fenced block out of raw collaborator text.
pub fn extract_blocks(raw: &str) -> Vec<String> {
    PYTHON_FENCE
        .captures_iter(raw)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Parse fenced blocks into per-file commands.
///
/// When `diff_format` is true each hunk is a search/replace pair delimited
/// by conflict sentinels; otherwise the text after each `###` marker
/// replaces that file outright. A block with unbalanced sentinels is
/// dropped whole into `unparsed`, discarding any commands it had produced
/// so far.
pub fn split_by_file(
    blocks: &[String],
    diff_format: bool,
    known_files: &BTreeSet<String>,
) -> EditBatch {
    let mut per_file: BTreeMap<String, Vec<EditCommand>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut unparsed: Vec<String> = Vec::new();
    let mut missing: BTreeSet<String> = BTreeSet::new();

    for block in blocks {
        let parsed = if diff_format {
            parse_hunk_block(block)
        } else {
            parse_whole_block(block)
        };
        let commands = match parsed {
            Some(commands) => commands,
            None => {
                tracing::warn!("unbalanced edit block quarantined");
                unparsed.push(block.clone());
                continue;
            }
        };
        for command in commands {
            if !known_files.contains(&command.target_file) {
                missing.insert(command.target_file.clone());
                continue;
            }
            let file = command.target_file.clone();
            if !per_file.contains_key(&file) {
                order.push(file.clone());
            }
            per_file.entry(file).or_default().push(command);
        }
    }

    let commands = order
        .into_iter()
        .map(|file| {
            let cmds = per_file.remove(&file).unwrap_or_default();
            (file, cmds)
        })
        .collect();

    EditBatch {
        commands,
        unparsed,
        missing_files: missing.into_iter().collect(),
    }
}

/// File marker: `### path/to/file.py`, optionally quoted.
fn file_marker(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix("###")?;
    let token = rest.trim();
    if token.is_empty() {
        return None;
    }
    unquote_path_token(token)
}

/// Strip one layer of matching quotes and undo the escapes a collaborator
/// plausibly emits. Paths are treated as opaque strings; nothing here is
/// interpreted by a shell.
fn unquote_path_token(token: &str) -> Option<String> {
    let bytes = token.as_bytes();
    let quoted = bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0];

    let inner = if quoted {
        &token[1..token.len() - 1]
    } else {
        token
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
            continue;
        }
        out.push(c);
    }

    if out.chars().any(|c| c.is_control()) {
        return None;
    }
    if !quoted && out.contains(['"', '\'', '`']) {
        return None;
    }
    Some(out)
}

fn parse_hunk_block(block: &str) -> Option<Vec<EditCommand>> {
    let mut commands: Vec<EditCommand> = Vec::new();
    let mut current_file: Option<String> = None;

    #[derive(PartialEq)]
    enum State {
        Outside,
        Search,
        Replace,
    }
    let mut state = State::Outside;
    let mut search: Vec<&str> = Vec::new();
    let mut replace: Vec<&str> = Vec::new();

    for line in block.lines() {
        let sentinel = line.trim();
        match state {
            State::Outside => {
                if sentinel == SEARCH_MARKER {
                    current_file.as_ref()?;
                    state = State::Search;
                } else if sentinel == DIVIDER || sentinel == REPLACE_MARKER {
                    return None;
                } else if let Some(file) = file_marker(line) {
                    current_file = Some(file);
                }
            }
            State::Search => {
                if sentinel == DIVIDER {
                    state = State::Replace;
                } else if sentinel == SEARCH_MARKER || sentinel == REPLACE_MARKER {
                    return None;
                } else {
                    search.push(line);
                }
            }
            State::Replace => {
                if sentinel == REPLACE_MARKER {
                    let file = current_file.clone()?;
                    commands.push(EditCommand {
                        target_file: file,
                        match_text: Some(search.join("\n")),
                        replacement: replace.join("\n"),
                    });
                    search.clear();
                    replace.clear();
                    state = State::Outside;
                } else if sentinel == SEARCH_MARKER || sentinel == DIVIDER {
                    return None;
                } else {
                    replace.push(line);
                }
            }
        }
    }

    if state != State::Outside {
        return None;
    }
    Some(commands)
}

fn parse_whole_block(block: &str) -> Option<Vec<EditCommand>> {
    let mut commands: Vec<EditCommand> = Vec::new();
    let mut current_file: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();

    let mut flush =
        |file: &mut Option<String>, body: &mut Vec<&str>, commands: &mut Vec<EditCommand>| {
            if let Some(target_file) = file.take() {
                commands.push(EditCommand {
                    target_file,
                    match_text: None,
                    replacement: body.join("\n"),
                });
            }
            body.clear();
        };

    for line in block.lines() {
        if let Some(file) = file_marker(line) {
            flush(&mut current_file, &mut body, &mut commands);
            current_file = Some(file);
        } else if current_file.is_some() {
            body.push(line);
        }
    }
    flush(&mut current_file, &mut body, &mut commands);

    if commands.is_empty() {
        return None;
    }
    Some(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(files: &[&str]) -> BTreeSet<String> {
        files.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn extracts_only_python_fences() {
        let raw = "Reasoning.\n```python\nx = 1\n```\nMore text.\n```\nnot this\n```\n";
        let blocks = extract_blocks(raw);
        assert_eq!(blocks, vec!["x = 1\n"]);
    }

    #[test]
    fn hunks_group_per_file_in_document_order() {
        let block = "\
### b.py
<<<<<<< SEARCH
old_b
=======
new_b
>>>>>>> REPLACE
### a.py
<<<<<<< SEARCH
old_a
=======
new_a
>>>>>>> REPLACE
"
        .to_string();
        let batch = split_by_file(&[block], true, &known(&["a.py", "b.py"]));

        let files: Vec<&str> = batch.commands.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(files, vec!["b.py", "a.py"]);
        assert_eq!(
            batch.commands[0].1[0].match_text.as_deref(),
            Some("old_b")
        );
        assert_eq!(batch.commands[0].1[0].replacement, "new_b");
    }

    #[test]
    fn multiple_hunks_for_one_file_stay_together() {
        let block = "\
### a.py
<<<<<<< SEARCH
first
=======
FIRST
>>>>>>> REPLACE
<<<<<<< SEARCH
second
=======
SECOND
>>>>>>> REPLACE
"
        .to_string();
        let batch = split_by_file(&[block], true, &known(&["a.py"]));
        assert_eq!(batch.commands.len(), 1);
        assert_eq!(batch.commands[0].1.len(), 2);
    }

    #[test]
    fn unbalanced_block_is_quarantined_whole() {
        let block = "\
### a.py
<<<<<<< SEARCH
good
=======
GOOD
>>>>>>> REPLACE
<<<<<<< SEARCH
dangling search with no divider
"
        .to_string();
        let batch = split_by_file(&[block.clone()], true, &known(&["a.py"]));
        // The valid first hunk is discarded along with the broken tail.
        assert!(batch.commands.is_empty());
        assert_eq!(batch.unparsed, vec![block]);
    }

    #[test]
    fn sentinel_before_file_marker_is_invalid() {
        let block = "\
<<<<<<< SEARCH
x
=======
y
>>>>>>> REPLACE
"
        .to_string();
        let batch = split_by_file(&[block], true, &known(&["a.py"]));
        assert!(batch.commands.is_empty());
        assert_eq!(batch.unparsed.len(), 1);
    }

    #[test]
    fn unknown_target_goes_to_missing_files() {
        let block = "\
### ghost.py
<<<<<<< SEARCH
a
=======
b
>>>>>>> REPLACE
"
        .to_string();
        let batch = split_by_file(&[block], true, &known(&["a.py"]));
        assert!(batch.commands.is_empty());
        assert_eq!(batch.missing_files, vec!["ghost.py"]);
    }

    #[test]
    fn whole_block_mode_replaces_files() {
        let block = "\
### a.py
def replaced():
    return 1
### b.py
VALUE = 2
"
        .to_string();
        let batch = split_by_file(&[block], false, &known(&["a.py", "b.py"]));
        assert_eq!(batch.commands.len(), 2);
        assert_eq!(batch.commands[0].1[0].match_text, None);
        assert_eq!(
            batch.commands[0].1[0].replacement,
            "def replaced():\n    return 1"
        );
    }

    #[test]
    fn quoted_paths_are_unquoted_not_evaluated() {
        assert_eq!(
            unquote_path_token("\"dir/my file.py\"").as_deref(),
            Some("dir/my file.py")
        );
        assert_eq!(
            unquote_path_token("'it\\'s.py'").as_deref(),
            Some("it's.py")
        );
        assert_eq!(unquote_path_token("plain/path.py").as_deref(), Some("plain/path.py"));
    }

    #[test]
    fn hostile_path_tokens_are_rejected() {
        assert_eq!(unquote_path_token("a`rm -rf`.py"), None);
        assert_eq!(unquote_path_token("a\u{7}.py"), None);
        assert_eq!(unquote_path_token("un'balanced.py"), None);
    }

    #[test]
    fn empty_search_means_prepend_target_exists() {
        let block = "\
### a.py
<<<<<<< SEARCH
=======
import logging
>>>>>>> REPLACE
"
        .to_string();
        let batch = split_by_file(&[block], true, &known(&["a.py"]));
        assert_eq!(batch.commands[0].1[0].match_text.as_deref(), Some(""));
        assert_eq!(batch.commands[0].1[0].replacement, "import logging");
    }
}

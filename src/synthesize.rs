//! Candidate patch synthesis.
//!
//! One call takes raw collaborator output and produces a validated diff:
//! extract fenced blocks, split them into per-file commands, apply each
//! file independently, validate the results, and emit unified diffs. A
//! file whose hunks cannot be placed is dropped with its error recorded;
//! sibling files still go through. The final `diff_text` is emptied when
//! the candidate fails syntax checks or only moves blank lines, while
//! `raw_diff_text` always carries what was produced, for diagnostics.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::diff;
use crate::edit::{apply_commands, extract_blocks, split_by_file, MatchTolerance};
use crate::interval::LineSpan;
use crate::validate::{validate, StaticAnalyzer};

/// Everything one synthesis attempt needs.
pub struct SynthesisInput<'a> {
    /// Raw collaborator text, fenced blocks and all.
    pub raw_output: &'a str,
    /// Current content of every file the attempt may touch.
    pub file_contents: &'a BTreeMap<String, String>,
    /// Localized intervals per file; fuzzy matching stays inside them.
    pub allowed_intervals: &'a BTreeMap<String, Vec<LineSpan>>,
    /// Search/replace hunks when true, whole-file replacement when false.
    pub diff_format: bool,
    pub tolerance: MatchTolerance,
}

/// Result of one synthesis attempt.
#[derive(Debug, Clone, Serialize, Default)]
pub struct PatchOutcome {
    /// Files that were actually modified, in command order.
    pub edited_files: Vec<String>,
    /// Post-edit content, parallel to `edited_files`.
    pub new_contents: Vec<String>,
    /// Final diff; empty unless the candidate validated.
    pub diff_text: String,
    /// Diff before validation gating.
    pub raw_diff_text: String,
    pub syntax_ok: bool,
    pub lint_ok: bool,
    pub blank_line_only: bool,
    pub errors: Vec<String>,
}

/// Run the full synthesis pipeline over one raw output.
pub fn synthesize(analyzer: &dyn StaticAnalyzer, input: &SynthesisInput<'_>) -> PatchOutcome {
    let blocks = extract_blocks(input.raw_output);
    let known = input.file_contents.keys().cloned().collect();
    let batch = split_by_file(&blocks, input.diff_format, &known);

    let mut outcome = PatchOutcome::default();
    for block in &batch.unparsed {
        outcome
            .errors
            .push(format!("unparsable edit block: {}", first_line(block)));
    }
    for file in &batch.missing_files {
        outcome.errors.push(format!("unknown target file: {file}"));
    }

    let mut applied_without_change = 0usize;
    for (file, commands) in &batch.commands {
        let original = &input.file_contents[file];
        let allowed = input
            .allowed_intervals
            .get(file)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        match apply_commands(commands, original, allowed, input.tolerance) {
            Ok(new) if &new != original => {
                outcome.edited_files.push(file.clone());
                outcome.new_contents.push(new);
            }
            Ok(_) => applied_without_change += 1,
            Err(err) => {
                tracing::warn!(file, %err, "edit application failed, file dropped");
                outcome.errors.push(format!("{file}: {err}"));
            }
        }
    }

    let originals: Vec<&str> = outcome
        .edited_files
        .iter()
        .map(|f| input.file_contents[f].as_str())
        .collect();
    let news: Vec<&str> = outcome.new_contents.iter().map(String::as_str).collect();
    let files: Vec<&str> = outcome.edited_files.iter().map(String::as_str).collect();

    let verdict = validate(analyzer, &originals, &news);
    outcome.syntax_ok = verdict.syntax_ok;
    outcome.lint_ok = verdict.lint_ok;
    outcome.blank_line_only = verdict.blank_line_only;
    // Edits that reproduce every original carry no real change; classify
    // them with the blank-line-only candidates.
    if outcome.edited_files.is_empty() && applied_without_change > 0 {
        outcome.blank_line_only = true;
    }
    outcome.errors.extend(verdict.errors);
    outcome
        .errors
        .extend(verdict.new_issues.iter().map(|i| format!("new issue: {i}")));

    match diff::emit(&files, &originals, &news) {
        Ok(raw) => outcome.raw_diff_text = diff::strip_no_newline_markers(&raw),
        Err(err) => outcome.errors.push(err.to_string()),
    }

    if outcome.syntax_ok && !outcome.blank_line_only {
        outcome.diff_text = outcome.raw_diff_text.clone();
    }

    outcome
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::TreeSitterAnalyzer;

    fn contents(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(f, c)| (f.to_string(), c.to_string()))
            .collect()
    }

    fn input<'a>(
        raw: &'a str,
        files: &'a BTreeMap<String, String>,
        intervals: &'a BTreeMap<String, Vec<LineSpan>>,
    ) -> SynthesisInput<'a> {
        SynthesisInput {
            raw_output: raw,
            file_contents: files,
            allowed_intervals: intervals,
            diff_format: true,
            tolerance: MatchTolerance::default(),
        }
    }

    #[test]
    fn clean_edit_produces_a_gated_diff() {
        let files = contents(&[("a.py", "def f():\n    return 1\n")]);
        let intervals = BTreeMap::new();
        let raw = "\
Fix below.
```python
### a.py
<<<<<<< SEARCH
    return 1
=======
    return 2
>>>>>>> REPLACE
```
";
        let outcome = synthesize(&TreeSitterAnalyzer, &input(raw, &files, &intervals));
        assert_eq!(outcome.edited_files, vec!["a.py"]);
        assert!(outcome.syntax_ok);
        assert!(!outcome.diff_text.is_empty());
        assert_eq!(outcome.diff_text, outcome.raw_diff_text);
    }

    #[test]
    fn failing_file_does_not_sink_its_siblings() {
        let files = contents(&[
            ("a.py", "x = 1\n"),
            ("b.py", "y = 1\n"),
        ]);
        let intervals = BTreeMap::new();
        let raw = "\
```python
### a.py
<<<<<<< SEARCH
no_such_line = 0
=======
whatever = 0
>>>>>>> REPLACE
### b.py
<<<<<<< SEARCH
y = 1
=======
y = 2
>>>>>>> REPLACE
```
";
        let outcome = synthesize(&TreeSitterAnalyzer, &input(raw, &files, &intervals));
        assert_eq!(outcome.edited_files, vec!["b.py"]);
        assert!(outcome.diff_text.contains("+y = 2"));
        assert!(outcome.errors.iter().any(|e| e.starts_with("a.py:")));
    }

    #[test]
    fn syntax_breakage_empties_the_final_diff() {
        let files = contents(&[("a.py", "x = 1\n")]);
        let intervals = BTreeMap::new();
        let raw = "\
```python
### a.py
<<<<<<< SEARCH
x = 1
=======
x = (1
>>>>>>> REPLACE
```
";
        let outcome = synthesize(&TreeSitterAnalyzer, &input(raw, &files, &intervals));
        assert!(!outcome.syntax_ok);
        assert!(outcome.diff_text.is_empty());
        assert!(outcome.raw_diff_text.contains("+x = (1"));
    }

    #[test]
    fn blank_line_only_candidate_is_gated() {
        let files = contents(&[("a.py", "x = 1\ny = 2\n")]);
        let intervals = BTreeMap::new();
        let raw = "\
```python
### a.py
<<<<<<< SEARCH
x = 1
=======
x = 1

>>>>>>> REPLACE
```
";
        let outcome = synthesize(&TreeSitterAnalyzer, &input(raw, &files, &intervals));
        assert!(outcome.blank_line_only);
        assert!(outcome.diff_text.is_empty());
        assert!(!outcome.raw_diff_text.is_empty());
    }

    #[test]
    fn unknown_files_and_unparsed_blocks_are_reported() {
        let files = contents(&[("a.py", "x = 1\n")]);
        let intervals = BTreeMap::new();
        let raw = "\
```python
### ghost.py
<<<<<<< SEARCH
x
=======
y
>>>>>>> REPLACE
```
```python
### a.py
<<<<<<< SEARCH
dangling
```
";
        let outcome = synthesize(&TreeSitterAnalyzer, &input(raw, &files, &intervals));
        assert!(outcome.edited_files.is_empty());
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.contains("unknown target file: ghost.py")));
        assert!(outcome.errors.iter().any(|e| e.contains("unparsable")));
    }

    #[test]
    fn identity_edit_counts_as_no_real_change() {
        let files = contents(&[("a.py", "x = 1\ny = 2\n")]);
        let intervals = BTreeMap::new();
        let raw = "\
```python
### a.py
<<<<<<< SEARCH
x = 1
=======
x = 1
>>>>>>> REPLACE
```
";
        let outcome = synthesize(&TreeSitterAnalyzer, &input(raw, &files, &intervals));
        assert!(outcome.edited_files.is_empty());
        assert!(outcome.blank_line_only);
        assert!(outcome.diff_text.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn noop_output_yields_empty_outcome() {
        let files = contents(&[("a.py", "x = 1\n")]);
        let intervals = BTreeMap::new();
        let outcome = synthesize(
            &TreeSitterAnalyzer,
            &input("no code blocks here", &files, &intervals),
        );
        assert!(outcome.edited_files.is_empty());
        assert!(outcome.raw_diff_text.is_empty());
        assert!(outcome.diff_text.is_empty());
        assert!(outcome.syntax_ok);
    }
}

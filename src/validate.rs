//! Candidate validation.
//!
//! After application every candidate passes a syntax check, a lint delta
//! (only issues absent from the original count against it), and a
//! blank-line-only detector for edits that change nothing but vertical
//! whitespace. Validation records outcomes; the caller decides whether a
//! failing candidate still ships its raw diff for diagnostics.

use std::collections::BTreeSet;

use crate::index::pool;
use serde::Serialize;

/// Static analysis collaborator. The default is tree-sitter based; tests
/// and callers with a real linter on hand substitute their own.
pub trait StaticAnalyzer {
    /// Whether `text` parses, plus a human-readable reason when it does not.
    fn syntax_check(&self, text: &str) -> (bool, Option<String>);

    /// Issues in the original and edited text; `ok` is false only when the
    /// edit introduces issues the original did not have.
    fn lint(&self, before: &str, after: &str) -> LintReport;
}

#[derive(Debug, Clone, Default)]
pub struct LintReport {
    pub ok: bool,
    pub issues_before: BTreeSet<String>,
    pub issues_after: BTreeSet<String>,
}

impl LintReport {
    /// Issues present after the edit but not before.
    pub fn new_issues(&self) -> BTreeSet<String> {
        self.issues_after
            .difference(&self.issues_before)
            .cloned()
            .collect()
    }
}

/// Parser-backed analyzer: lint issues are parse error locations, so the
/// lint delta flags edits that move or add breakage even in files that
/// were already broken.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSitterAnalyzer;

impl TreeSitterAnalyzer {
    fn issues(text: &str) -> BTreeSet<String> {
        let parsed = pool::with_parser(|parser| {
            parser.parse_with_source(text).map(|parsed| {
                parsed
                    .error_nodes()
                    .iter()
                    .map(|e| format!("syntax error at {}:{}", e.line, e.column))
                    .collect::<BTreeSet<String>>()
            })
        });
        match parsed {
            Ok(Ok(issues)) => issues,
            // A parser that cannot run must not vouch for the text.
            Ok(Err(err)) | Err(err) => BTreeSet::from([format!("parser unavailable: {err}")]),
        }
    }
}

impl StaticAnalyzer for TreeSitterAnalyzer {
    fn syntax_check(&self, text: &str) -> (bool, Option<String>) {
        let issues = Self::issues(text);
        match issues.iter().next() {
            None => (true, None),
            Some(first) => (false, Some(first.clone())),
        }
    }

    fn lint(&self, before: &str, after: &str) -> LintReport {
        let issues_before = Self::issues(before);
        let issues_after = Self::issues(after);
        let ok = issues_after.is_subset(&issues_before);
        LintReport {
            ok,
            issues_before,
            issues_after,
        }
    }
}

/// Aggregate verdict over all edited files of one candidate.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Validation {
    pub syntax_ok: bool,
    pub lint_ok: bool,
    pub new_issues: Vec<String>,
    /// Every edited file differs from its original only in blank lines.
    pub blank_line_only: bool,
    pub errors: Vec<String>,
}

/// Validate edited contents against their originals, pairwise.
///
/// `originals` and `news` run in parallel; an empty edit set validates
/// trivially with `blank_line_only` unset.
pub fn validate(analyzer: &dyn StaticAnalyzer, originals: &[&str], news: &[&str]) -> Validation {
    debug_assert_eq!(originals.len(), news.len());

    let mut verdict = Validation {
        syntax_ok: true,
        lint_ok: true,
        ..Validation::default()
    };
    if news.is_empty() {
        return verdict;
    }

    for (original, new) in originals.iter().zip(news) {
        let (ok, reason) = analyzer.syntax_check(new);
        if !ok {
            verdict.syntax_ok = false;
            if let Some(reason) = reason {
                verdict.errors.push(reason);
            }
        }

        let report = analyzer.lint(original, new);
        if !report.ok {
            verdict.lint_ok = false;
            verdict.new_issues.extend(report.new_issues());
        }
    }

    verdict.blank_line_only = originals
        .iter()
        .zip(news)
        .all(|(original, new)| blank_line_only_change(original, new));

    verdict
}

/// True when the texts are identical after dropping lines that are empty
/// or all-whitespace.
pub fn blank_line_only_change(original: &str, new: &str) -> bool {
    let strip = |text: &str| -> String {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    };
    strip(original) == strip(new)
}

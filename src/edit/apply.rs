//! Hunk application.
//!
//! Locates each search text in the original file and splices in the
//! replacement. Matching is exact-first; whitespace-insensitive and
//! similarity fallbacks only fire inside the localized intervals, so a
//! fuzzy match can never wander into code the localizer did not select.
//! Any hunk that cannot be placed fails the whole file.

use crate::edit::parser::EditCommand;
use crate::interval::LineSpan;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("no match for edit hunk starting with {snippet:?}")]
    HunkNotFound { snippet: String },
}

/// Fallback matching policy for hunks that miss exactly.
#[derive(Debug, Clone, Copy)]
pub struct MatchTolerance {
    /// Retry with all horizontal whitespace collapsed per line.
    pub collapse_whitespace: bool,
    /// Accept the best window whose mean per-line similarity reaches this
    /// floor (0.0 to 1.0). Off by default; exact and whitespace matching
    /// cover collaborator output in practice.
    pub similarity_floor: Option<f64>,
}

impl Default for MatchTolerance {
    fn default() -> Self {
        Self {
            collapse_whitespace: true,
            similarity_floor: None,
        }
    }
}

/// Apply one file's commands to its original content.
///
/// `allowed` is the localized interval union; fallback matches must land
/// entirely inside it (an empty slice allows the whole file). Spans shift
/// with each splice so later hunks see post-edit line numbers.
pub fn apply_commands(
    commands: &[EditCommand],
    original: &str,
    allowed: &[LineSpan],
    tolerance: MatchTolerance,
) -> Result<String, ApplyError> {
    if commands.is_empty() {
        return Ok(original.to_string());
    }

    // Line buffer that round-trips the trailing newline exactly.
    let mut lines: Vec<String> = original.split('\n').map(str::to_string).collect();
    let mut allowed: Vec<LineSpan> = allowed.to_vec();

    for command in commands {
        let Some(match_text) = command.match_text.as_deref() else {
            lines = command.replacement.split('\n').map(str::to_string).collect();
            allowed.clear();
            continue;
        };
        if match_text == command.replacement {
            continue;
        }

        let search: Vec<&str> = match_text.split('\n').collect();
        let replacement: Vec<String> =
            command.replacement.split('\n').map(str::to_string).collect();

        let start = find_window(&lines, &search, &allowed, tolerance).ok_or_else(|| {
            ApplyError::HunkNotFound {
                snippet: snippet_of(match_text),
            }
        })?;

        let removed = search.len();
        let delta = replacement.len() as isize - removed as isize;
        lines.splice(start..start + removed, replacement);
        shift_spans(&mut allowed, start + 1, delta);
    }

    Ok(lines.join("\n"))
}

/// First window matching the search lines: exact anywhere, then the
/// tolerance fallbacks restricted to `allowed`.
fn find_window(
    lines: &[String],
    search: &[&str],
    allowed: &[LineSpan],
    tolerance: MatchTolerance,
) -> Option<usize> {
    if search.len() > lines.len() {
        return None;
    }
    let window_count = lines.len() - search.len() + 1;

    for start in 0..window_count {
        if lines[start..start + search.len()]
            .iter()
            .zip(search)
            .all(|(line, pat)| line == pat)
        {
            return Some(start);
        }
    }

    if tolerance.collapse_whitespace {
        let collapsed_search: Vec<String> =
            search.iter().map(|s| collapse_horizontal_ws(s)).collect();
        for start in 0..window_count {
            if !window_allowed(start, search.len(), allowed) {
                continue;
            }
            if lines[start..start + search.len()]
                .iter()
                .zip(&collapsed_search)
                .all(|(line, pat)| collapse_horizontal_ws(line) == *pat)
            {
                return Some(start);
            }
        }
    }

    if let Some(floor) = tolerance.similarity_floor {
        let mut best: Option<(usize, f64)> = None;
        for start in 0..window_count {
            if !window_allowed(start, search.len(), allowed) {
                continue;
            }
            let score = lines[start..start + search.len()]
                .iter()
                .zip(search)
                .map(|(line, pat)| strsim::normalized_levenshtein(line, pat))
                .sum::<f64>()
                / search.len() as f64;
            if score >= floor && best.map_or(true, |(_, b)| score > b) {
                best = Some((start, score));
            }
        }
        if let Some((start, _)) = best {
            return Some(start);
        }
    }

    None
}

/// True when the 0-based window sits inside the allowed union. An empty
/// union imposes no restriction.
fn window_allowed(start: usize, len: usize, allowed: &[LineSpan]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let span = LineSpan::new(start + 1, start + len);
    allowed.iter().any(|a| a.contains(&span))
}

// Runs of whitespace collapse to one space; token boundaries survive, so
// `not x` never equates with `notx`.
fn collapse_horizontal_ws(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shift span endpoints past `edit_start` (1-based first edited line) by
/// `delta` lines. A span containing the edit keeps its start and grows or
/// shrinks at the end, so a replacement longer than its search text stays
/// inside the localized region.
fn shift_spans(spans: &mut [LineSpan], edit_start: usize, delta: isize) {
    if delta == 0 {
        return;
    }
    for span in spans.iter_mut() {
        if span.start > edit_start {
            span.start = span.start.saturating_add_signed(delta).max(1);
        }
        if span.end >= edit_start {
            span.end = span.end.saturating_add_signed(delta).max(span.start);
        }
    }
}

fn snippet_of(text: &str) -> String {
    let first = text.lines().next().unwrap_or("");
    if first.chars().count() > 60 {
        let head: String = first.chars().take(60).collect();
        format!("{head}...")
    } else {
        first.to_string()
    }
}

//! Location resolution.
//!
//! Turns free-text location hints from the reasoning collaborator into
//! merged line intervals over one file. Hints resolve, in order of
//! preference: explicit `line: N`, a definition name known to the index
//! (bare, `function:`, `class:`, `method:`, and `Class.method` forms),
//! then substring search against the raw lines. Unresolved hints are
//! dropped without error; partial localization is normal.

use crate::index::structure::ModuleIndex;
use crate::index::RepositoryIndex;
use crate::interval::{merge_spans, LineSpan};

/// Result of resolving one file's hints.
#[derive(Debug, Clone, Default)]
pub struct ResolvedLocation {
    /// Anchor lines that resolved (one per accepted hint).
    pub lines: Vec<usize>,
    /// Merged, non-overlapping body intervals; the editable region.
    pub spans: Vec<LineSpan>,
    /// Import block spans, reported separately for distinct rendering.
    pub import_spans: Vec<LineSpan>,
    /// Union of `used_globals` over definitions intersecting `spans`.
    pub used_globals: Vec<String>,
}

enum Anchor {
    /// A single line; expands by the context window.
    Line(usize),
    /// A whole definition; contributes its exact span, never shrunk and
    /// never window-expanded.
    Definition(LineSpan),
}

/// Resolve one file's hint text against the index.
///
/// Each resolved line anchor expands to `[line - window, line + window]`
/// clipped to file bounds; definition anchors contribute their full span.
/// All anchors merge with `gap_tolerance = window` so adjacent windows
/// coalesce.
pub fn resolve(
    hint_text: &str,
    index: &RepositoryIndex,
    file: &str,
    context_window: usize,
    file_content: &str,
) -> ResolvedLocation {
    let module = index.module(file);
    let raw_lines: Vec<&str> = file_content.lines().collect();
    let line_count = raw_lines.len();
    if line_count == 0 {
        return ResolvedLocation::default();
    }

    let mut anchors: Vec<Anchor> = Vec::new();
    let mut lines: Vec<usize> = Vec::new();

    for raw in hint_text.lines() {
        let hint = raw.trim();
        if hint.is_empty() {
            continue;
        }

        if let Some(rest) = hint.strip_prefix("line:") {
            match rest.trim().parse::<usize>() {
                Ok(n) if (1..=line_count).contains(&n) => {
                    anchors.push(Anchor::Line(n));
                    lines.push(n);
                }
                _ => tracing::debug!(hint, "line hint out of bounds or malformed, dropped"),
            }
            continue;
        }

        let name_token = hint
            .strip_prefix("function:")
            .or_else(|| hint.strip_prefix("method:"))
            .or_else(|| hint.strip_prefix("class:"))
            .map(str::trim)
            .unwrap_or(hint);

        if let Some(def) = module.and_then(|m| m.definition(name_token)) {
            let span = def.span.clipped(line_count);
            anchors.push(Anchor::Definition(span));
            lines.push(span.start);
            continue;
        }

        if let Some(pos) = raw_lines.iter().position(|l| l.contains(hint)) {
            let n = pos + 1;
            anchors.push(Anchor::Line(n));
            lines.push(n);
            continue;
        }

        tracing::debug!(hint, file, "unresolved location hint dropped");
    }

    let windows: Vec<LineSpan> = anchors
        .iter()
        .map(|anchor| match anchor {
            Anchor::Line(n) => LineSpan::new(
                n.saturating_sub(context_window).max(1),
                (n + context_window).min(line_count),
            ),
            Anchor::Definition(span) => *span,
        })
        .collect();

    let spans = merge_spans(windows, context_window);

    let import_spans = module.map(|m| m.import_spans.clone()).unwrap_or_default();
    let used_globals = module
        .map(|m| used_globals_in(m, &spans))
        .unwrap_or_default();

    ResolvedLocation {
        lines,
        spans,
        import_spans,
        used_globals,
    }
}

fn used_globals_in(module: &ModuleIndex, spans: &[LineSpan]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for def in &module.definitions {
        if !spans.iter().any(|s| s.intersects(&def.span)) {
            continue;
        }
        for entry in &def.used_globals {
            if !out.contains(entry) {
                out.push(entry.clone());
            }
        }
    }
    out
}

/// Grow each interval outward to the full span of its nearest enclosing
/// definition, for optional extended context. The minimal interval set used
/// for editing is left untouched; this returns a parallel widened set.
pub fn widen_to_enclosing(spans: &[LineSpan], module: &ModuleIndex) -> Vec<LineSpan> {
    spans
        .iter()
        .map(|span| {
            let enclosing = module
                .definitions
                .iter()
                .filter(|d| d.span.contains_line(span.start))
                .min_by_key(|d| d.span.len());
            match enclosing {
                Some(def) => LineSpan::new(
                    def.span.start.min(span.start),
                    def.span.end.max(span.end),
                ),
                None => *span,
            }
        })
        .collect()
}

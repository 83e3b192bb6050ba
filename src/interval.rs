use serde::{Deserialize, Serialize};

/// An inclusive, 1-based line range.
///
/// Invariant: `start <= end`. Spans are the unit of all interval algebra in
/// this crate: import blocks, resolved edit locations, and context windows
/// are all expressed as `LineSpan`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
}

impl LineSpan {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start >= 1, "line numbers are 1-based");
        debug_assert!(start <= end, "span start must not exceed end");
        Self { start, end }
    }

    /// Number of lines covered (inclusive on both ends).
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains_line(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }

    pub fn contains(&self, other: &LineSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersects(&self, other: &LineSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Clamp the span to `[1, max_line]`.
    pub fn clipped(self, max_line: usize) -> Self {
        let start = self.start.max(1).min(max_line.max(1));
        let end = self.end.min(max_line.max(1)).max(start);
        Self { start, end }
    }
}

/// Merge inclusive line spans, folding neighbors whose gap is at most
/// `gap_tolerance` lines.
///
/// Two spans are folded when the next one starts inside the previous or when
/// `next.start - prev.end <= gap_tolerance`. The result is sorted and
/// pairwise non-overlapping; merging is idempotent and total (empty input
/// yields empty output).
pub fn merge_spans(mut spans: Vec<LineSpan>, gap_tolerance: usize) -> Vec<LineSpan> {
    if spans.is_empty() {
        return spans;
    }

    spans.sort_by_key(|s| (s.start, s.end));

    let mut merged: Vec<LineSpan> = Vec::with_capacity(spans.len());
    for current in spans {
        match merged.last_mut() {
            Some(prev) if current.start <= prev.end || current.start - prev.end <= gap_tolerance => {
                prev.end = prev.end.max(current.end);
            }
            _ => merged.push(current),
        }
    }
    merged
}

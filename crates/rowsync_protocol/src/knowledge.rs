//! Replica knowledge: a combinable summary of changes already seen.
//!
//! The core never inspects knowledge internals. It only ever slices a
//! knowledge value by an identifier range and combines slices back
//! together, which is exactly the public surface of [`SyncKnowledge`].

use crate::sync_id::SyncId;
use serde::{Deserialize, Serialize};

/// A half-open identifier span `[lo, hi)`; `hi = None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Span {
    lo: SyncId,
    hi: Option<SyncId>,
}

impl Span {
    /// Intersects with `[start, end)`. Returns `None` when disjoint.
    fn clamp(&self, start: &SyncId, end: Option<&SyncId>) -> Option<Span> {
        let lo = if &self.lo >= start {
            self.lo.clone()
        } else {
            start.clone()
        };

        let hi = match (&self.hi, end) {
            (None, None) => None,
            (Some(h), None) => Some(h.clone()),
            (None, Some(e)) => Some(e.clone()),
            (Some(h), Some(e)) => Some(if h <= e { h.clone() } else { e.clone() }),
        };

        match &hi {
            Some(h) if *h <= lo => None,
            _ => Some(Span { lo, hi }),
        }
    }
}

/// An opaque summary of "changes this replica has already incorporated or
/// sent", sliceable by identifier range and combinable by union.
///
/// # Invariants
///
/// - Spans are sorted by lower bound
/// - Spans are disjoint; abutting spans are merged
///
/// Thanks to the normalization, combining the per-batch slices of a run
/// compares equal to slicing the full `[zero, infinity)` range in one go.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncKnowledge {
    spans: Vec<Span>,
}

impl SyncKnowledge {
    /// Knowledge covering nothing.
    pub fn empty() -> Self {
        Self { spans: Vec::new() }
    }

    /// Knowledge covering the whole identifier space.
    pub fn full() -> Self {
        Self {
            spans: vec![Span {
                lo: SyncId::from_bytes(Vec::new()),
                hi: None,
            }],
        }
    }

    /// Knowledge covering a single half-open span `[start, end)`;
    /// `end = None` extends to infinity.
    pub fn spanning(start: SyncId, end: Option<SyncId>) -> Self {
        let span = Span { lo: start, hi: end };
        match &span.hi {
            Some(h) if *h <= span.lo => Self::empty(),
            _ => Self { spans: vec![span] },
        }
    }

    /// Returns true if the knowledge covers nothing.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Returns true if `id` is covered.
    pub fn contains(&self, id: &SyncId) -> bool {
        self.spans.iter().any(|s| {
            &s.lo <= id
                && match &s.hi {
                    Some(h) => id < h,
                    None => true,
                }
        })
    }

    /// Restricts the knowledge to the half-open range `[start, end)`.
    ///
    /// `end = None` means "to infinity". The result covers exactly the
    /// intersection of the receiver with the range.
    pub fn slice_by_range(&self, start: &SyncId, end: Option<&SyncId>) -> Self {
        let spans = self
            .spans
            .iter()
            .filter_map(|s| s.clamp(start, end))
            .collect();
        Self { spans }
    }

    /// Unions two knowledge values. Associative and commutative.
    pub fn combine(a: &Self, b: &Self) -> Self {
        let mut spans: Vec<Span> = a.spans.iter().chain(b.spans.iter()).cloned().collect();
        spans.sort_by(|x, y| x.lo.cmp(&y.lo));

        let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
        for span in spans {
            match merged.last_mut() {
                Some(last) => {
                    let overlaps = match &last.hi {
                        None => true,
                        Some(h) => span.lo <= *h,
                    };
                    if overlaps {
                        last.hi = match (&last.hi, &span.hi) {
                            (None, _) | (_, None) => None,
                            (Some(a), Some(b)) => Some(if a >= b { a.clone() } else { b.clone() }),
                        };
                    } else {
                        merged.push(span);
                    }
                }
                None => merged.push(span),
            }
        }

        Self { spans: merged }
    }
}

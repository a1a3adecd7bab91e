//! Batch ranges: which slice of the identifier space a batch owns.
//!
//! While a batch is being assembled, a [`RangeSetBuilder`] tracks the
//! identifier range contributed by each table. The finished
//! [`BatchRangeSet`] covers a contiguous slice of the `[zero, infinity)`
//! space and is consumed exactly once, to cut the replica's full knowledge
//! down to the partial knowledge travelling with that batch.

use crate::error::{ProtocolError, ProtocolResult};
use crate::knowledge::SyncKnowledge;
use crate::sync_id::{IdRegistry, SyncId};
use std::sync::Arc;

/// Exclusive upper bound of a finished range, used for projection.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RangeLimit {
    /// Range is still open; no bound yet.
    Open,
    /// Exclusive bound at a concrete id.
    At(SyncId),
    /// Range reaches the end of the identifier space.
    Unbounded,
}

/// The identifier range one table contributes to one batch.
///
/// `end` is the inclusive maximum id of the range; `None` marks a
/// placeholder for a table whose first row has not been observed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRange {
    table: String,
    start: SyncId,
    end: Option<SyncId>,
    limit: RangeLimit,
}

impl BatchRange {
    fn open(table: String, start: SyncId) -> Self {
        Self {
            table,
            start,
            end: None,
            limit: RangeLimit::Open,
        }
    }

    /// Table this range belongs to.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// First id of the range, inclusive.
    pub fn start(&self) -> &SyncId {
        &self.start
    }

    /// Last id of the range, inclusive, when the range has been closed.
    pub fn end(&self) -> Option<&SyncId> {
        self.end.as_ref()
    }

    /// A range is usable once it has a closed end at or above its start.
    pub fn is_usable(&self) -> bool {
        match &self.end {
            Some(end) => self.start <= *end,
            None => false,
        }
    }
}

/// An ordered set of batch ranges, at most one per table, covering a
/// contiguous slice of the identifier space in apply order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRangeSet {
    ranges: Vec<BatchRange>,
    space_closed: bool,
}

impl BatchRangeSet {
    /// Ranges in apply order.
    pub fn ranges(&self) -> &[BatchRange] {
        &self.ranges
    }

    /// The last range of the set.
    pub fn last_range(&self) -> Option<&BatchRange> {
        self.ranges.last()
    }

    /// Returns true if this set closed the identifier space: it was the
    /// terminal set of a run and no continuation may follow it.
    pub fn closes_space(&self) -> bool {
        self.space_closed
    }

    /// Slices `knowledge` by every usable range and combines the slices.
    ///
    /// An unusable range is tolerated only as the trailing entry (a table
    /// that was opened but received no rows); anywhere else it indicates a
    /// builder defect and fails hard.
    pub fn project_on(&self, knowledge: &SyncKnowledge) -> ProtocolResult<SyncKnowledge> {
        let mut combined = SyncKnowledge::empty();
        for (index, range) in self.ranges.iter().enumerate() {
            if !range.is_usable() {
                if index + 1 != self.ranges.len() {
                    return Err(ProtocolError::UnusableRange {
                        table: range.table.clone(),
                    });
                }
                continue;
            }
            let slice = match &range.limit {
                RangeLimit::At(limit) => knowledge.slice_by_range(&range.start, Some(limit)),
                RangeLimit::Unbounded => knowledge.slice_by_range(&range.start, None),
                RangeLimit::Open => {
                    return Err(ProtocolError::UnusableRange {
                        table: range.table.clone(),
                    })
                }
            };
            combined = SyncKnowledge::combine(&combined, &slice);
        }
        Ok(combined)
    }
}

/// Stateful builder for one in-progress [`BatchRangeSet`] at a time.
///
/// The building protocol is strict: tables advance in apply order, ids
/// advance within the open table's bounds, and any violation is an
/// internal-consistency error rather than something to be ignored.
#[derive(Debug)]
pub struct RangeSetBuilder {
    registry: Arc<IdRegistry>,
    ranges: Vec<BatchRange>,
    in_progress: bool,
}

impl RangeSetBuilder {
    /// Creates a builder over the registry's table set.
    pub fn new(registry: Arc<IdRegistry>) -> Self {
        Self {
            registry,
            ranges: Vec::new(),
            in_progress: false,
        }
    }

    /// Begins the first range set of a run.
    pub fn start_first(&mut self) -> ProtocolResult<()> {
        if self.in_progress {
            return Err(ProtocolError::AlreadyStarted);
        }
        self.ranges.clear();
        self.in_progress = true;
        Ok(())
    }

    /// Begins a range set continuing where `prev` left off.
    ///
    /// Continues within the same table at the successor of the previous
    /// set's last id, or re-opens the placeholder if the previous table
    /// had produced no rows yet.
    pub fn start_continuation(&mut self, prev: &BatchRangeSet) -> ProtocolResult<()> {
        if self.in_progress {
            return Err(ProtocolError::AlreadyStarted);
        }
        if prev.space_closed {
            return Err(ProtocolError::SpaceClosed);
        }
        let last = prev.last_range().ok_or(ProtocolError::EmptyRangeSet)?;

        let range = match &last.end {
            Some(end) => {
                let format = self.registry.bounds(&last.table)?.format().clone();
                BatchRange::open(last.table.clone(), format.increment(end)?)
            }
            None => BatchRange::open(last.table.clone(), last.start.clone()),
        };

        self.ranges.clear();
        self.ranges.push(range);
        self.in_progress = true;
        Ok(())
    }

    /// Opens a range for `name`, closing the current table's range at its
    /// precomputed upper bound first. No-op when `name` is already the
    /// current table.
    pub fn start_next_table(&mut self, name: &str) -> ProtocolResult<()> {
        if !self.in_progress {
            return Err(ProtocolError::NotStarted);
        }
        let bounds = self.registry.bounds(name)?;
        let start = bounds.start().clone();
        let ordinal = self.registry.ordinal(name)?;

        if let Some(current) = self.ranges.last() {
            if current.table == name {
                return Ok(());
            }
            if self.registry.ordinal(&current.table)? >= ordinal {
                return Err(ProtocolError::TableOutOfOrder {
                    from: current.table.clone(),
                    to: name.to_string(),
                });
            }
            self.close_current()?;
        }

        self.ranges.push(BatchRange::open(name.to_string(), start));
        Ok(())
    }

    /// Records `max_id` as the new inclusive end of the open range.
    ///
    /// The id must belong to the open range's table, lie below the table's
    /// upper bound, and advance strictly past the current end. A mismatch
    /// is a fatal internal-consistency error.
    pub fn add_id(&mut self, table: &str, max_id: SyncId) -> ProtocolResult<()> {
        if !self.in_progress {
            return Err(ProtocolError::NotStarted);
        }
        let bounds = self.registry.bounds(table)?;
        let upper = bounds.upper().clone();
        let current = self.ranges.last_mut().ok_or(ProtocolError::NotStarted)?;

        if current.table != table {
            return Err(ProtocolError::RangeMismatch {
                expected: current.table.clone(),
                actual: table.to_string(),
            });
        }
        let in_order = match &current.end {
            Some(end) => max_id > *end,
            None => max_id >= current.start,
        };
        if !in_order || max_id >= upper {
            return Err(ProtocolError::IdOutOfRange {
                table: table.to_string(),
            });
        }

        current.end = Some(max_id);
        Ok(())
    }

    /// Completes the set. Requires at least one usable range.
    pub fn finish(&mut self) -> ProtocolResult<BatchRangeSet> {
        if !self.in_progress {
            return Err(ProtocolError::NotStarted);
        }
        let ranges = self.seal()?;
        if !ranges.iter().any(BatchRange::is_usable) {
            self.abort();
            return Err(ProtocolError::EmptyRangeSet);
        }
        self.in_progress = false;
        Ok(BatchRangeSet {
            ranges,
            space_closed: false,
        })
    }

    /// Completes the terminal set of a run, stamping the current table's
    /// end at its precomputed upper bound. On the final table this closes
    /// the identifier space: the set's knowledge reaches infinity.
    pub fn finish_last(&mut self) -> ProtocolResult<BatchRangeSet> {
        if !self.in_progress {
            return Err(ProtocolError::NotStarted);
        }
        if self.ranges.is_empty() {
            self.abort();
            return Err(ProtocolError::EmptyRangeSet);
        }
        self.close_current()?;
        let space_closed = match self.ranges.last().and_then(|r| r.end.clone()) {
            Some(end) => end == self.registry.infinity(),
            None => false,
        };
        let ranges = self.seal()?;
        self.in_progress = false;
        Ok(BatchRangeSet {
            ranges,
            space_closed,
        })
    }

    /// Discards in-progress state without producing a set.
    pub fn abort(&mut self) {
        self.ranges.clear();
        self.in_progress = false;
    }

    /// Stamps the current range's end at its table's upper bound.
    fn close_current(&mut self) -> ProtocolResult<()> {
        if let Some(current) = self.ranges.last_mut() {
            let upper = self.registry.bounds(&current.table)?.upper().clone();
            current.end = Some(upper);
        }
        Ok(())
    }

    /// Computes the exclusive projection limit of every closed range.
    fn seal(&mut self) -> ProtocolResult<Vec<BatchRange>> {
        let infinity = self.registry.infinity();
        let mut ranges = std::mem::take(&mut self.ranges);
        for range in &mut ranges {
            if let Some(end) = &range.end {
                range.limit = if *end == infinity {
                    RangeLimit::Unbounded
                } else {
                    let format = self.registry.bounds(&range.table)?.format().clone();
                    RangeLimit::At(format.increment(end)?)
                };
            }
        }
        Ok(ranges)
    }
}

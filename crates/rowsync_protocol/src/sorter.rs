//! Row sorting and size-bounded batch emission.
//!
//! A [`RowSorter`] accepts changed rows in any order, possibly across
//! several partial fetches, and keys each one by its derived [`SyncId`].
//! Consuming the sorter yields a lazy sequence of size-bounded
//! [`SortedBatch`]es in apply order, each paired with the knowledge slice
//! covering exactly the identifier range that batch owns.

use crate::entity::Entity;
use crate::error::{ProtocolError, ProtocolResult};
use crate::knowledge::SyncKnowledge;
use crate::range::{BatchRangeSet, RangeSetBuilder};
use crate::sync_id::{IdRegistry, SyncId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One size-bounded batch of ordered rows plus its knowledge slice.
#[derive(Debug, Clone)]
pub struct SortedBatch {
    /// Rows in apply order, ascending by id within each table.
    pub rows: Vec<Entity>,
    /// Knowledge covering exactly this batch's identifier ranges.
    pub knowledge: SyncKnowledge,
    /// True for the terminal batch of the run.
    pub is_last: bool,
}

/// Sorts changed rows by identifier within table apply order.
///
/// Rows may arrive in any order and across multiple chunks; a later row
/// with the same derived id overwrites the earlier one (a provider may
/// legitimately re-emit the same key across chunks).
#[derive(Debug)]
pub struct RowSorter {
    registry: Arc<IdRegistry>,
    tables: Vec<BTreeMap<SyncId, Entity>>,
}

impl RowSorter {
    /// Creates a sorter over the registry's table set.
    pub fn new(registry: Arc<IdRegistry>) -> Self {
        let tables = (0..registry.table_count()).map(|_| BTreeMap::new()).collect();
        Self { registry, tables }
    }

    /// Adds one row, deriving its id from table name and primary key.
    pub fn add_row(&mut self, entity: Entity) -> ProtocolResult<()> {
        let id = self.registry.row_id(&entity.table, &entity.key)?;
        let ordinal = self.registry.ordinal(&entity.table)?;
        self.tables[ordinal].insert(id, entity);
        Ok(())
    }

    /// Adds a chunk of rows.
    pub fn add_rows<I>(&mut self, entities: I) -> ProtocolResult<()>
    where
        I: IntoIterator<Item = Entity>,
    {
        for entity in entities {
            self.add_row(entity)?;
        }
        Ok(())
    }

    /// Total number of distinct rows held.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(BTreeMap::len).sum()
    }

    /// Consumes the sorter into a lazy batch sequence.
    ///
    /// The sequence is finite, pull-driven and not restartable; re-batching
    /// the same data requires a fresh sorter. `max_batch_bytes` bounds the
    /// estimated size of every yielded batch; `knowledge` is the source
    /// value each batch's range set is projected onto.
    pub fn into_batches(self, max_batch_bytes: usize, knowledge: SyncKnowledge) -> SortedBatches {
        let builder = RangeSetBuilder::new(Arc::clone(&self.registry));
        let rows: Vec<Vec<(SyncId, Entity)>> = self
            .tables
            .into_iter()
            .map(|table| table.into_iter().collect())
            .collect();
        SortedBatches {
            registry: self.registry,
            rows,
            builder,
            prev_set: None,
            table_idx: 0,
            row_idx: 0,
            max_batch_bytes,
            knowledge,
            done: false,
        }
    }
}

/// Lazy, finite iterator of sorted batches. See [`RowSorter::into_batches`].
#[derive(Debug)]
pub struct SortedBatches {
    registry: Arc<IdRegistry>,
    rows: Vec<Vec<(SyncId, Entity)>>,
    builder: RangeSetBuilder,
    prev_set: Option<BatchRangeSet>,
    table_idx: usize,
    row_idx: usize,
    max_batch_bytes: usize,
    knowledge: SyncKnowledge,
    done: bool,
}

impl SortedBatches {
    fn yield_batch(
        &mut self,
        set: BatchRangeSet,
        rows: Vec<Entity>,
        is_last: bool,
    ) -> ProtocolResult<SortedBatch> {
        let knowledge = set.project_on(&self.knowledge)?;
        self.prev_set = Some(set);
        Ok(SortedBatch {
            rows,
            knowledge,
            is_last,
        })
    }

    fn next_batch(&mut self) -> ProtocolResult<SortedBatch> {
        match self.prev_set.take() {
            Some(prev) => self.builder.start_continuation(&prev)?,
            None => self.builder.start_first()?,
        }

        let mut batch_rows = Vec::new();
        let mut batch_size = 0usize;

        while self.table_idx < self.rows.len() {
            let table_name = match self.registry.bounds_at(self.table_idx) {
                Some(bounds) => bounds.name().to_string(),
                None => break,
            };
            self.builder.start_next_table(&table_name)?;
            // Tracks whether this table contributed a row to this batch;
            // a continuation resuming mid-table starts back at none.
            let mut added_this_table = false;

            while self.row_idx < self.rows[self.table_idx].len() {
                let size = self.rows[self.table_idx][self.row_idx].1.size_estimate();
                if size > self.max_batch_bytes {
                    self.done = true;
                    self.builder.abort();
                    return Err(ProtocolError::RowTooLarge {
                        table: table_name,
                        size,
                        limit: self.max_batch_bytes,
                    });
                }

                if batch_size + size > self.max_batch_bytes {
                    // Close the batch at the last id this table
                    // contributed, or at a synthetic boundary just above
                    // the table's start when it contributed nothing yet.
                    if !added_this_table {
                        let bounds = self
                            .registry
                            .bounds_at(self.table_idx)
                            .ok_or_else(|| ProtocolError::UnknownTable(table_name.clone()))?;
                        let dummy = bounds.format().increment(bounds.start())?;
                        self.builder.add_id(&table_name, dummy)?;
                    }
                    let set = self.builder.finish()?;
                    return self.yield_batch(set, batch_rows, false);
                }

                let (id, entity) = self.rows[self.table_idx][self.row_idx].clone();
                self.builder.add_id(&table_name, id)?;
                batch_rows.push(entity);
                batch_size += size;
                added_this_table = true;
                self.row_idx += 1;
            }

            self.table_idx += 1;
            self.row_idx = 0;
        }

        // All tables exhausted: the terminal batch is yielded
        // unconditionally and its knowledge reaches infinity.
        self.done = true;
        let set = self.builder.finish_last()?;
        self.yield_batch(set, batch_rows, true)
    }
}

impl Iterator for SortedBatches {
    type Item = ProtocolResult<SortedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(batch) => Some(Ok(batch)),
            Err(err) => {
                self.done = true;
                self.builder.abort();
                Some(Err(err))
            }
        }
    }
}

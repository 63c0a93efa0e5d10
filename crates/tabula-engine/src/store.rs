//! Collaborator interfaces.
//!
//! The engine never owns field definitions or cell data. Hosts plug their catalog, record
//! storage and link index in through these traits; [`crate::memory`] has in-memory versions.

use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::BuildHasher;
use tabula_model::{CellDiff, CellValue, Field, FieldId, RecordId, TableId};

/// Source of field definitions.
pub trait FieldCatalog {
    /// Live fields of `table`. Soft-deleted fields are excluded.
    fn list_fields(&self, table: &TableId) -> Vec<Field>;

    /// Resolves a field by id, including soft-deleted fields.
    fn get_field(&self, id: &FieldId) -> Option<Field>;

    /// Resolves a field only if it is still live.
    fn live_field(&self, id: &FieldId) -> Option<Field> {
        self.get_field(id).filter(|field| !field.is_deleted)
    }
}

/// Per-table record counts, the only input the cost estimator needs.
pub trait RecordCounts {
    fn count_records(&self, table: &TableId) -> usize;
}

impl<S: BuildHasher> RecordCounts for HashMap<TableId, usize, S> {
    fn count_records(&self, table: &TableId) -> usize {
        self.get(table).copied().unwrap_or(0)
    }
}

impl RecordCounts for BTreeMap<TableId, usize> {
    fn count_records(&self, table: &TableId) -> usize {
        self.get(table).copied().unwrap_or(0)
    }
}

/// Record storage and value computation.
///
/// `recompute_cells` takes `&self` so the executor can run the fields of one level
/// concurrently; writes go through `write_cells` once per field per level.
pub trait RecordStore: RecordCounts {
    fn record_ids(&self, table: &TableId) -> EngineResult<Vec<RecordId>>;

    /// Reads the cells of one field, for all records when `records` is `None`.
    fn read_cells(
        &self,
        table: &TableId,
        field: &FieldId,
        records: Option<&[RecordId]>,
    ) -> EngineResult<Vec<(RecordId, CellValue)>>;

    /// Computes the current value of `field` for `records` and returns the cells whose stored
    /// value differs. Unchanged cells must not be returned.
    fn recompute_cells(&self, field: &Field, records: &[RecordId]) -> EngineResult<Vec<CellDiff>>;

    fn write_cells(
        &mut self,
        table: &TableId,
        field: &FieldId,
        diffs: &[CellDiff],
    ) -> EngineResult<()>;

    fn begin(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn commit(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn rollback(&mut self) {}
}

/// Current foreign-key associations of link fields.
pub trait LinkResolver {
    /// Foreign records `record` currently links to through `link`.
    fn linked_records(&self, link: &Field, record: &RecordId) -> EngineResult<Vec<RecordId>>;

    /// Local records of `link`'s table whose `link` cell contains any of `foreign`.
    fn records_linking_to(
        &self,
        link: &Field,
        foreign: &[RecordId],
    ) -> EngineResult<BTreeSet<RecordId>>;

    fn record_exists(&self, table: &TableId, record: &RecordId) -> bool;
}

/// Changed cells, grouped by field. This is what flows from one plan level into the next.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<FieldId, BTreeSet<RecordId>>);

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<I>(&mut self, field: &FieldId, records: I)
    where
        I: IntoIterator<Item = RecordId>,
    {
        let mut records = records.into_iter().peekable();
        if records.peek().is_none() {
            return;
        }
        self.0.entry(field.clone()).or_default().extend(records);
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<FieldId>, records: &[RecordId]) -> Self {
        self.record(&field.into(), records.iter().cloned());
        self
    }

    pub fn merge(&mut self, other: &ChangeSet) {
        for (field, records) in &other.0 {
            self.record(field, records.iter().cloned());
        }
    }

    #[must_use]
    pub fn get(&self, field: &FieldId) -> Option<&BTreeSet<RecordId>> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldId, &BTreeSet<RecordId>)> {
        self.0.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldId> {
        self.0.keys()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of changed cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }
}

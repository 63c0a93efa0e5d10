//! In-memory collaborators, used by tests, benchmarks and embedders without storage.
//!
//! [`MemoryStore`] carries a tiny evaluator so plans can be executed end to end:
//!
//! - lookup: the non-empty values of the looked-up field on every linked record, as a list;
//! - rollup: `sum(...)` and `countall(...)` aggregate the linked values, anything else joins
//!   them as text;
//! - formula: each `{fieldId}` token is replaced by the text of the referenced cell.
//!
//! Fields flagged `has_error` compute an empty value.

use crate::error::{EngineError, EngineResult};
use crate::graph::RemovalReport;
use crate::store::{FieldCatalog, LinkResolver, RecordCounts, RecordStore};
use std::collections::{BTreeMap, BTreeSet};
use tabula_model::{CellDiff, CellValue, Field, FieldId, FieldKind, RecordId, TableId};

#[derive(Clone, Debug, Default)]
pub struct MemoryCatalog {
    fields: BTreeMap<FieldId, Field>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: Field) {
        self.fields.insert(field.id.clone(), field);
    }

    pub fn insert_all<I: IntoIterator<Item = Field>>(&mut self, fields: I) {
        for field in fields {
            self.insert(field);
        }
    }

    /// Marks a field deleted. It stays resolvable through [`FieldCatalog::get_field`].
    pub fn soft_delete(&mut self, id: &FieldId) -> bool {
        match self.fields.get_mut(id) {
            Some(field) => {
                field.is_deleted = true;
                true
            }
            None => false,
        }
    }

    pub fn set_error(&mut self, id: &FieldId, has_error: bool) {
        if let Some(field) = self.fields.get_mut(id) {
            field.has_error = has_error;
        }
    }

    /// Mirrors a graph removal: removed fields are soft-deleted, orphaned ones flagged.
    pub fn apply_removal(&mut self, report: &RemovalReport) {
        for id in &report.removed {
            self.soft_delete(id);
        }
        for id in report.errored() {
            self.set_error(&id, true);
        }
    }

    /// Hard-removes every field of `table`.
    pub fn purge_table(&mut self, table: &TableId) {
        self.fields.retain(|_, field| &field.table_id != table);
    }
}

impl FieldCatalog for MemoryCatalog {
    fn list_fields(&self, table: &TableId) -> Vec<Field> {
        self.fields
            .values()
            .filter(|f| &f.table_id == table && !f.is_deleted)
            .cloned()
            .collect()
    }

    fn get_field(&self, id: &FieldId) -> Option<Field> {
        self.fields.get(id).cloned()
    }
}

#[derive(Clone, Debug, Default)]
struct MemoryTable {
    records: Vec<RecordId>,
    cells: BTreeMap<FieldId, BTreeMap<RecordId, CellValue>>,
}

impl MemoryTable {
    fn cell(&self, field: &FieldId, record: &RecordId) -> CellValue {
        self.cells
            .get(field)
            .and_then(|cells| cells.get(record))
            .cloned()
            .unwrap_or_default()
    }
}

/// Record storage backed by ordered maps, with nested snapshot transactions.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<TableId, MemoryTable>,
    snapshots: Vec<BTreeMap<TableId, MemoryTable>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: impl Into<TableId>) {
        self.tables.entry(table.into()).or_default();
    }

    pub fn insert_record(&mut self, table: impl Into<TableId>, record: impl Into<RecordId>) {
        let record = record.into();
        let table = self.tables.entry(table.into()).or_default();
        if !table.records.contains(&record) {
            table.records.push(record);
        }
    }

    /// Writes a cell directly, bypassing planning. Use it to seed data.
    pub fn set_cell(
        &mut self,
        table: impl Into<TableId>,
        field: impl Into<FieldId>,
        record: impl Into<RecordId>,
        value: CellValue,
    ) {
        let table = self.tables.entry(table.into()).or_default();
        let cells = table.cells.entry(field.into()).or_default();
        let record = record.into();
        if value.is_empty() {
            cells.remove(&record);
        } else {
            cells.insert(record, value);
        }
    }

    #[must_use]
    pub fn cell(&self, table: &TableId, field: &FieldId, record: &RecordId) -> CellValue {
        self.tables
            .get(table)
            .map(|t| t.cell(field, record))
            .unwrap_or_default()
    }

    /// Number of open transactions.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.snapshots.len()
    }

    fn table(&self, table: &TableId) -> EngineResult<&MemoryTable> {
        self.tables
            .get(table)
            .ok_or_else(|| EngineError::Store(format!("unknown table {table}")))
    }

    fn compute(&self, field: &Field, record: &RecordId) -> EngineResult<CellValue> {
        if field.has_error {
            return Ok(CellValue::Empty);
        }
        let table = self.table(&field.table_id)?;
        match &field.kind {
            FieldKind::Normal | FieldKind::Link(_) => Ok(table.cell(&field.id, record)),
            FieldKind::Lookup(options) => {
                let values = self.linked_values(
                    table,
                    &options.link_field_id,
                    &options.foreign_table_id,
                    &options.lookup_field_id,
                    record,
                )?;
                Ok(if values.is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::List(values)
                })
            }
            FieldKind::Rollup(options) => {
                let values = self.linked_values(
                    table,
                    &options.link_field_id,
                    &options.foreign_table_id,
                    &options.lookup_field_id,
                    record,
                )?;
                Ok(aggregate(&options.expression, values))
            }
            FieldKind::Formula(options) => {
                let mut text = options.expression.clone();
                for reference in field.references() {
                    let value = table.cell(&reference, record).to_string();
                    text = text.replace(&format!("{{{reference}}}"), &value);
                }
                Ok(if text.is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(text)
                })
            }
        }
    }

    fn linked_values(
        &self,
        table: &MemoryTable,
        link: &FieldId,
        foreign_table: &TableId,
        lookup: &FieldId,
        record: &RecordId,
    ) -> EngineResult<Vec<CellValue>> {
        let foreign = self.table(foreign_table)?;
        let mut values = Vec::new();
        for id in table.cell(link, record).links() {
            match foreign.cell(lookup, id) {
                CellValue::List(inner) => values.extend(inner),
                value if value.is_empty() => {}
                value => values.push(value),
            }
        }
        Ok(values)
    }
}

fn aggregate(expression: &str, values: Vec<CellValue>) -> CellValue {
    let function = expression.trim_start().to_ascii_lowercase();
    if function.starts_with("sum(") {
        let total: f64 = values.iter().filter_map(CellValue::as_number).sum();
        CellValue::Number(total)
    } else if function.starts_with("countall(") {
        CellValue::Number(values.len() as f64)
    } else if values.is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(CellValue::List(values).to_string())
    }
}

impl RecordCounts for MemoryStore {
    fn count_records(&self, table: &TableId) -> usize {
        self.tables.get(table).map_or(0, |t| t.records.len())
    }
}

impl RecordStore for MemoryStore {
    fn record_ids(&self, table: &TableId) -> EngineResult<Vec<RecordId>> {
        Ok(self.table(table)?.records.clone())
    }

    fn read_cells(
        &self,
        table: &TableId,
        field: &FieldId,
        records: Option<&[RecordId]>,
    ) -> EngineResult<Vec<(RecordId, CellValue)>> {
        let table = self.table(table)?;
        let records = records.unwrap_or(&table.records);
        Ok(records
            .iter()
            .map(|record| (record.clone(), table.cell(field, record)))
            .collect())
    }

    fn recompute_cells(&self, field: &Field, records: &[RecordId]) -> EngineResult<Vec<CellDiff>> {
        let table = self.table(&field.table_id)?;
        let mut diffs = Vec::new();
        for record in records {
            if !table.records.contains(record) {
                continue;
            }
            let old = table.cell(&field.id, record);
            let new = self.compute(field, record)?;
            if old != new {
                diffs.push(CellDiff::new(record.clone(), old, new));
            }
        }
        Ok(diffs)
    }

    fn write_cells(
        &mut self,
        table: &TableId,
        field: &FieldId,
        diffs: &[CellDiff],
    ) -> EngineResult<()> {
        let Some(table) = self.tables.get_mut(table) else {
            return Err(EngineError::Store(format!("unknown table {table}")));
        };
        let cells = table.cells.entry(field.clone()).or_default();
        for diff in diffs {
            if diff.new.is_empty() {
                cells.remove(&diff.record_id);
            } else {
                cells.insert(diff.record_id.clone(), diff.new.clone());
            }
        }
        Ok(())
    }

    fn begin(&mut self) -> EngineResult<()> {
        self.snapshots.push(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> EngineResult<()> {
        match self.snapshots.pop() {
            Some(_) => Ok(()),
            None => Err(EngineError::Store("commit without an open transaction".to_string())),
        }
    }

    fn rollback(&mut self) {
        if let Some(snapshot) = self.snapshots.pop() {
            self.tables = snapshot;
        }
    }
}

impl LinkResolver for MemoryStore {
    fn linked_records(&self, link: &Field, record: &RecordId) -> EngineResult<Vec<RecordId>> {
        Ok(self
            .cell(&link.table_id, &link.id, record)
            .links()
            .to_vec())
    }

    fn records_linking_to(
        &self,
        link: &Field,
        foreign: &[RecordId],
    ) -> EngineResult<BTreeSet<RecordId>> {
        let table = self.table(&link.table_id)?;
        let Some(cells) = table.cells.get(&link.id) else {
            return Ok(BTreeSet::new());
        };
        Ok(cells
            .iter()
            .filter(|(_, value)| value.links().iter().any(|id| foreign.contains(id)))
            .map(|(record, _)| record.clone())
            .collect())
    }

    fn record_exists(&self, table: &TableId, record: &RecordId) -> bool {
        self.tables
            .get(table)
            .is_some_and(|t| t.records.contains(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rollback_restores_the_last_snapshot() {
        let mut store = MemoryStore::new();
        store.insert_record("tblA", "rec1");
        store.set_cell("tblA", "fldT", "rec1", "before".into());

        store.begin().unwrap();
        store
            .write_cells(
                &"tblA".into(),
                &"fldT".into(),
                &[CellDiff::new("rec1", "before".into(), "after".into())],
            )
            .unwrap();
        let cell = |store: &MemoryStore| store.cell(&"tblA".into(), &"fldT".into(), &"rec1".into());
        assert_eq!(cell(&store), CellValue::from("after"));
        store.rollback();

        assert_eq!(cell(&store), CellValue::from("before"));
        assert_eq!(store.depth(), 0);
    }

    #[test]
    fn rollups_aggregate_linked_values() {
        let mut store = MemoryStore::new();
        store.insert_record("tblA", "rec1");
        for (id, amount) in [("b1", 2.0), ("b2", 3.5)] {
            store.insert_record("tblB", id);
            store.set_cell("tblB", "fldAmount", id, amount.into());
        }
        store.set_cell(
            "tblA",
            "fldL",
            "rec1",
            CellValue::Links(vec!["b1".into(), "b2".into()]),
        );

        let sum = Field::rollup("fldS", "tblA", "S", "fldL", "tblB", "fldAmount", "sum({values})");
        let count =
            Field::rollup("fldC", "tblA", "C", "fldL", "tblB", "fldAmount", "countall({values})");
        let record = RecordId::from("rec1");
        assert_eq!(store.compute(&sum, &record).unwrap(), CellValue::Number(5.5));
        assert_eq!(store.compute(&count, &record).unwrap(), CellValue::Number(2.0));
    }

    #[test]
    fn formulas_substitute_referenced_cells() {
        let mut store = MemoryStore::new();
        store.insert_record("tblA", "rec1");
        store.set_cell("tblA", "fldT", "rec1", "x".into());
        store.set_cell("tblA", "fldU", "rec1", 2.0.into());

        let formula = Field::formula("fldF", "tblA", "F", "{fldT}-{fldU}");
        let diffs = store
            .recompute_cells(&formula, &[RecordId::from("rec1")])
            .unwrap();
        assert_eq!(diffs, vec![CellDiff::new("rec1", CellValue::Empty, "x-2".into())]);

        let mut errored = formula.clone();
        errored.has_error = true;
        assert_eq!(
            store.compute(&errored, &"rec1".into()).unwrap(),
            CellValue::Empty
        );
    }
}

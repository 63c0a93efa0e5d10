//! Link symmetry maintenance.
//!
//! Writing a link cell on one side of a two-way link must produce the mirrored change on the
//! symmetric field of every foreign record that gained or lost the local record. The maintainer
//! validates a batch of writes against an overlay of the cells it has already touched, and only
//! then hands back diffs; it never writes to the store itself.

use crate::error::{EngineError, EngineResult};
use crate::graph::ReferenceGraph;
use crate::store::{ChangeSet, LinkResolver};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tabula_model::{CellDiff, CellValue, Field, FieldId, RecordId, TableId};

/// Replace the contents of one link cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkWrite {
    pub field_id: FieldId,
    pub record_id: RecordId,
    pub foreign_ids: Vec<RecordId>,
}

impl LinkWrite {
    pub fn new<I, R>(
        field_id: impl Into<FieldId>,
        record_id: impl Into<RecordId>,
        foreign_ids: I,
    ) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RecordId>,
    {
        Self {
            field_id: field_id.into(),
            record_id: record_id.into(),
            foreign_ids: foreign_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// Changed cells of one field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiffs {
    pub field_id: FieldId,
    pub table_id: TableId,
    pub diffs: Vec<CellDiff>,
}

/// Result of a single link write.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkWriteDiff {
    pub self_diff: CellDiff,
    /// `None` for one-way links.
    pub symmetric_field_id: Option<FieldId>,
    pub symmetric_diffs: Vec<CellDiff>,
}

/// Result of a batch of link writes: the cells to write and the change set to plan from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinkChangeSet {
    pub writes: Vec<FieldDiffs>,
    pub changes: ChangeSet,
}

impl LinkChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    #[must_use]
    pub fn diffs_for(&self, field: &FieldId) -> &[CellDiff] {
        self.writes
            .iter()
            .find(|w| &w.field_id == field)
            .map_or(&[][..], |w| w.diffs.as_slice())
    }
}

type CellKey = (FieldId, RecordId);

/// One batch of link writes.
///
/// Cells touched by the batch live in an overlay so that later writes see earlier ones (a
/// record claimed twice in the same batch is a duplicate, mirrored cells are merged).
pub struct LinkTransaction<'a, R: LinkResolver + ?Sized> {
    graph: &'a ReferenceGraph,
    resolver: &'a R,
    pending_records: BTreeSet<RecordId>,
    overlay: BTreeMap<CellKey, Vec<RecordId>>,
    original: BTreeMap<CellKey, Vec<RecordId>>,
    written: BTreeSet<CellKey>,
}

impl<'a, R: LinkResolver + ?Sized> LinkTransaction<'a, R> {
    pub fn new(graph: &'a ReferenceGraph, resolver: &'a R) -> Self {
        Self {
            graph,
            resolver,
            pending_records: BTreeSet::new(),
            overlay: BTreeMap::new(),
            original: BTreeMap::new(),
            written: BTreeSet::new(),
        }
    }

    /// Records created by the same batch. They count as existing link targets.
    #[must_use]
    pub fn with_pending_records<I>(mut self, records: I) -> Self
    where
        I: IntoIterator<Item = RecordId>,
    {
        self.pending_records.extend(records);
        self
    }

    pub fn write(&mut self, write: &LinkWrite) -> EngineResult<()> {
        let graph = self.graph;
        let Some(field) = graph.field(&write.field_id) else {
            return Err(EngineError::UnknownField(write.field_id.clone()));
        };
        let Some(options) = field.link_options() else {
            return Err(EngineError::invalid(&field.id, "not a link field"));
        };

        let key = (field.id.clone(), write.record_id.clone());
        if !self.written.insert(key) {
            return Err(EngineError::invalid(
                &field.id,
                format!("record {} is written twice in one batch", write.record_id),
            ));
        }

        let mut next: Vec<RecordId> = Vec::with_capacity(write.foreign_ids.len());
        for id in &write.foreign_ids {
            if !next.contains(id) {
                next.push(id.clone());
            }
        }

        if !options.relationship.is_multiple_value() && next.len() > 1 {
            return Err(EngineError::LinkCardinality {
                field: field.id.clone(),
                record: write.record_id.clone(),
                count: next.len(),
            });
        }

        for id in &next {
            if !self.pending_records.contains(id)
                && !self.resolver.record_exists(&options.foreign_table_id, id)
            {
                return Err(EngineError::invalid(
                    &field.id,
                    format!(
                        "record {id} does not exist in table {}",
                        options.foreign_table_id
                    ),
                ));
            }
        }

        let previous = self.current(field, &write.record_id)?;

        if options.relationship.foreign_is_unique() {
            for id in next.iter().filter(|id| !previous.contains(id)) {
                if let Some(claimed_by) = self.claimant(field, id, &write.record_id)? {
                    return Err(EngineError::DuplicateLink {
                        field: field.id.clone(),
                        foreign_record: id.clone(),
                        claimed_by,
                    });
                }
            }
        }

        self.set(&field.id, &write.record_id, previous.clone(), next.clone());

        let Some(symmetric_id) = &options.symmetric_field_id else {
            return Ok(());
        };
        let Some(symmetric) = graph.field(symmetric_id) else {
            return Err(EngineError::UnknownField(symmetric_id.clone()));
        };
        let symmetric_multi = symmetric.is_multiple_value();

        for removed in previous.iter().filter(|id| !next.contains(id)) {
            let before = self.current(symmetric, removed)?;
            let mut after = before.clone();
            after.retain(|r| r != &write.record_id);
            self.set(symmetric_id, removed, before, after);
        }

        for added in next.iter().filter(|id| !previous.contains(id)) {
            let before = self.current(symmetric, added)?;
            let after = if symmetric_multi {
                let mut after = before.clone();
                if !after.contains(&write.record_id) {
                    after.push(write.record_id.clone());
                }
                after
            } else {
                vec![write.record_id.clone()]
            };
            self.set(symmetric_id, added, before, after);
        }

        Ok(())
    }

    /// Produces the diffs of every cell whose contents changed, grouped by field.
    #[must_use]
    pub fn finish(self) -> LinkChangeSet {
        let mut grouped: BTreeMap<FieldId, Vec<CellDiff>> = BTreeMap::new();
        let mut changes = ChangeSet::new();

        for ((field, record), before) in self.original {
            let Some(after) = self.overlay.get(&(field.clone(), record.clone())) else {
                continue;
            };
            if &before == after {
                continue;
            }
            changes.record(&field, [record.clone()]);
            grouped.entry(field).or_default().push(CellDiff::new(
                record,
                CellValue::from_links(before),
                CellValue::from_links(after.clone()),
            ));
        }

        let writes = grouped
            .into_iter()
            .filter_map(|(field_id, diffs)| {
                let table_id = self.graph.table_of(&field_id)?.clone();
                Some(FieldDiffs {
                    field_id,
                    table_id,
                    diffs,
                })
            })
            .collect();

        LinkChangeSet { writes, changes }
    }

    fn current(&self, field: &Field, record: &RecordId) -> EngineResult<Vec<RecordId>> {
        match self.overlay.get(&(field.id.clone(), record.clone())) {
            Some(value) => Ok(value.clone()),
            None => self.resolver.linked_records(field, record),
        }
    }

    fn set(
        &mut self,
        field: &FieldId,
        record: &RecordId,
        before: Vec<RecordId>,
        after: Vec<RecordId>,
    ) {
        let key = (field.clone(), record.clone());
        self.original.entry(key.clone()).or_insert(before);
        self.overlay.insert(key, after);
    }

    /// A local record other than `record` that currently links to `foreign`.
    fn claimant(
        &self,
        field: &Field,
        foreign: &RecordId,
        record: &RecordId,
    ) -> EngineResult<Option<RecordId>> {
        let mut candidates = self
            .resolver
            .records_linking_to(field, std::slice::from_ref(foreign))?;
        candidates.extend(
            self.overlay
                .keys()
                .filter(|(f, _)| f == &field.id)
                .map(|(_, r)| r.clone()),
        );

        for candidate in candidates {
            if &candidate == record {
                continue;
            }
            if self.current(field, &candidate)?.contains(foreign) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

/// Validates and mirrors a batch of link writes. Fails as a whole: no diffs on error.
pub fn apply_link_writes<R: LinkResolver + ?Sized>(
    graph: &ReferenceGraph,
    resolver: &R,
    writes: &[LinkWrite],
    pending_records: &[RecordId],
) -> EngineResult<LinkChangeSet> {
    let mut tx = LinkTransaction::new(graph, resolver)
        .with_pending_records(pending_records.iter().cloned());
    for write in writes {
        tx.write(write)?;
    }
    let changes = tx.finish();
    log::debug!(
        "link batch of {} write(s) touched {} cell(s)",
        writes.len(),
        changes.changes.cell_count()
    );
    Ok(changes)
}

/// Validates and mirrors a single link write.
pub fn apply_link_write<R: LinkResolver + ?Sized>(
    graph: &ReferenceGraph,
    resolver: &R,
    write: &LinkWrite,
) -> EngineResult<LinkWriteDiff> {
    let symmetric_field_id = graph
        .field(&write.field_id)
        .and_then(Field::symmetric_field_id)
        .cloned();
    let mut changes = apply_link_writes(graph, resolver, std::slice::from_ref(write), &[])?;

    let self_diff = match changes.writes.iter().position(|w| w.field_id == write.field_id) {
        Some(idx) => {
            let mut diffs = changes.writes.remove(idx).diffs;
            match diffs.iter().position(|d| d.record_id == write.record_id) {
                Some(pos) => diffs.remove(pos),
                None => unchanged(resolver, graph, write)?,
            }
        }
        None => unchanged(resolver, graph, write)?,
    };

    let symmetric_diffs = symmetric_field_id
        .as_ref()
        .map(|id| changes.diffs_for(id).to_vec())
        .unwrap_or_default();

    Ok(LinkWriteDiff {
        self_diff,
        symmetric_field_id,
        symmetric_diffs,
    })
}

fn unchanged<R: LinkResolver + ?Sized>(
    resolver: &R,
    graph: &ReferenceGraph,
    write: &LinkWrite,
) -> EngineResult<CellDiff> {
    let Some(field) = graph.field(&write.field_id) else {
        return Err(EngineError::UnknownField(write.field_id.clone()));
    };
    let value = CellValue::from_links(resolver.linked_records(field, &write.record_id)?);
    Ok(CellDiff::new(write.record_id.clone(), value.clone(), value))
}

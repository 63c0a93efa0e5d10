//! Level-by-level plan execution against a record store.

use crate::error::EngineResult;
use crate::parallel;
use crate::planner::{ChangeKind, ComputationPlan};
use crate::settings::{ComputeSettings, RecalcMode};
use crate::store::{ChangeSet, FieldCatalog, LinkResolver, RecordStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tabula_model::{CellDiff, Field, FieldId, RecordId};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelReport {
    pub level: usize,
    /// Fields that wrote at least one cell.
    pub fields: Vec<FieldId>,
    pub written_cells: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub levels: Vec<LevelReport>,
    /// Plan fields the catalog no longer resolves as live.
    pub skipped: Vec<FieldId>,
    /// Every changed cell, the seed included.
    pub changes: ChangeSet,
    pub written_cells: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PlanExecutor {
    mode: RecalcMode,
}

impl PlanExecutor {
    #[must_use]
    pub fn new(mode: RecalcMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub fn from_settings(settings: &ComputeSettings) -> Self {
        Self::new(settings.recalc_mode)
    }

    /// Runs `plan` inside one store transaction.
    ///
    /// `seed` holds the cells already written by the mutation that produced the plan (written
    /// cells, mirrored link cells). The plan either commits fully or is rolled back.
    pub fn execute<S>(
        &self,
        plan: &ComputationPlan,
        seed: &ChangeSet,
        catalog: &dyn FieldCatalog,
        store: &mut S,
    ) -> EngineResult<ExecutionReport>
    where
        S: RecordStore + LinkResolver + Sync + ?Sized,
    {
        store.begin()?;
        let report = match self.run(plan, seed, catalog, store) {
            Ok(report) => report,
            Err(err) => {
                store.rollback();
                return Err(err);
            }
        };
        if let Err(err) = store.commit() {
            store.rollback();
            return Err(err);
        }

        log::debug!(
            "executed {:?} plan: {} cell(s) written over {} level(s), {} field(s) skipped",
            plan.change,
            report.written_cells,
            report.levels.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn run<S>(
        &self,
        plan: &ComputationPlan,
        seed: &ChangeSet,
        catalog: &dyn FieldCatalog,
        store: &mut S,
    ) -> EngineResult<ExecutionReport>
    where
        S: RecordStore + LinkResolver + Sync + ?Sized,
    {
        let mut report = ExecutionReport {
            changes: seed.clone(),
            ..ExecutionReport::default()
        };

        for (level, ids) in plan.levels.iter().enumerate() {
            let mut jobs: Vec<(Field, Vec<RecordId>)> = Vec::new();
            for id in ids {
                let Some(field) = catalog.live_field(id) else {
                    log::debug!("skipping field {id}: no longer live");
                    report.skipped.push(id.clone());
                    continue;
                };
                if !field.is_computed() || field.is_link() {
                    continue;
                }
                let records =
                    records_to_recompute(plan, &field, &report.changes, catalog, &*store)?;
                if !records.is_empty() {
                    jobs.push((field, records));
                }
            }

            let shared: &S = store;
            let results = parallel::map_level(self.mode, &jobs, |(field, records)| {
                shared.recompute_cells(field, records)
            });

            let mut level_report = LevelReport {
                level,
                ..LevelReport::default()
            };
            for ((field, _), result) in jobs.iter().zip(results) {
                let diffs: Vec<CellDiff> =
                    result?.into_iter().filter(|d| !d.is_noop()).collect();
                if diffs.is_empty() {
                    continue;
                }
                store.write_cells(&field.table_id, &field.id, &diffs)?;
                report
                    .changes
                    .record(&field.id, diffs.iter().map(|d| d.record_id.clone()));
                level_report.fields.push(field.id.clone());
                level_report.written_cells += diffs.len();
            }

            report.written_cells += level_report.written_cells;
            report.levels.push(level_report);
        }

        Ok(report)
    }
}

/// Records of `field` that may have changed given the cells changed so far.
///
/// Definition changes recompute every record. Cell writes only reach the records linked to a
/// changed cell: the same record for same-table precedents and for the link itself, and the
/// records linking to a changed foreign record for a looked-up field.
fn records_to_recompute<S>(
    plan: &ComputationPlan,
    field: &Field,
    changes: &ChangeSet,
    catalog: &dyn FieldCatalog,
    store: &S,
) -> EngineResult<Vec<RecordId>>
where
    S: RecordStore + LinkResolver + ?Sized,
{
    if plan.change != ChangeKind::CellWrite {
        return store.record_ids(&field.table_id);
    }

    let via_link = field.via_link();
    let mut records: BTreeSet<RecordId> = BTreeSet::new();
    for precedent in field.references() {
        let Some(changed) = changes.get(&precedent) else {
            continue;
        };
        match via_link {
            Some(link) if link == &precedent => records.extend(changed.iter().cloned()),
            Some(link) => {
                let Some(link) = catalog.get_field(link) else {
                    continue;
                };
                let foreign: Vec<RecordId> = changed.iter().cloned().collect();
                records.extend(store.records_linking_to(&link, &foreign)?);
            }
            None => records.extend(changed.iter().cloned()),
        }
    }

    Ok(records.into_iter().collect())
}

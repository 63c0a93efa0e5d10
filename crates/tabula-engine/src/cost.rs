use crate::planner::ComputationPlan;
use crate::settings::ComputeSettings;
use crate::store::RecordCounts;
use serde::{Deserialize, Serialize};

/// Estimated size of a plan, in cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    /// Cells the plan recomputes or writes.
    pub update_cell_count: usize,
    /// Cells of every field participating in the plan, sources included.
    pub total_cell_count: usize,
    /// Whether the plan must be deferred instead of run inline.
    pub is_async: bool,
}

#[derive(Clone, Debug)]
pub struct CostEstimator {
    settings: ComputeSettings,
}

impl CostEstimator {
    #[must_use]
    pub fn new(settings: &ComputeSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ComputeSettings {
        &self.settings
    }

    #[must_use]
    pub fn estimate(&self, plan: &ComputationPlan, counts: &dyn RecordCounts) -> CostEstimate {
        let mut total_cell_count = 0usize;
        let mut update_cell_count = 0usize;

        for (table, fields) in &plan.graph.combos {
            let records = counts.count_records(table);
            total_cell_count =
                total_cell_count.saturating_add(records.saturating_mul(fields.len()));
            for field in fields {
                if plan.contains(field) {
                    let cells = plan.scope_of(field).cells(records);
                    update_cell_count = update_cell_count.saturating_add(cells);
                }
            }
        }

        CostEstimate {
            update_cell_count,
            total_cell_count,
            is_async: self.settings.is_async(update_cell_count),
        }
    }

    /// Stores the estimate on the plan and returns it.
    pub fn annotate(&self, plan: &mut ComputationPlan, counts: &dyn RecordCounts) -> CostEstimate {
        let cost = self.estimate(plan, counts);
        if cost.is_async {
            log::debug!(
                "plan updates {} cells (limit {}), deferring",
                cost.update_cell_count,
                self.settings.max_sync_cell_count
            );
        }
        plan.cost = cost;
        cost
    }
}

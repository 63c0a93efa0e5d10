//! Deferred execution.
//!
//! Plans too large to run inline are handed to a [`PlanSink`] as messages. Whoever drains the
//! sink re-executes them; execution is idempotent, so a plan may be retried after a failure.

use crate::error::{EngineError, EngineResult};
use crate::executor::ExecutionReport;
use crate::planner::ComputationPlan;
use crate::store::ChangeSet;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedPlan {
    pub plan: ComputationPlan,
    /// Cells already written by the mutation that produced the plan.
    pub seed: ChangeSet,
    pub attempts: u32,
}

impl QueuedPlan {
    #[must_use]
    pub fn new(plan: ComputationPlan, seed: ChangeSet) -> Self {
        Self {
            plan,
            seed,
            attempts: 0,
        }
    }

    /// Marks another delivery attempt.
    #[must_use]
    pub fn retry(mut self) -> Self {
        self.attempts = self.attempts.saturating_add(1);
        self
    }
}

/// Destination for deferred plans.
pub trait PlanSink {
    fn enqueue(&mut self, plan: QueuedPlan) -> EngineResult<()>;
}

impl PlanSink for Vec<QueuedPlan> {
    fn enqueue(&mut self, plan: QueuedPlan) -> EngineResult<()> {
        self.push(plan);
        Ok(())
    }
}

impl PlanSink for mpsc::Sender<QueuedPlan> {
    fn enqueue(&mut self, plan: QueuedPlan) -> EngineResult<()> {
        self.send(plan)
            .map_err(|_| EngineError::Store("plan queue closed".to_string()))
    }
}

/// What happened to a plan handed to [`crate::ComputeEngine::dispatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Applied(ExecutionReport),
    Deferred { update_cell_count: usize },
}

impl Dispatch {
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Dispatch::Deferred { .. })
    }

    #[must_use]
    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            Dispatch::Applied(report) => Some(report),
            Dispatch::Deferred { .. } => None,
        }
    }
}

use serde::{Deserialize, Serialize};

/// How the executor schedules the fields of one plan level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecalcMode {
    SingleThreaded,
    /// Fields of one level are recomputed in parallel when the `parallel` feature is enabled.
    #[default]
    MultiThreaded,
}

/// Engine-wide computation settings.
///
/// The synchronous budget has no default; hosts inject it through [`ComputeSettings::new`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeSettings {
    /// Plans that would update more cells than this are deferred to a background executor.
    pub max_sync_cell_count: usize,
    #[serde(default)]
    pub recalc_mode: RecalcMode,
}

impl ComputeSettings {
    #[must_use]
    pub fn new(max_sync_cell_count: usize) -> Self {
        Self {
            max_sync_cell_count,
            recalc_mode: RecalcMode::default(),
        }
    }

    #[must_use]
    pub fn with_recalc_mode(mut self, recalc_mode: RecalcMode) -> Self {
        self.recalc_mode = recalc_mode;
        self
    }

    /// Whether updating `update_cell_count` cells exceeds the synchronous budget.
    #[must_use]
    pub fn is_async(&self, update_cell_count: usize) -> bool {
        update_cell_count > self.max_sync_cell_count
    }
}

#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Dependency tracking and recomputation planning for computed fields.
//!
//! Formulas, lookups, rollups and the two sides of a link read other fields, possibly across
//! tables. [`ComputeEngine`] keeps those references in a [`graph::ReferenceGraph`], rejects
//! definitions that would close a cycle, and turns every mutation (field create/update/delete,
//! cell writes) into a [`ComputationPlan`]: the affected fields grouped into dependency levels
//! and annotated with an estimated cell count.
//!
//! Small plans run inline through [`PlanExecutor`], level by level, against a host
//! [`RecordStore`]. Plans over the configured [`ComputeSettings::max_sync_cell_count`] are handed
//! to a [`PlanSink`] instead.
//!
//! ## Links
//!
//! Writing a two-way link cell also changes the symmetric field of the foreign records it gains
//! or loses. [`link::apply_link_writes`] validates a batch of link writes (cardinality,
//! uniqueness, existing targets) and returns both sides' diffs without writing anything;
//! [`ComputeEngine::write_links`] applies them and dispatches the resulting plan.
//!
//! The engine owns no data. Hosts implement [`FieldCatalog`], [`RecordStore`] and
//! [`LinkResolver`]; [`memory`] has in-memory versions.

pub mod cost;
mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod link;
pub mod memory;
mod parallel;
pub mod planner;
pub mod queue;
pub mod settings;
pub mod store;

pub use crate::cost::{CostEstimate, CostEstimator};
pub use crate::engine::{ComputeEngine, FieldDeletePlan, FieldUpdatePlan, LinkWriteOutcome};
pub use crate::error::{EngineError, EngineResult, OrphanedReference};
pub use crate::executor::{ExecutionReport, LevelReport, PlanExecutor};
pub use crate::graph::{CyclePath, ReferenceGraph, RemovalReport};
pub use crate::link::{FieldDiffs, LinkChangeSet, LinkWrite, LinkWriteDiff};
pub use crate::planner::{CellScope, ChangeKind, ComputationPlan, PlanGraph};
pub use crate::queue::{Dispatch, PlanSink, QueuedPlan};
pub use crate::settings::{ComputeSettings, RecalcMode};
pub use crate::store::{ChangeSet, FieldCatalog, LinkResolver, RecordCounts, RecordStore};

pub use tabula_model as model;

use crate::cost::CostEstimator;
use crate::error::{EngineError, EngineResult};
use crate::executor::{ExecutionReport, PlanExecutor};
use crate::graph::{ReferenceGraph, RemovalReport};
use crate::link::{self, LinkChangeSet, LinkWrite, LinkWriteDiff};
use crate::planner::{plan_for, CellScope, ChangeKind, ComputationPlan};
use crate::queue::{Dispatch, PlanSink, QueuedPlan};
use crate::settings::ComputeSettings;
use crate::store::{ChangeSet, FieldCatalog, LinkResolver, RecordCounts, RecordStore};
use std::collections::{BTreeMap, BTreeSet};
use tabula_model::{Field, FieldId, RecordId, TableId};

/// Outcome of [`ComputeEngine::plan_field_update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldUpdatePlan {
    /// The new definition computes the same thing (e.g. a rename). It was stored; nothing to run.
    Skip,
    Plan(ComputationPlan),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDeletePlan {
    /// Recomputes the fields that lost a reference.
    pub plan: ComputationPlan,
    pub removal: RemovalReport,
}

/// Outcome of [`ComputeEngine::write_links`].
#[derive(Clone, Debug, PartialEq)]
pub struct LinkWriteOutcome {
    pub links: LinkChangeSet,
    pub dispatch: Dispatch,
}

/// Owns the reference graph and turns mutations into cost-annotated plans.
#[derive(Debug, Clone)]
pub struct ComputeEngine {
    graph: ReferenceGraph,
    settings: ComputeSettings,
    estimator: CostEstimator,
}

impl ComputeEngine {
    #[must_use]
    pub fn new(settings: ComputeSettings) -> Self {
        Self::with_graph(ReferenceGraph::new(), settings)
    }

    #[must_use]
    pub fn with_graph(graph: ReferenceGraph, settings: ComputeSettings) -> Self {
        let estimator = CostEstimator::new(&settings);
        Self {
            graph,
            settings,
            estimator,
        }
    }

    /// Loads the live fields of `tables`, plus any live field they reference elsewhere.
    ///
    /// Stored definitions are trusted: references to missing fields are dropped with a warning
    /// and the referencing field is flagged `has_error`. Cycles are still rejected.
    pub fn from_catalog(
        catalog: &dyn FieldCatalog,
        tables: &[TableId],
        settings: ComputeSettings,
    ) -> EngineResult<Self> {
        let mut fields: BTreeMap<FieldId, Field> = BTreeMap::new();
        for table in tables {
            for field in catalog.list_fields(table) {
                fields.insert(field.id.clone(), field);
            }
        }

        let mut frontier: Vec<FieldId> = fields
            .values()
            .flat_map(|f| f.references().into_iter().chain(f.symmetric_field_id().cloned()))
            .collect();
        while let Some(id) = frontier.pop() {
            if fields.contains_key(&id) {
                continue;
            }
            let Some(field) = catalog.live_field(&id) else {
                continue;
            };
            frontier.extend(field.references());
            frontier.extend(field.symmetric_field_id().cloned());
            fields.insert(id, field);
        }

        let (graph, orphans) = ReferenceGraph::from_fields(fields.into_values())?;
        for orphan in &orphans {
            log::warn!(
                "field {} references missing field {}; marking it as errored",
                orphan.field,
                orphan.missing
            );
        }
        Ok(Self::with_graph(graph, settings))
    }

    #[must_use]
    pub fn graph(&self) -> &ReferenceGraph {
        &self.graph
    }

    #[must_use]
    pub fn settings(&self) -> &ComputeSettings {
        &self.settings
    }

    #[must_use]
    pub fn field(&self, id: &FieldId) -> Option<&Field> {
        self.graph.field(id)
    }

    pub fn plan_field_create(
        &mut self,
        table: &TableId,
        field: Field,
        counts: &dyn RecordCounts,
    ) -> EngineResult<ComputationPlan> {
        self.plan_fields_create(table, vec![field], counts)
    }

    /// Adds a batch of fields as one mutation, e.g. both sides of a new two-way link together
    /// with a lookup through it.
    ///
    /// Every field must belong to `table`, except the symmetric side of a link created in the
    /// same batch.
    pub fn plan_fields_create(
        &mut self,
        table: &TableId,
        fields: Vec<Field>,
        counts: &dyn RecordCounts,
    ) -> EngineResult<ComputationPlan> {
        let mut seen: BTreeSet<&FieldId> = BTreeSet::new();
        for field in &fields {
            if !seen.insert(&field.id) || self.graph.contains(&field.id) {
                return Err(EngineError::invalid(&field.id, "field id is already in use"));
            }
            let symmetric_of_batch_link = fields.iter().any(|other| {
                &other.table_id == table && other.symmetric_field_id() == Some(&field.id)
            });
            if &field.table_id != table && !symmetric_of_batch_link {
                return Err(table_mismatch(&field.id, &field.table_id, table));
            }
        }

        let roots: Vec<FieldId> = fields.iter().map(|f| f.id.clone()).collect();
        self.graph.add_fields(fields)?;
        log::debug!("created {} field(s) in table {table}", roots.len());

        let roots = roots.into_iter().map(|id| (id, CellScope::AllRecords));
        self.plan(roots, ChangeKind::Create, counts)
    }

    /// Replaces the definition of `field_id`.
    ///
    /// A definition that computes the same values (a rename) is stored without a plan.
    /// Otherwise the field and everything downstream of it is recomputed.
    pub fn plan_field_update(
        &mut self,
        table: &TableId,
        field_id: &FieldId,
        definition: Field,
        counts: &dyn RecordCounts,
    ) -> EngineResult<FieldUpdatePlan> {
        if &definition.id != field_id {
            return Err(EngineError::invalid(
                field_id,
                format!("definition carries a different id {}", definition.id),
            ));
        }
        let Some(current) = self.graph.field(field_id) else {
            return Err(EngineError::UnknownField(field_id.clone()));
        };
        if &current.table_id != table {
            return Err(table_mismatch(field_id, &current.table_id, table));
        }

        if current.same_computation(&definition) {
            self.graph.update_metadata(definition)?;
            return Ok(FieldUpdatePlan::Skip);
        }

        self.graph.add_or_replace_field(definition)?;

        let mut roots = self.graph.dependent_closure([field_id]);
        roots.insert(field_id.clone());
        let roots = roots.into_iter().map(|id| (id, CellScope::AllRecords));
        self.plan(roots, ChangeKind::Update, counts)
            .map(FieldUpdatePlan::Plan)
    }

    /// Removes `field_id` (cascading per [`ReferenceGraph::remove_field_cascade`]) and plans the
    /// recomputation of the fields that lost a reference.
    ///
    /// Hosts apply `removal` to their catalog: removed fields are soft-deleted, errored ones
    /// get `has_error`.
    pub fn plan_field_delete(
        &mut self,
        table: &TableId,
        field_id: &FieldId,
        counts: &dyn RecordCounts,
    ) -> EngineResult<FieldDeletePlan> {
        let Some(current) = self.graph.field(field_id) else {
            return Err(EngineError::UnknownField(field_id.clone()));
        };
        if &current.table_id != table {
            return Err(table_mismatch(field_id, &current.table_id, table));
        }

        let removal = self.graph.remove_field_cascade(field_id)?;
        let roots = removal
            .errored()
            .into_iter()
            .filter(|id| self.graph.contains(id))
            .map(|id| (id, CellScope::AllRecords))
            .collect::<Vec<_>>();
        let plan = self.plan(roots, ChangeKind::Delete, counts)?;
        Ok(FieldDeletePlan { plan, removal })
    }

    pub fn plan_cell_write(
        &self,
        table: &TableId,
        field_id: &FieldId,
        records: &[RecordId],
        counts: &dyn RecordCounts,
    ) -> EngineResult<ComputationPlan> {
        self.plan_cells_write(table, std::slice::from_ref(field_id), records, counts)
    }

    /// Plans the recomputation after `records` had their `fields` cells written.
    pub fn plan_cells_write(
        &self,
        table: &TableId,
        fields: &[FieldId],
        records: &[RecordId],
        counts: &dyn RecordCounts,
    ) -> EngineResult<ComputationPlan> {
        let distinct: BTreeSet<&RecordId> = records.iter().collect();
        let scope = CellScope::Records(distinct.len());

        let mut roots = Vec::with_capacity(fields.len());
        for id in fields {
            let Some(field) = self.graph.field(id) else {
                return Err(EngineError::UnknownField(id.clone()));
            };
            if &field.table_id != table {
                return Err(table_mismatch(id, &field.table_id, table));
            }
            roots.push((id.clone(), scope));
        }
        self.plan(roots, ChangeKind::CellWrite, counts)
    }

    /// Validates a single link write and returns its cell diff plus the mirrored diffs.
    pub fn apply_link_write<R: LinkResolver + ?Sized>(
        &self,
        resolver: &R,
        field_id: &FieldId,
        record_id: &RecordId,
        foreign_ids: Vec<RecordId>,
    ) -> EngineResult<LinkWriteDiff> {
        let write = LinkWrite {
            field_id: field_id.clone(),
            record_id: record_id.clone(),
            foreign_ids,
        };
        link::apply_link_write(&self.graph, resolver, &write)
    }

    /// Validates a batch of link writes as a whole. `pending_records` are records created by
    /// the same batch.
    pub fn apply_link_writes<R: LinkResolver + ?Sized>(
        &self,
        resolver: &R,
        writes: &[LinkWrite],
        pending_records: &[RecordId],
    ) -> EngineResult<LinkChangeSet> {
        link::apply_link_writes(&self.graph, resolver, writes, pending_records)
    }

    /// Hard-removes every field of `table` and flags dependents elsewhere.
    pub fn purge_table(&mut self, table: &TableId) -> RemovalReport {
        let report = self.graph.purge_table(table);
        log::debug!(
            "purged table {table}: {} field(s) removed, {} field(s) errored",
            report.removed.len(),
            report.errored().len()
        );
        report
    }

    /// Executes a synchronous plan, or hands an asynchronous one to `sink`.
    pub fn dispatch<S>(
        &self,
        plan: ComputationPlan,
        seed: ChangeSet,
        catalog: &dyn FieldCatalog,
        store: &mut S,
        sink: &mut dyn PlanSink,
    ) -> EngineResult<Dispatch>
    where
        S: RecordStore + LinkResolver + Sync + ?Sized,
    {
        if plan.cost.is_async {
            let update_cell_count = plan.cost.update_cell_count;
            log::debug!(
                "deferring {:?} plan touching {update_cell_count} cell(s)",
                plan.change
            );
            sink.enqueue(QueuedPlan::new(plan, seed))?;
            return Ok(Dispatch::Deferred { update_cell_count });
        }

        PlanExecutor::from_settings(&self.settings)
            .execute(&plan, &seed, catalog, store)
            .map(Dispatch::Applied)
    }

    /// Runs a plan taken off a queue. Fields deleted since it was queued are skipped.
    pub fn execute_queued<S>(
        &self,
        queued: &QueuedPlan,
        catalog: &dyn FieldCatalog,
        store: &mut S,
    ) -> EngineResult<ExecutionReport>
    where
        S: RecordStore + LinkResolver + Sync + ?Sized,
    {
        PlanExecutor::from_settings(&self.settings).execute(
            &queued.plan,
            &queued.seed,
            catalog,
            store,
        )
    }

    /// Applies a batch of link writes end to end: validates and mirrors them, writes the link
    /// cells, then plans and dispatches the recomputation of everything reading those links.
    ///
    /// The link cells and a synchronous recomputation share one store transaction.
    pub fn write_links<S>(
        &self,
        catalog: &dyn FieldCatalog,
        store: &mut S,
        writes: &[LinkWrite],
        pending_records: &[RecordId],
        sink: &mut dyn PlanSink,
    ) -> EngineResult<LinkWriteOutcome>
    where
        S: RecordStore + LinkResolver + Sync,
    {
        let links = self.apply_link_writes(&*store, writes, pending_records)?;

        store.begin()?;
        let dispatch = match self.write_link_cells(catalog, store, &links, sink) {
            Ok(dispatch) => dispatch,
            Err(err) => {
                store.rollback();
                return Err(err);
            }
        };
        if let Err(err) = store.commit() {
            store.rollback();
            return Err(err);
        }

        Ok(LinkWriteOutcome { links, dispatch })
    }

    fn write_link_cells<S>(
        &self,
        catalog: &dyn FieldCatalog,
        store: &mut S,
        links: &LinkChangeSet,
        sink: &mut dyn PlanSink,
    ) -> EngineResult<Dispatch>
    where
        S: RecordStore + LinkResolver + Sync,
    {
        for write in &links.writes {
            store.write_cells(&write.table_id, &write.field_id, &write.diffs)?;
        }
        let plan = self.plan_changes(&links.changes, &*store)?;
        self.dispatch(plan, links.changes.clone(), catalog, store, sink)
    }

    /// Plans the recomputation following arbitrary changed cells.
    fn plan_changes(
        &self,
        changes: &ChangeSet,
        counts: &dyn RecordCounts,
    ) -> EngineResult<ComputationPlan> {
        let roots = changes
            .iter()
            .map(|(field, records)| (field.clone(), CellScope::Records(records.len())))
            .collect::<Vec<_>>();
        self.plan(roots, ChangeKind::CellWrite, counts)
    }

    fn plan<I>(
        &self,
        roots: I,
        change: ChangeKind,
        counts: &dyn RecordCounts,
    ) -> EngineResult<ComputationPlan>
    where
        I: IntoIterator<Item = (FieldId, CellScope)>,
    {
        let mut plan = plan_for(&self.graph, roots, change)?;
        self.estimator.annotate(&mut plan, counts);
        Ok(plan)
    }
}

fn table_mismatch(field: &FieldId, actual: &TableId, expected: &TableId) -> EngineError {
    EngineError::invalid(
        field,
        format!("field belongs to table {actual}, not {expected}"),
    )
}

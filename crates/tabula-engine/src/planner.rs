//! Topological planning over the reference graph.
//!
//! A plan is the forward closure of a set of root fields, grouped into dependency levels with
//! Kahn's algorithm. Fields in one level never depend on each other.

use crate::cost::CostEstimate;
use crate::error::{EngineError, EngineResult};
use crate::graph::ReferenceGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tabula_model::{FieldId, TableId};

/// The mutation a plan was built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    CellWrite,
}

/// Which cells of a field a plan touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CellScope {
    AllRecords,
    /// A known number of records, e.g. the cells written by a record update.
    Records(usize),
}

impl CellScope {
    /// Number of cells touched in a table of `record_count` records.
    #[must_use]
    pub fn cells(self, record_count: usize) -> usize {
        match self {
            CellScope::AllRecords => record_count,
            CellScope::Records(n) => n.min(record_count),
        }
    }

    #[must_use]
    pub fn widen(self, other: CellScope) -> CellScope {
        match (self, other) {
            (CellScope::Records(a), CellScope::Records(b)) => CellScope::Records(a.max(b)),
            _ => CellScope::AllRecords,
        }
    }
}

/// Graph metadata describing a plan, for observability and cost estimation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGraph {
    /// Sources and closure fields, sorted by id.
    pub nodes: Vec<FieldId>,
    /// Reference edges `(precedent, dependent)` among `nodes`.
    pub edges: Vec<(FieldId, FieldId)>,
    /// `nodes` grouped by table.
    pub combos: BTreeMap<TableId, Vec<FieldId>>,
}

impl PlanGraph {
    #[must_use]
    pub fn table_of(&self, field: &FieldId) -> Option<&TableId> {
        self.combos
            .iter()
            .find(|(_, fields)| fields.binary_search(field).is_ok())
            .map(|(table, _)| table)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationPlan {
    pub change: ChangeKind,
    /// Root fields, sorted by id.
    pub roots: Vec<FieldId>,
    /// The closure in dependency order. Each level is sorted by id.
    pub levels: Vec<Vec<FieldId>>,
    /// Fields whose values are read but not recomputed.
    pub sources: Vec<FieldId>,
    pub scopes: BTreeMap<FieldId, CellScope>,
    pub graph: PlanGraph,
    pub cost: CostEstimate,
}

impl ComputationPlan {
    /// Closure fields in execution order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldId> {
        self.levels.iter().flatten()
    }

    #[must_use]
    pub fn level_of(&self, field: &FieldId) -> Option<usize> {
        self.levels.iter().position(|level| level.contains(field))
    }

    #[must_use]
    pub fn contains(&self, field: &FieldId) -> bool {
        self.level_of(field).is_some()
    }

    #[must_use]
    pub fn is_root(&self, field: &FieldId) -> bool {
        self.roots.binary_search(field).is_ok()
    }

    #[must_use]
    pub fn scope_of(&self, field: &FieldId) -> CellScope {
        self.scopes
            .get(field)
            .copied()
            .unwrap_or(CellScope::AllRecords)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edges.len()
    }
}

/// Plans the recomputation following a change to `roots`.
///
/// Every non-`CellWrite` root is recomputed in full; cell-write roots keep the scope they are
/// given. The plan's cost is left at its default; see [`crate::cost::CostEstimator`].
pub fn plan_for<I>(
    graph: &ReferenceGraph,
    roots: I,
    change: ChangeKind,
) -> EngineResult<ComputationPlan>
where
    I: IntoIterator<Item = (FieldId, CellScope)>,
{
    let mut root_scopes: BTreeMap<FieldId, CellScope> = BTreeMap::new();
    let mut mirrored: Vec<FieldId> = Vec::new();
    for (id, scope) in roots {
        let Some(field) = graph.field(&id) else {
            return Err(EngineError::UnknownField(id));
        };
        let scope = if change == ChangeKind::CellWrite {
            scope
        } else {
            CellScope::AllRecords
        };

        if change == ChangeKind::CellWrite {
            if let Some(symmetric) = field.symmetric_field_id() {
                if graph.contains(symmetric) {
                    mirrored.push(symmetric.clone());
                }
            }
        }

        root_scopes
            .entry(id)
            .and_modify(|existing| *existing = existing.widen(scope))
            .or_insert(scope);
    }
    // The mirrored side of a written link is only unbounded when the caller did not scope it.
    for symmetric in mirrored {
        root_scopes.entry(symmetric).or_insert(CellScope::AllRecords);
    }

    let mut closure: BTreeSet<FieldId> = root_scopes.keys().cloned().collect();
    closure.extend(graph.dependent_closure(root_scopes.keys()));

    let levels = schedule(graph, &closure)?;

    let mut scopes: BTreeMap<FieldId, CellScope> = BTreeMap::new();
    for id in levels.iter().flatten() {
        if let Some(scope) = root_scopes.get(id) {
            scopes.insert(id.clone(), *scope);
            continue;
        }
        let scope = if change == ChangeKind::CellWrite {
            derived_scope(graph, id, &closure, &scopes)
        } else {
            CellScope::AllRecords
        };
        scopes.insert(id.clone(), scope);
    }

    let mut sources: BTreeSet<FieldId> = BTreeSet::new();
    for id in &closure {
        let Some(field) = graph.field(id) else {
            continue;
        };
        for source in field.value_sources() {
            if !closure.contains(&source) && graph.contains(&source) {
                sources.insert(source);
            }
        }
    }

    let nodes: BTreeSet<FieldId> = closure.iter().chain(sources.iter()).cloned().collect();
    let mut edges = Vec::new();
    let mut combos: BTreeMap<TableId, Vec<FieldId>> = BTreeMap::new();
    for id in &nodes {
        if let Some(table) = graph.table_of(id) {
            combos.entry(table.clone()).or_default().push(id.clone());
        }
        for precedent in graph.precedents_of(id) {
            if nodes.contains(precedent) {
                edges.push((precedent.clone(), id.clone()));
            }
        }
    }
    edges.sort();

    log::debug!(
        "planned {change:?} for {} root(s): {} field(s) in {} level(s), {} source(s)",
        root_scopes.len(),
        closure.len(),
        levels.len(),
        sources.len()
    );

    Ok(ComputationPlan {
        change,
        roots: root_scopes.into_keys().collect(),
        levels,
        sources: sources.into_iter().collect(),
        scopes,
        graph: PlanGraph {
            nodes: nodes.into_iter().collect(),
            edges,
            combos,
        },
        cost: CostEstimate::default(),
    })
}

/// A cell-write dependent inherits the widest scope of its in-closure precedents, unless one of
/// them sits in another table.
fn derived_scope(
    graph: &ReferenceGraph,
    id: &FieldId,
    closure: &BTreeSet<FieldId>,
    scopes: &BTreeMap<FieldId, CellScope>,
) -> CellScope {
    let table = graph.table_of(id);
    let mut scope: Option<CellScope> = None;
    for precedent in graph.precedents_of(id) {
        if !closure.contains(precedent) {
            continue;
        }
        if graph.table_of(precedent) != table {
            return CellScope::AllRecords;
        }
        let precedent_scope = scopes
            .get(precedent)
            .copied()
            .unwrap_or(CellScope::AllRecords);
        scope = Some(match scope {
            Some(current) => current.widen(precedent_scope),
            None => precedent_scope,
        });
    }
    scope.unwrap_or(CellScope::AllRecords)
}

/// Kahn's algorithm restricted to `closure`, emitting one wave per level.
fn schedule(
    graph: &ReferenceGraph,
    closure: &BTreeSet<FieldId>,
) -> EngineResult<Vec<Vec<FieldId>>> {
    let mut indegree: BTreeMap<&FieldId, usize> = BTreeMap::new();
    for id in closure {
        let count = graph
            .precedents_of(id)
            .iter()
            .filter(|p| closure.contains(*p))
            .collect::<BTreeSet<_>>()
            .len();
        indegree.insert(id, count);
    }

    let mut ready: BTreeSet<&FieldId> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut levels: Vec<Vec<FieldId>> = Vec::new();
    let mut scheduled = 0usize;
    while !ready.is_empty() {
        let wave: Vec<&FieldId> = std::mem::take(&mut ready).into_iter().collect();
        for id in &wave {
            for dep in graph.dependents_of(id) {
                let Some(count) = indegree.get_mut(&dep) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    if let Some(key) = closure.get(&dep) {
                        ready.insert(key);
                    }
                }
            }
        }
        scheduled += wave.len();
        levels.push(wave.into_iter().cloned().collect());
    }

    if scheduled != closure.len() {
        let stuck: Vec<String> = indegree
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(EngineError::Internal(format!(
            "unable to schedule fields {}",
            stuck.join(", ")
        )));
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabula_model::Field;

    fn ids(names: &[&str]) -> Vec<FieldId> {
        names.iter().map(|n| FieldId::from(*n)).collect()
    }

    fn chain() -> ReferenceGraph {
        let mut graph = ReferenceGraph::new();
        graph
            .add_fields(vec![
                Field::normal("fldT", "tblA", "T"),
                Field::normal("fldU", "tblA", "U"),
                Field::formula("fldF1", "tblA", "F1", "{fldT}"),
                Field::formula("fldF2", "tblA", "F2", "{fldU}"),
                Field::formula("fldF3", "tblA", "F3", "{fldF1} & {fldF2}"),
                Field::formula("fldF4", "tblA", "F4", "{fldF3} & {fldT}"),
            ])
            .unwrap();
        graph
    }

    #[test]
    fn levels_follow_longest_precedent_path() {
        let graph = chain();
        let roots = [
            (FieldId::from("fldT"), CellScope::Records(2)),
            (FieldId::from("fldU"), CellScope::Records(5)),
        ];
        let plan = plan_for(&graph, roots, ChangeKind::CellWrite).unwrap();

        assert_eq!(
            plan.levels,
            vec![
                ids(&["fldT", "fldU"]),
                ids(&["fldF1", "fldF2"]),
                ids(&["fldF3"]),
                ids(&["fldF4"]),
            ]
        );
        assert_eq!(plan.scope_of(&"fldF1".into()), CellScope::Records(2));
        assert_eq!(plan.scope_of(&"fldF3".into()), CellScope::Records(5));
        assert_eq!(plan.scope_of(&"fldF4".into()), CellScope::Records(5));
        assert!(plan.sources.is_empty());
    }

    #[test]
    fn definition_changes_recompute_everything_downstream() {
        let graph = chain();
        let roots = [(FieldId::from("fldF1"), CellScope::Records(1))];
        let plan = plan_for(&graph, roots, ChangeKind::Update).unwrap();

        assert_eq!(plan.levels, vec![ids(&["fldF1"]), ids(&["fldF3"]), ids(&["fldF4"])]);
        assert!(plan.scopes.values().all(|s| *s == CellScope::AllRecords));
        assert_eq!(plan.sources, ids(&["fldF2", "fldT"]));
        assert_eq!(plan.node_count(), 5);
        assert_eq!(plan.edge_count(), 5);
    }

    #[test]
    fn unknown_root_is_rejected() {
        let graph = chain();
        let roots = [(FieldId::from("fldNope"), CellScope::AllRecords)];
        let err = plan_for(&graph, roots, ChangeKind::Create).unwrap_err();
        assert!(matches!(err, EngineError::UnknownField(id) if id.as_str() == "fldNope"));
    }

    #[test]
    fn scope_cells_are_clamped() {
        assert_eq!(CellScope::Records(10).cells(3), 3);
        assert_eq!(CellScope::Records(2).cells(3), 2);
        assert_eq!(CellScope::AllRecords.cells(3), 3);
        assert_eq!(
            CellScope::Records(2).widen(CellScope::AllRecords),
            CellScope::AllRecords
        );
    }
}

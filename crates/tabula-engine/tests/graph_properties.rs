#![cfg(not(target_arch = "wasm32"))]

use proptest::prelude::*;
use tabula_engine::graph::{find_any_cycle, ReferenceGraph};
use tabula_engine::planner::{plan_for, CellScope, ChangeKind};
use tabula_engine::EngineError;
use tabula_model::{Field, FieldId};

const INPUTS: usize = 3;
const FORMULAS: usize = 8;

fn input_id(idx: usize) -> FieldId {
    FieldId::from(format!("fldIn{idx}"))
}

fn formula_id(idx: usize) -> FieldId {
    FieldId::from(format!("fldF{idx}"))
}

/// Reference `idx` maps onto inputs first, then formulas.
fn reference_id(idx: usize) -> FieldId {
    if idx < INPUTS {
        input_id(idx)
    } else {
        formula_id(idx - INPUTS)
    }
}

fn base_graph() -> ReferenceGraph {
    let mut graph = ReferenceGraph::new();
    graph
        .add_fields(
            (0..INPUTS)
                .map(|idx| Field::normal(input_id(idx), "tblA", format!("In{idx}")))
                .collect(),
        )
        .unwrap();
    graph
}

/// Applies every definition in order, keeping the ones the graph accepts.
fn build(ops: &[(usize, Vec<usize>)]) -> Result<ReferenceGraph, TestCaseError> {
    let mut graph = base_graph();
    for (target, refs) in ops {
        let expression = refs
            .iter()
            .map(|r| format!("{{{}}}", reference_id(*r)))
            .collect::<Vec<_>>()
            .join(" & ");
        let field = Field::formula(formula_id(*target), "tblA", "F", expression);
        match graph.add_or_replace_field(field) {
            Ok(()) => {}
            Err(EngineError::CyclicReference(_) | EngineError::InvalidReference { .. }) => {}
            Err(other) => return Err(TestCaseError::fail(format!("unexpected error {other}"))),
        }
        prop_assert!(find_any_cycle(&graph).is_none());
    }
    Ok(graph)
}

fn ops_strategy() -> impl Strategy<Value = Vec<(usize, Vec<usize>)>> {
    proptest::collection::vec(
        (
            0..FORMULAS,
            proptest::collection::vec(0..INPUTS + FORMULAS, 0..4),
        ),
        1..40,
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0),
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn accepted_definitions_never_form_a_cycle(ops in ops_strategy()) {
        build(&ops)?;
    }

    #[test]
    fn plans_are_closed_and_levels_are_independent(
        ops in ops_strategy(),
        root in 0..INPUTS + FORMULAS,
    ) {
        let graph = build(&ops)?;
        let root = reference_id(root);
        prop_assume!(graph.contains(&root));

        let plan = plan_for(&graph, [(root.clone(), CellScope::AllRecords)], ChangeKind::Update)
            .unwrap();

        // Every transitive dependent is planned strictly after the root.
        let root_level = plan.level_of(&root).unwrap();
        prop_assert_eq!(root_level, 0);
        for dependent in graph.dependent_closure([&root]) {
            let level = plan.level_of(&dependent);
            prop_assert!(level.is_some_and(|l| l > root_level), "{} not after root", dependent);
        }

        // Every edge inside the plan points forward.
        for id in plan.fields() {
            let level = plan.level_of(id).unwrap();
            for precedent in graph.precedents_of(id) {
                if let Some(precedent_level) = plan.level_of(precedent) {
                    prop_assert!(precedent_level < level);
                }
            }
        }

        // No field reaches another field of its own level.
        for level in &plan.levels {
            for a in level {
                let reachable = graph.dependent_closure([a]);
                for b in level {
                    prop_assert!(!reachable.contains(b), "{} reaches {} within one level", a, b);
                }
            }
        }
    }
}

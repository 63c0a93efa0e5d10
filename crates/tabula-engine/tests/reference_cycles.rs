mod common;

use common::{field, fields};
use pretty_assertions::assert_eq;
use tabula_engine::graph::{find_any_cycle, would_create_cycle, ReferenceGraph};
use tabula_engine::EngineError;
use tabula_model::{Field, Relationship};

fn chain() -> ReferenceGraph {
    let mut graph = ReferenceGraph::new();
    graph
        .add_fields(vec![
            Field::normal("fldT", "tblA", "T"),
            Field::formula("fldF1", "tblA", "F1", "{fldT}"),
            Field::formula("fldF2", "tblA", "F2", "{fldF1}"),
            Field::formula("fldF3", "tblA", "F3", "{fldF2}"),
        ])
        .unwrap();
    graph
}

fn cycle_path(err: EngineError) -> Vec<tabula_model::FieldId> {
    match err {
        EngineError::CyclicReference(cycle) => cycle.path,
        other => panic!("expected a cycle, got {other}"),
    }
}

#[test]
fn self_reference_is_rejected_without_traversal() {
    let mut graph = chain();
    let err = graph
        .add_or_replace_field(Field::formula("fldS", "tblA", "S", "{fldS} + 1"))
        .unwrap_err();
    assert_eq!(cycle_path(err), fields(&["fldS", "fldS"]));
    assert!(!graph.contains(&field("fldS")));
}

#[test]
fn redefining_the_head_of_a_chain_reports_the_whole_loop() {
    let mut graph = chain();
    let err = graph
        .add_or_replace_field(Field::formula("fldF1", "tblA", "F1", "{fldF3}"))
        .unwrap_err();

    assert_eq!(
        cycle_path(err),
        fields(&["fldF1", "fldF3", "fldF2", "fldF1"])
    );
    // The old definition survives.
    assert_eq!(graph.precedents_of(&field("fldF1")), &[field("fldT")]);
    assert!(find_any_cycle(&graph).is_none());
}

#[test]
fn would_create_cycle_ignores_the_candidates_current_edges() {
    let graph = chain();
    assert!(would_create_cycle(&graph, &field("fldF1"), &fields(&["fldT"])).is_none());
    assert!(would_create_cycle(&graph, &field("fldF3"), &fields(&["fldF1"])).is_none());

    let cycle = would_create_cycle(&graph, &field("fldF2"), &fields(&["fldF3"])).unwrap();
    assert_eq!(cycle.path, fields(&["fldF2", "fldF3", "fldF2"]));
    assert_eq!(
        cycle.to_string(),
        "circular reference: fldF2 -> fldF3 -> fldF2"
    );
}

#[test]
fn a_batch_is_checked_as_one_overlay() {
    let mut graph = chain();
    let err = graph
        .add_fields(vec![
            Field::formula("fldX", "tblA", "X", "{fldY}"),
            Field::formula("fldY", "tblA", "Y", "{fldX}"),
        ])
        .unwrap_err();

    assert_eq!(cycle_path(err), fields(&["fldX", "fldY", "fldX"]));
    assert!(!graph.contains(&field("fldX")));
    assert!(!graph.contains(&field("fldY")));
}

#[test]
fn cycles_through_links_span_tables() {
    let mut graph = ReferenceGraph::new();
    let (link, symmetric) =
        Field::link_pair("fldL", "tblA", "fldLb", "tblB", Relationship::ManyMany);
    graph.add_fields(vec![link, symmetric]).unwrap();

    let err = graph
        .add_fields(vec![
            Field::lookup("fldKa", "tblA", "Ka", "fldL", "tblB", "fldKb"),
            Field::lookup("fldKb", "tblB", "Kb", "fldLb", "tblA", "fldKa"),
        ])
        .unwrap_err();
    assert_eq!(cycle_path(err), fields(&["fldKa", "fldKb", "fldKa"]));
    assert_eq!(graph.stats().fields, 2);
}

#[test]
fn stored_cycles_are_rejected_on_load() {
    let err = ReferenceGraph::from_fields(vec![
        Field::formula("fldA", "tblA", "A", "{fldB}"),
        Field::formula("fldB", "tblA", "B", "{fldA}"),
    ])
    .unwrap_err();

    let path = cycle_path(err);
    assert_eq!(path.first(), path.last());
    assert_eq!(path.len(), 3);
}

#[test]
fn unknown_and_deleted_references_are_invalid() {
    let mut graph = chain();
    let err = graph
        .add_or_replace_field(Field::formula("fldG", "tblA", "G", "{fldMissing}"))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidReference { .. }), "{err}");

    let mut deleted = Field::formula("fldG", "tblA", "G", "{fldT}");
    deleted.is_deleted = true;
    let err = graph.add_or_replace_field(deleted).unwrap_err();
    assert!(err.to_string().contains("deleted"), "{err}");
}

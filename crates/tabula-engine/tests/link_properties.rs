#![cfg(not(target_arch = "wasm32"))]

mod common;

use common::{field, record, table, Fixture, PEOPLE, TASKS};
use proptest::prelude::*;
use std::collections::BTreeSet;
use tabula_engine::{EngineError, LinkWrite, QueuedPlan};
use tabula_model::{Field, RecordId, Relationship};

const PEOPLE_IDS: [&str; 3] = ["p1", "p2", "p3"];
const TASK_IDS: [&str; 3] = ["t1", "t2", "t3"];

/// One write: which side of the pair, which record, which foreign records.
type Op = (bool, usize, Vec<usize>);

fn linked(relationship: Relationship) -> Fixture {
    let (link, back) = Field::link_pair("fldLink", PEOPLE, "fldBack", TASKS, relationship);
    let mut fixture = common::fixture_with(
        vec![
            Field::normal("fldName", PEOPLE, "Name"),
            Field::normal("fldTitle", TASKS, "Title"),
            link,
            back,
        ],
        1_000,
    );
    fixture.store.insert_record(PEOPLE, "p3");
    fixture
}

fn to_write(op: &Op) -> LinkWrite {
    let (from_tasks, idx, foreign) = op;
    if *from_tasks {
        LinkWrite::new(
            "fldBack",
            TASK_IDS[*idx],
            foreign.iter().map(|f| PEOPLE_IDS[*f]),
        )
    } else {
        LinkWrite::new(
            "fldLink",
            PEOPLE_IDS[*idx],
            foreign.iter().map(|f| TASK_IDS[*f]),
        )
    }
}

fn links_of(fixture: &Fixture, table_id: &str, field_id: &str, record_id: &str) -> Vec<RecordId> {
    fixture
        .store
        .cell(&table(table_id), &field(field_id), &record(record_id))
        .links()
        .to_vec()
}

/// Every link cell on both sides, in a fixed order.
fn snapshot(fixture: &Fixture) -> Vec<Vec<RecordId>> {
    let people = PEOPLE_IDS
        .iter()
        .map(|p| links_of(fixture, PEOPLE, "fldLink", p));
    let tasks = TASK_IDS
        .iter()
        .map(|t| links_of(fixture, TASKS, "fldBack", t));
    people.chain(tasks).collect()
}

fn check_symmetry(fixture: &Fixture, relationship: Relationship) -> Result<(), TestCaseError> {
    for task in TASK_IDS {
        let linking: BTreeSet<RecordId> = PEOPLE_IDS
            .iter()
            .filter(|p| links_of(fixture, PEOPLE, "fldLink", p).contains(&record(task)))
            .map(|p| record(p))
            .collect();
        let back = links_of(fixture, TASKS, "fldBack", task);
        prop_assert_eq!(back.iter().cloned().collect::<BTreeSet<_>>(), linking);
        if !relationship.symmetric().is_multiple_value() {
            prop_assert!(back.len() <= 1, "{} holds {:?}", task, back);
        }
    }
    for person in PEOPLE_IDS {
        let linking: BTreeSet<RecordId> = TASK_IDS
            .iter()
            .filter(|t| links_of(fixture, TASKS, "fldBack", t).contains(&record(person)))
            .map(|t| record(t))
            .collect();
        let forward = links_of(fixture, PEOPLE, "fldLink", person);
        prop_assert_eq!(forward.iter().cloned().collect::<BTreeSet<_>>(), linking);
        if !relationship.is_multiple_value() {
            prop_assert!(forward.len() <= 1, "{} holds {:?}", person, forward);
        }
    }
    Ok(())
}

fn relationship_strategy() -> impl Strategy<Value = Relationship> {
    prop_oneof![
        Just(Relationship::OneOne),
        Just(Relationship::OneMany),
        Just(Relationship::ManyOne),
        Just(Relationship::ManyMany),
    ]
}

fn batches_strategy() -> impl Strategy<Value = Vec<Vec<Op>>> {
    let op = (
        any::<bool>(),
        0..3usize,
        proptest::collection::vec(0..3usize, 0..3),
    );
    proptest::collection::vec(proptest::collection::vec(op, 1..4), 1..8)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0),
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn both_sides_always_agree(
        relationship in relationship_strategy(),
        batches in batches_strategy(),
    ) {
        let mut fixture = linked(relationship);
        let mut sink: Vec<QueuedPlan> = Vec::new();

        for batch in &batches {
            let writes: Vec<LinkWrite> = batch.iter().map(to_write).collect();
            let before = snapshot(&fixture);
            let Fixture { engine, catalog, store } = &mut fixture;
            match engine.write_links(catalog, store, &writes, &[], &mut sink) {
                Ok(_) => check_symmetry(&fixture, relationship)?,
                Err(
                    EngineError::DuplicateLink { .. }
                    | EngineError::LinkCardinality { .. }
                    | EngineError::InvalidReference { .. },
                ) => {
                    // A rejected batch leaves every cell as it was.
                    prop_assert_eq!(snapshot(&fixture), before);
                }
                Err(other) => {
                    return Err(TestCaseError::fail(format!("unexpected error {other}")));
                }
            }
        }
        prop_assert!(sink.is_empty());
    }
}

#![allow(dead_code)]

use tabula_engine::memory::{MemoryCatalog, MemoryStore};
use tabula_engine::{ComputeEngine, ComputeSettings};
use tabula_model::{CellValue, Field, FieldId, RecordId, Relationship, TableId};

pub const PEOPLE: &str = "tblPeople";
pub const TASKS: &str = "tblTasks";

pub fn table(id: &str) -> TableId {
    TableId::from(id)
}

pub fn field(id: &str) -> FieldId {
    FieldId::from(id)
}

pub fn record(id: &str) -> RecordId {
    RecordId::from(id)
}

pub fn records(ids: &[&str]) -> Vec<RecordId> {
    ids.iter().map(|id| RecordId::from(*id)).collect()
}

pub fn fields(ids: &[&str]) -> Vec<FieldId> {
    ids.iter().map(|id| FieldId::from(*id)).collect()
}

/// People own tasks.
///
/// - `fldName` (people) and `fldTitle` (tasks) are plain fields;
/// - `fldTasks` (people, one-many) pairs with `fldOwner` (tasks, many-one);
/// - `fldTaskTitles` looks up the titles of a person's tasks;
/// - `fldSummary` is the formula `{fldName}: {fldTaskTitles}`.
pub fn people_and_tasks() -> Vec<Field> {
    let (tasks, owner) =
        Field::link_pair("fldTasks", PEOPLE, "fldOwner", TASKS, Relationship::OneMany);
    vec![
        Field::normal("fldName", PEOPLE, "Name"),
        Field::normal("fldTitle", TASKS, "Title"),
        tasks,
        owner,
        Field::lookup(
            "fldTaskTitles",
            PEOPLE,
            "Task titles",
            "fldTasks",
            TASKS,
            "fldTitle",
        ),
        Field::formula("fldSummary", PEOPLE, "Summary", "{fldName}: {fldTaskTitles}"),
    ]
}

pub struct Fixture {
    pub engine: ComputeEngine,
    pub catalog: MemoryCatalog,
    pub store: MemoryStore,
}

impl Fixture {
    pub fn cell(&self, table_id: &str, field_id: &str, record_id: &str) -> CellValue {
        self.store
            .cell(&table(table_id), &field(field_id), &record(record_id))
    }
}

/// Two people (`p1` Ada, `p2` Grace) and three tasks (`t1`..`t3`), nothing linked yet.
pub fn fixture(max_sync_cell_count: usize) -> Fixture {
    fixture_with(people_and_tasks(), max_sync_cell_count)
}

pub fn fixture_with(definitions: Vec<Field>, max_sync_cell_count: usize) -> Fixture {
    let mut catalog = MemoryCatalog::new();
    catalog.insert_all(definitions);

    let mut store = MemoryStore::new();
    for (id, name) in [("p1", "Ada"), ("p2", "Grace")] {
        store.insert_record(PEOPLE, id);
        store.set_cell(PEOPLE, "fldName", id, name.into());
    }
    for (id, title) in [("t1", "Write docs"), ("t2", "Fix bug"), ("t3", "Ship")] {
        store.insert_record(TASKS, id);
        store.set_cell(TASKS, "fldTitle", id, title.into());
    }

    let engine = ComputeEngine::from_catalog(
        &catalog,
        &[table(PEOPLE), table(TASKS)],
        ComputeSettings::new(max_sync_cell_count),
    )
    .expect("fixture fields form a valid graph");

    Fixture {
        engine,
        catalog,
        store,
    }
}

//! `tabula-model` defines the value types shared by the computed-field engine and its hosts.
//!
//! Everything here is plain data: fields reference each other by id only, so the engine can
//! keep them in an arena and reason about dependencies without shared pointers. The types are
//! `serde`-friendly so they can cross IPC / queue boundaries unchanged.

mod field;
pub mod formula_refs;
mod ids;
mod relationship;
mod value;

pub use field::{
    Field, FieldKind, FieldReferences, FormulaOptions, LinkOptions, LookupOptions, RollupOptions,
};
pub use formula_refs::extract_field_references;
pub use ids::{FieldId, RecordId, TableId};
pub use relationship::Relationship;
pub use value::{CellDiff, CellValue};

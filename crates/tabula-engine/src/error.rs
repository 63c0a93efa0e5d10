use crate::graph::CyclePath;
use tabula_model::{FieldId, RecordId};

pub type EngineResult<T> = Result<T, EngineError>;

/// A computed field lost one of its references because the referenced field was deleted.
///
/// This is recovered locally (the dependent is flagged `has_error`) rather than failing the
/// delete, so it is reported alongside a removal instead of being returned as an error.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrphanedReference {
    pub field: FieldId,
    pub missing: FieldId,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    CyclicReference(CyclePath),

    #[error("invalid reference in field {field}: {reason}")]
    InvalidReference { field: FieldId, reason: String },

    #[error("duplicate link in {field}: record {foreign_record} is already linked from {claimed_by}")]
    DuplicateLink {
        field: FieldId,
        foreign_record: RecordId,
        claimed_by: RecordId,
    },

    #[error("link field {field} holds a single record but {record} was given {count}")]
    LinkCardinality {
        field: FieldId,
        record: RecordId,
        count: usize,
    },

    #[error("field {} references missing field {}", .0.field, .0.missing)]
    OrphanedReference(OrphanedReference),

    #[error("unknown field: {0}")]
    UnknownField(FieldId),

    #[error("record store error: {0}")]
    Store(String),

    #[error("internal planner error: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn invalid(field: &FieldId, reason: impl Into<String>) -> Self {
        EngineError::InvalidReference {
            field: field.clone(),
            reason: reason.into(),
        }
    }
}

impl From<OrphanedReference> for EngineError {
    fn from(value: OrphanedReference) -> Self {
        EngineError::OrphanedReference(value)
    }
}

use crate::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON-friendly representation of a cell value.
///
/// The enum uses an explicit `{type, value}` tagged layout for stable IPC.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Boolean(bool),
    /// Link cell contents: the linked foreign record ids, in link order.
    Links(Vec<RecordId>),
    /// Multi-valued computed contents (e.g. a lookup through a one-many link).
    List(Vec<CellValue>),
    Error(String),
}

impl CellValue {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Links(ids) => ids.is_empty(),
            CellValue::List(values) => values.is_empty(),
            _ => false,
        }
    }

    /// Linked record ids of a link cell. Non-link values link nothing.
    #[must_use]
    pub fn links(&self) -> &[RecordId] {
        match self {
            CellValue::Links(ids) => ids,
            _ => &[],
        }
    }

    /// Normalized link cell: an empty set is stored as [`CellValue::Empty`].
    #[must_use]
    pub fn from_links(ids: Vec<RecordId>) -> Self {
        if ids.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Links(ids)
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Boolean(b) => write!(f, "{b}"),
            CellValue::Links(ids) => {
                for (idx, id) in ids.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
            CellValue::List(values) => {
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            }
            CellValue::Error(msg) => write!(f, "#ERROR({msg})"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

/// One cell write: the value a record's cell had and the value it gets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDiff {
    pub record_id: RecordId,
    pub old: CellValue,
    pub new: CellValue,
}

impl CellDiff {
    pub fn new(record_id: impl Into<RecordId>, old: CellValue, new: CellValue) -> Self {
        Self {
            record_id: record_id.into(),
            old,
            new,
        }
    }

    /// A diff whose old and new values are equal writes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_link_sets_normalize_to_empty() {
        assert_eq!(CellValue::from_links(Vec::new()), CellValue::Empty);
        assert!(CellValue::Links(Vec::new()).is_empty());
        assert_eq!(
            CellValue::from_links(vec!["rec1".into()]).links(),
            &[RecordId::from("rec1")]
        );
    }

    #[test]
    fn display_joins_collections() {
        let value = CellValue::List(vec!["a".into(), 2.0.into()]);
        assert_eq!(value.to_string(), "a, 2");
    }
}

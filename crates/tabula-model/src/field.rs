use crate::formula_refs::extract_field_references;
use crate::{FieldId, Relationship, TableId};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

/// Ordered reference set of a field.
pub type FieldReferences = SmallVec<[FieldId; 4]>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOptions {
    pub relationship: Relationship,
    pub foreign_table_id: TableId,
    /// The mirrored link field on the foreign table. `None` for one-way links.
    pub symmetric_field_id: Option<FieldId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupOptions {
    pub link_field_id: FieldId,
    pub foreign_table_id: TableId,
    pub lookup_field_id: FieldId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupOptions {
    pub link_field_id: FieldId,
    pub foreign_table_id: TableId,
    pub lookup_field_id: FieldId,
    /// Aggregation applied to the linked values, e.g. `sum({values})`.
    pub expression: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaOptions {
    pub expression: String,
}

/// What a field is, and the attributes that only make sense for that kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "options", rename_all = "camelCase")]
pub enum FieldKind {
    Normal,
    Link(LinkOptions),
    Lookup(LookupOptions),
    Rollup(RollupOptions),
    Formula(FormulaOptions),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: FieldId,
    pub table_id: TableId,
    pub name: String,
    pub kind: FieldKind,
    /// Set when one of the field's references was deleted out from under it.
    #[serde(default)]
    pub has_error: bool,
    /// Soft-delete marker. Deleted fields stay resolvable by id.
    #[serde(default)]
    pub is_deleted: bool,
}

impl Field {
    pub fn new(
        id: impl Into<FieldId>,
        table_id: impl Into<TableId>,
        name: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        Self {
            id: id.into(),
            table_id: table_id.into(),
            name: name.into(),
            kind,
            has_error: false,
            is_deleted: false,
        }
    }

    pub fn normal(
        id: impl Into<FieldId>,
        table_id: impl Into<TableId>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(id, table_id, name, FieldKind::Normal)
    }

    pub fn formula(
        id: impl Into<FieldId>,
        table_id: impl Into<TableId>,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            table_id,
            name,
            FieldKind::Formula(FormulaOptions {
                expression: expression.into(),
            }),
        )
    }

    pub fn link(
        id: impl Into<FieldId>,
        table_id: impl Into<TableId>,
        name: impl Into<String>,
        relationship: Relationship,
        foreign_table_id: impl Into<TableId>,
        symmetric_field_id: Option<FieldId>,
    ) -> Self {
        Self::new(
            id,
            table_id,
            name,
            FieldKind::Link(LinkOptions {
                relationship,
                foreign_table_id: foreign_table_id.into(),
                symmetric_field_id,
            }),
        )
    }

    /// Builds both sides of a two-way link. The second field lives on `foreign_table_id` and
    /// carries the mirrored relationship.
    pub fn link_pair(
        id: impl Into<FieldId>,
        table_id: impl Into<TableId>,
        symmetric_id: impl Into<FieldId>,
        foreign_table_id: impl Into<TableId>,
        relationship: Relationship,
    ) -> (Self, Self) {
        let id = id.into();
        let table_id = table_id.into();
        let symmetric_id = symmetric_id.into();
        let foreign_table_id = foreign_table_id.into();
        let local = Self::link(
            id.clone(),
            table_id.clone(),
            format!("{foreign_table_id} link"),
            relationship,
            foreign_table_id.clone(),
            Some(symmetric_id.clone()),
        );
        let foreign = Self::link(
            symmetric_id,
            foreign_table_id,
            format!("{table_id} link"),
            relationship.symmetric(),
            table_id,
            Some(id),
        );
        (local, foreign)
    }

    pub fn lookup(
        id: impl Into<FieldId>,
        table_id: impl Into<TableId>,
        name: impl Into<String>,
        link_field_id: impl Into<FieldId>,
        foreign_table_id: impl Into<TableId>,
        lookup_field_id: impl Into<FieldId>,
    ) -> Self {
        Self::new(
            id,
            table_id,
            name,
            FieldKind::Lookup(LookupOptions {
                link_field_id: link_field_id.into(),
                foreign_table_id: foreign_table_id.into(),
                lookup_field_id: lookup_field_id.into(),
            }),
        )
    }

    pub fn rollup(
        id: impl Into<FieldId>,
        table_id: impl Into<TableId>,
        name: impl Into<String>,
        link_field_id: impl Into<FieldId>,
        foreign_table_id: impl Into<TableId>,
        lookup_field_id: impl Into<FieldId>,
        expression: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            table_id,
            name,
            FieldKind::Rollup(RollupOptions {
                link_field_id: link_field_id.into(),
                foreign_table_id: foreign_table_id.into(),
                lookup_field_id: lookup_field_id.into(),
                expression: expression.into(),
            }),
        )
    }

    #[must_use]
    pub fn is_computed(&self) -> bool {
        !matches!(self.kind, FieldKind::Normal)
    }

    #[must_use]
    pub fn is_link(&self) -> bool {
        matches!(self.kind, FieldKind::Link(_))
    }

    #[must_use]
    pub fn link_options(&self) -> Option<&LinkOptions> {
        match &self.kind {
            FieldKind::Link(options) => Some(options),
            _ => None,
        }
    }

    /// `true` for links without a symmetric field. Non-link fields are never one-way.
    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.link_options()
            .is_some_and(|options| options.symmetric_field_id.is_none())
    }

    #[must_use]
    pub fn symmetric_field_id(&self) -> Option<&FieldId> {
        self.link_options()?.symmetric_field_id.as_ref()
    }

    /// The link a lookup or rollup reads through.
    #[must_use]
    pub fn via_link(&self) -> Option<&FieldId> {
        match &self.kind {
            FieldKind::Lookup(options) => Some(&options.link_field_id),
            FieldKind::Rollup(options) => Some(&options.link_field_id),
            _ => None,
        }
    }

    /// Whether a cell of this field holds a collection. Lookups always yield the values of every
    /// linked record.
    #[must_use]
    pub fn is_multiple_value(&self) -> bool {
        match &self.kind {
            FieldKind::Link(options) => options.relationship.is_multiple_value(),
            FieldKind::Lookup(_) => true,
            FieldKind::Normal | FieldKind::Rollup(_) | FieldKind::Formula(_) => false,
        }
    }

    /// Ids of the fields this field reads from, in definition order.
    ///
    /// Lookups and rollups reference exactly their link and the looked-up foreign field. Formula
    /// references come from the `{fieldId}` tokens in the expression.
    #[must_use]
    pub fn references(&self) -> FieldReferences {
        match &self.kind {
            FieldKind::Normal | FieldKind::Link(_) => SmallVec::new(),
            FieldKind::Lookup(options) => {
                through_link(&options.link_field_id, &options.lookup_field_id)
            }
            FieldKind::Rollup(options) => {
                through_link(&options.link_field_id, &options.lookup_field_id)
            }
            FieldKind::Formula(options) => extract_field_references(&options.expression),
        }
    }

    /// The references whose cell values are actually read. A lookup's link is a path to the
    /// foreign rows, not a value source.
    #[must_use]
    pub fn value_sources(&self) -> FieldReferences {
        match &self.kind {
            FieldKind::Lookup(options) => smallvec![options.lookup_field_id.clone()],
            FieldKind::Rollup(options) => smallvec![options.lookup_field_id.clone()],
            _ => self.references(),
        }
    }

    /// Whether switching from `self` to `other` changes what the field computes.
    ///
    /// Renames and error flags do not; anything in the kind does.
    #[must_use]
    pub fn same_computation(&self, other: &Field) -> bool {
        self.kind == other.kind && self.table_id == other.table_id
    }
}

/// A self-referencing link may look up the link field itself; it is a single precedent then.
fn through_link(link: &FieldId, target: &FieldId) -> FieldReferences {
    if link == target {
        smallvec![link.clone()]
    } else {
        smallvec![link.clone(), target.clone()]
    }
}

use super::cycle::{self, ReferenceOverlay};
use crate::error::{EngineError, EngineResult, OrphanedReference};
use ahash::{AHashMap, AHashSet};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tabula_model::{Field, FieldId, FieldKind, FieldReferences, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    pub fields: usize,
    /// Reference edges (precedent field -> dependent field).
    pub edges: usize,
    pub tables: usize,
}

/// Outcome of a cascading field removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    /// Fields removed from the graph, including cascaded lookups/rollups and symmetric links.
    pub removed: Vec<FieldId>,
    /// References that were pruned from surviving fields. Those fields are now `has_error`.
    pub orphaned: Vec<OrphanedReference>,
}

impl RemovalReport {
    /// Surviving fields that lost a reference, sorted and de-duplicated.
    #[must_use]
    pub fn errored(&self) -> Vec<FieldId> {
        let mut out: Vec<FieldId> = self.orphaned.iter().map(|o| o.field.clone()).collect();
        out.sort();
        out.dedup();
        out
    }

    #[must_use]
    pub fn is_removed(&self, field: &FieldId) -> bool {
        self.removed.contains(field)
    }

    fn merge(&mut self, other: RemovalReport) {
        self.removed.extend(other.removed);
        self.orphaned.extend(other.orphaned);
    }

    fn normalize(&mut self) {
        self.removed.sort();
        self.removed.dedup();
        let removed: AHashSet<&FieldId> = self.removed.iter().collect();
        self.orphaned.retain(|o| !removed.contains(&o.field));
        self.orphaned.sort();
        self.orphaned.dedup();
    }
}

/// Directed graph of field references.
///
/// Fields are stored in an arena keyed by id and edges are id pairs kept in forward
/// (`precedents`) and reverse (`dependents`) adjacency maps. An edge `P -> D` means `D` reads `P`.
/// The stored precedents are the *effective* references: ids pruned by a delete stay in a
/// formula's expression text but no longer appear here.
#[derive(Debug, Clone, Default)]
pub struct ReferenceGraph {
    fields: AHashMap<FieldId, Field>,
    precedents: AHashMap<FieldId, FieldReferences>,
    dependents: AHashMap<FieldId, AHashSet<FieldId>>,
    tables: BTreeMap<TableId, BTreeSet<FieldId>>,
}

impl ReferenceGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from stored definitions without re-validating them.
    ///
    /// References to fields that are missing (or soft-deleted) are dropped and reported; the
    /// referencing field is flagged `has_error`. A cycle among the stored definitions is still
    /// an error.
    pub fn from_fields<I>(fields: I) -> EngineResult<(Self, Vec<OrphanedReference>)>
    where
        I: IntoIterator<Item = Field>,
    {
        let mut graph = Self::new();
        for field in fields {
            if field.is_deleted {
                continue;
            }
            graph
                .tables
                .entry(field.table_id.clone())
                .or_default()
                .insert(field.id.clone());
            graph.fields.insert(field.id.clone(), field);
        }

        let mut ids: Vec<FieldId> = graph.fields.keys().cloned().collect();
        ids.sort();

        let mut orphans = Vec::new();
        for id in ids {
            let references = graph.fields[&id].references();
            let mut effective = FieldReferences::new();
            for reference in references {
                if graph.fields.contains_key(&reference) {
                    effective.push(reference);
                } else {
                    orphans.push(OrphanedReference {
                        field: id.clone(),
                        missing: reference,
                    });
                }
            }
            graph.link_precedents(&id, effective);
        }

        for orphan in &orphans {
            if let Some(field) = graph.fields.get_mut(&orphan.field) {
                field.has_error = true;
            }
        }

        if let Some(path) = cycle::find_any_cycle(&graph) {
            return Err(EngineError::CyclicReference(path));
        }

        Ok((graph, orphans))
    }

    /// Returns counts useful for asserting the internal representation in tests.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            fields: self.fields.len(),
            edges: self.dependents.values().map(|set| set.len()).sum(),
            tables: self.tables.len(),
        }
    }

    #[must_use]
    pub fn field(&self, id: &FieldId) -> Option<&Field> {
        self.fields.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &FieldId) -> bool {
        self.fields.contains_key(id)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// Fields of `table`, sorted by id.
    #[must_use]
    pub fn fields_in_table(&self, table: &TableId) -> Vec<&Field> {
        self.tables
            .get(table)
            .into_iter()
            .flatten()
            .filter_map(|id| self.fields.get(id))
            .collect()
    }

    #[must_use]
    pub fn table_of(&self, id: &FieldId) -> Option<&TableId> {
        self.fields.get(id).map(|f| &f.table_id)
    }

    /// The fields `id` reads from, in definition order.
    #[must_use]
    pub fn precedents_of(&self, id: &FieldId) -> &[FieldId] {
        self.precedents.get(id).map_or(&[][..], |refs| refs.as_slice())
    }

    /// The fields reading `id` directly, sorted by id.
    #[must_use]
    pub fn dependents_of(&self, id: &FieldId) -> Vec<FieldId> {
        let mut out: Vec<FieldId> = self
            .dependents
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// All fields that transitively read any of `roots`.
    ///
    /// Roots are only included when they themselves depend on another root.
    #[must_use]
    pub fn dependent_closure<'a, I>(&self, roots: I) -> BTreeSet<FieldId>
    where
        I: IntoIterator<Item = &'a FieldId>,
    {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&FieldId> = roots.into_iter().collect();

        while let Some(cur) = queue.pop_front() {
            let Some(dependents) = self.dependents.get(cur) else {
                continue;
            };
            for dep in dependents {
                if seen.insert(dep.clone()) {
                    queue.push_back(dep);
                }
            }
        }

        seen
    }

    /// Checks that `field` could be added (or could replace its current definition).
    pub fn validate_field(&self, field: &Field) -> EngineResult<()> {
        self.validate_with(field, std::slice::from_ref(field))
    }

    /// Validates, cycle-checks and inserts a single field.
    pub fn add_or_replace_field(&mut self, field: Field) -> EngineResult<()> {
        self.add_fields(vec![field])
    }

    /// Validates, cycle-checks and inserts a batch of fields as one mutation.
    ///
    /// Fields in the batch may refer to each other (the two sides of a new link, a lookup
    /// through it). Nothing is inserted unless the whole batch is valid.
    pub fn add_fields(&mut self, fields: Vec<Field>) -> EngineResult<()> {
        for field in &fields {
            self.validate_with(field, &fields)?;
            if let Some(old) = self.fields.get(&field.id) {
                self.validate_replacement(old, field, &fields)?;
            }
        }

        let overlay: ReferenceOverlay = fields
            .iter()
            .map(|f| (f.id.clone(), f.references()))
            .collect();
        for field in &fields {
            let references = &overlay[&field.id];
            if let Some(path) =
                cycle::would_create_cycle_with(self, &overlay, &field.id, references)
            {
                return Err(EngineError::CyclicReference(path));
            }
        }

        for field in fields {
            self.insert_unchecked(field);
        }
        Ok(())
    }

    /// Replaces a field's stored definition without touching its edges (e.g. a rename).
    pub fn update_metadata(&mut self, field: Field) -> EngineResult<()> {
        let Some(existing) = self.fields.get_mut(&field.id) else {
            return Err(EngineError::UnknownField(field.id));
        };
        if !existing.same_computation(&field) {
            return Err(EngineError::Internal(format!(
                "metadata update of {} changes its computation",
                field.id
            )));
        }
        let has_error = existing.has_error;
        *existing = field;
        existing.has_error |= has_error;
        Ok(())
    }

    /// Removes a field and every edge touching it. Dependents keep existing but lose the
    /// reference; use [`ReferenceGraph::remove_field_cascade`] for the full deletion policy.
    pub fn remove_field(&mut self, id: &FieldId) -> Option<Field> {
        let field = self.fields.remove(id)?;

        if let Some(set) = self.tables.get_mut(&field.table_id) {
            set.remove(id);
            if set.is_empty() {
                self.tables.remove(&field.table_id);
            }
        }

        self.link_precedents(id, FieldReferences::new());

        if let Some(dependents) = self.dependents.remove(id) {
            for dep in dependents {
                if let Some(list) = self.precedents.get_mut(&dep) {
                    list.retain(|p| p != id);
                    if list.is_empty() {
                        self.precedents.remove(&dep);
                    }
                }
            }
        }

        Some(field)
    }

    /// Removes a field and applies the deletion policy to its dependents.
    ///
    /// - a lookup/rollup reading *through* a removed link is removed as well (it has no other
    ///   path to its data), and the cascade continues from it;
    /// - every other dependent is kept, flagged `has_error`, and loses only that reference;
    /// - removing one side of a two-way link removes the other side.
    pub fn remove_field_cascade(&mut self, id: &FieldId) -> EngineResult<RemovalReport> {
        if !self.fields.contains_key(id) {
            return Err(EngineError::UnknownField(id.clone()));
        }

        let mut report = RemovalReport::default();
        let mut queue: VecDeque<FieldId> = VecDeque::from([id.clone()]);

        while let Some(cur) = queue.pop_front() {
            let Some(field) = self.fields.get(&cur) else {
                continue;
            };
            let symmetric = field.symmetric_field_id().cloned();
            let dependents = self.dependents_of(&cur);

            self.remove_field(&cur);
            report.removed.push(cur.clone());

            if let Some(symmetric) = symmetric {
                if self.fields.contains_key(&symmetric) {
                    queue.push_back(symmetric);
                }
            }

            for dep_id in dependents {
                let Some(dep) = self.fields.get_mut(&dep_id) else {
                    continue;
                };
                if dep.via_link() == Some(&cur) {
                    queue.push_back(dep_id);
                } else {
                    dep.has_error = true;
                    report.orphaned.push(OrphanedReference {
                        field: dep_id,
                        missing: cur.clone(),
                    });
                }
            }
        }

        report.normalize();
        log::debug!(
            "removed field {id}: {} removed, {} orphaned references",
            report.removed.len(),
            report.orphaned.len()
        );
        Ok(report)
    }

    /// Hard-removes every field of `table`, cascading into other tables.
    pub fn purge_table(&mut self, table: &TableId) -> RemovalReport {
        let ids: Vec<FieldId> = self
            .tables
            .get(table)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut report = RemovalReport::default();
        for id in ids {
            if !self.fields.contains_key(&id) {
                continue;
            }
            if let Ok(partial) = self.remove_field_cascade(&id) {
                report.merge(partial);
            }
        }
        report.normalize();
        report
    }

    fn resolve<'a>(&'a self, pending: &'a [Field], id: &FieldId) -> Option<&'a Field> {
        pending
            .iter()
            .find(|f| &f.id == id)
            .or_else(|| self.fields.get(id))
    }

    fn validate_with(&self, field: &Field, pending: &[Field]) -> EngineResult<()> {
        if field.is_deleted {
            return Err(EngineError::invalid(&field.id, "field is deleted"));
        }

        for reference in field.references() {
            if self.resolve(pending, &reference).is_none() {
                return Err(EngineError::invalid(
                    &field.id,
                    format!("references unknown field {reference}"),
                ));
            }
        }

        match &field.kind {
            FieldKind::Normal => Ok(()),
            FieldKind::Link(options) => {
                let Some(symmetric_id) = &options.symmetric_field_id else {
                    return Ok(());
                };
                if symmetric_id == &field.id {
                    return Err(EngineError::invalid(
                        &field.id,
                        "a link cannot be its own symmetric field",
                    ));
                }
                let Some(symmetric) = self.resolve(pending, symmetric_id) else {
                    return Err(EngineError::invalid(
                        &field.id,
                        format!("symmetric field {symmetric_id} does not exist"),
                    ));
                };
                let Some(symmetric_options) = symmetric.link_options() else {
                    return Err(EngineError::invalid(
                        &field.id,
                        format!("symmetric field {symmetric_id} is not a link"),
                    ));
                };
                if symmetric_options.symmetric_field_id.as_ref() != Some(&field.id) {
                    return Err(EngineError::invalid(
                        &field.id,
                        format!("symmetric field {symmetric_id} does not point back"),
                    ));
                }
                if symmetric.table_id != options.foreign_table_id
                    || symmetric_options.foreign_table_id != field.table_id
                {
                    return Err(EngineError::invalid(
                        &field.id,
                        format!("symmetric field {symmetric_id} links a different pair of tables"),
                    ));
                }
                if symmetric_options.relationship != options.relationship.symmetric() {
                    return Err(EngineError::invalid(
                        &field.id,
                        format!(
                            "symmetric field {symmetric_id} is {:?}, expected {:?}",
                            symmetric_options.relationship,
                            options.relationship.symmetric()
                        ),
                    ));
                }
                Ok(())
            }
            FieldKind::Lookup(options) => self.validate_through_link(
                field,
                &options.link_field_id,
                &options.foreign_table_id,
                &options.lookup_field_id,
                pending,
            ),
            FieldKind::Rollup(options) => self.validate_through_link(
                field,
                &options.link_field_id,
                &options.foreign_table_id,
                &options.lookup_field_id,
                pending,
            ),
            FieldKind::Formula(_) => {
                for reference in field.references() {
                    let Some(target) = self.resolve(pending, &reference) else {
                        continue;
                    };
                    if target.table_id != field.table_id {
                        return Err(EngineError::invalid(
                            &field.id,
                            format!(
                                "formula reads {reference} from table {}; values from other tables must go through a link",
                                target.table_id
                            ),
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    fn validate_through_link(
        &self,
        field: &Field,
        link_id: &FieldId,
        foreign_table: &TableId,
        lookup_id: &FieldId,
        pending: &[Field],
    ) -> EngineResult<()> {
        let Some(link) = self.resolve(pending, link_id) else {
            return Err(EngineError::invalid(
                &field.id,
                format!("link field {link_id} does not exist"),
            ));
        };
        let Some(link_options) = link.link_options() else {
            return Err(EngineError::invalid(
                &field.id,
                format!("{link_id} is not a link field"),
            ));
        };
        if link.table_id != field.table_id {
            return Err(EngineError::invalid(
                &field.id,
                format!("link field {link_id} belongs to table {}", link.table_id),
            ));
        }
        if &link_options.foreign_table_id != foreign_table {
            return Err(EngineError::invalid(
                &field.id,
                format!(
                    "link field {link_id} points to table {}, not {foreign_table}",
                    link_options.foreign_table_id
                ),
            ));
        }
        match self.resolve(pending, lookup_id) {
            Some(target) if &target.table_id == foreign_table => Ok(()),
            Some(target) => Err(EngineError::invalid(
                &field.id,
                format!(
                    "looked-up field {lookup_id} belongs to table {}, not {foreign_table}",
                    target.table_id
                ),
            )),
            None => Err(EngineError::invalid(
                &field.id,
                format!("looked-up field {lookup_id} does not exist"),
            )),
        }
    }

    /// Extra checks when `new` replaces `old`: the field stays in its table, a two-way link
    /// keeps its pairing, and lookups reading through it stay valid.
    fn validate_replacement(&self, old: &Field, new: &Field, pending: &[Field]) -> EngineResult<()> {
        if old.table_id != new.table_id {
            return Err(EngineError::invalid(
                &new.id,
                format!("field cannot move from table {} to {}", old.table_id, new.table_id),
            ));
        }

        if let Some(symmetric) = old.symmetric_field_id() {
            let still_paired = new.symmetric_field_id() == Some(symmetric)
                || pending.iter().any(|f| &f.id == symmetric);
            if !still_paired {
                return Err(EngineError::invalid(
                    &new.id,
                    format!("two-way link is still paired with {symmetric}"),
                ));
            }
        }

        for dep_id in self.dependents_of(&old.id) {
            let Some(dep) = self.resolve(pending, &dep_id) else {
                continue;
            };
            if dep.via_link() != Some(&old.id) {
                continue;
            }
            let foreign_table = match &dep.kind {
                FieldKind::Lookup(options) => &options.foreign_table_id,
                FieldKind::Rollup(options) => &options.foreign_table_id,
                _ => continue,
            };
            let still_valid = new
                .link_options()
                .is_some_and(|options| &options.foreign_table_id == foreign_table);
            if !still_valid {
                return Err(EngineError::invalid(
                    &new.id,
                    format!("{dep_id} reads through this link into table {foreign_table}"),
                ));
            }
        }

        Ok(())
    }

    fn insert_unchecked(&mut self, field: Field) {
        let id = field.id.clone();
        self.tables
            .entry(field.table_id.clone())
            .or_default()
            .insert(id.clone());
        let references = field.references();
        self.fields.insert(id.clone(), field);
        self.link_precedents(&id, references);
    }

    /// Replaces the stored precedents of `id`, keeping the reverse map in sync.
    fn link_precedents(&mut self, id: &FieldId, references: FieldReferences) {
        if let Some(old) = self.precedents.remove(id) {
            for precedent in old {
                if let Some(set) = self.dependents.get_mut(&precedent) {
                    set.remove(id);
                    if set.is_empty() {
                        self.dependents.remove(&precedent);
                    }
                }
            }
        }

        for precedent in &references {
            self.dependents
                .entry(precedent.clone())
                .or_default()
                .insert(id.clone());
        }
        if !references.is_empty() {
            self.precedents.insert(id.clone(), references);
        }
    }
}

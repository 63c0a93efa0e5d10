use super::ReferenceGraph;
use ahash::{AHashMap, AHashSet};
use std::fmt;
use tabula_model::{FieldId, FieldReferences};

/// A reference cycle, in reading order: each field reads the next one, and the last entry
/// repeats the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePath {
    pub path: Vec<FieldId>,
}

impl fmt::Display for CyclePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circular reference: ")?;
        for (idx, field) in self.path.iter().enumerate() {
            if idx > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CyclePath {}

/// Pending reference sets that shadow the graph's stored edges while a mutation is validated.
pub(crate) type ReferenceOverlay = AHashMap<FieldId, FieldReferences>;

fn precedents<'a>(
    graph: &'a ReferenceGraph,
    overlay: &'a ReferenceOverlay,
    field: &FieldId,
) -> &'a [FieldId] {
    match overlay.get(field) {
        Some(refs) => refs,
        None => graph.precedents_of(field),
    }
}

/// Checks whether giving `candidate` the reference set `references` would close a cycle.
///
/// The candidate's current edges are ignored (they are the ones being replaced). Returns the
/// offending path `[candidate, ..., candidate]`.
#[must_use]
pub fn would_create_cycle(
    graph: &ReferenceGraph,
    candidate: &FieldId,
    references: &[FieldId],
) -> Option<CyclePath> {
    would_create_cycle_with(graph, &ReferenceOverlay::default(), candidate, references)
}

pub(crate) fn would_create_cycle_with(
    graph: &ReferenceGraph,
    overlay: &ReferenceOverlay,
    candidate: &FieldId,
    references: &[FieldId],
) -> Option<CyclePath> {
    if references.contains(candidate) {
        return Some(CyclePath {
            path: vec![candidate.clone(), candidate.clone()],
        });
    }

    struct Frame {
        node: FieldId,
        neighbors: Vec<FieldId>,
        idx: usize,
    }

    let mut visited: AHashSet<FieldId> = AHashSet::new();
    for start in references {
        if !visited.insert(start.clone()) {
            continue;
        }

        let mut frames = vec![Frame {
            node: start.clone(),
            neighbors: precedents(graph, overlay, start).to_vec(),
            idx: 0,
        }];

        while let Some(frame) = frames.last_mut() {
            if frame.idx >= frame.neighbors.len() {
                frames.pop();
                continue;
            }

            let next = frame.neighbors[frame.idx].clone();
            frame.idx += 1;

            if &next == candidate {
                let mut path = Vec::with_capacity(frames.len() + 2);
                path.push(candidate.clone());
                path.extend(frames.iter().map(|f| f.node.clone()));
                path.push(candidate.clone());
                return Some(CyclePath { path });
            }

            if visited.insert(next.clone()) {
                let neighbors = precedents(graph, overlay, &next).to_vec();
                frames.push(Frame {
                    node: next,
                    neighbors,
                    idx: 0,
                });
            }
        }
    }

    None
}

/// Finds any cycle in the graph. Fields are visited in id order so the reported path is
/// deterministic.
#[must_use]
pub fn find_any_cycle(graph: &ReferenceGraph) -> Option<CyclePath> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    struct Frame<'a> {
        node: &'a FieldId,
        neighbors: &'a [FieldId],
        idx: usize,
    }

    let mut color: AHashMap<&FieldId, Color> =
        graph.fields().map(|f| (&f.id, Color::White)).collect();
    let mut nodes: Vec<&FieldId> = color.keys().copied().collect();
    nodes.sort();

    let mut stack: Vec<&FieldId> = Vec::new();
    let mut pos_in_stack: AHashMap<&FieldId, usize> = AHashMap::new();

    for start in nodes {
        if color.get(start) != Some(&Color::White) {
            continue;
        }

        let mut frames = vec![Frame {
            node: start,
            neighbors: graph.precedents_of(start),
            idx: 0,
        }];
        stack.push(start);
        pos_in_stack.insert(start, 0);
        color.insert(start, Color::Gray);

        while let Some(frame) = frames.last_mut() {
            if frame.idx >= frame.neighbors.len() {
                color.insert(frame.node, Color::Black);
                pos_in_stack.remove(frame.node);
                stack.pop();
                frames.pop();
                continue;
            }

            let neighbors: &[FieldId] = frame.neighbors;
            let next = &neighbors[frame.idx];
            frame.idx += 1;

            match color.get(next).copied().unwrap_or(Color::Black) {
                Color::White => {
                    color.insert(next, Color::Gray);
                    stack.push(next);
                    pos_in_stack.insert(next, stack.len() - 1);
                    frames.push(Frame {
                        node: next,
                        neighbors: graph.precedents_of(next),
                        idx: 0,
                    });
                }
                Color::Gray => {
                    let start_idx = pos_in_stack.get(next).copied().unwrap_or(0);
                    let mut path: Vec<FieldId> =
                        stack[start_idx..].iter().map(|&id| id.clone()).collect();
                    path.push(next.clone());
                    return Some(CyclePath { path });
                }
                Color::Black => {}
            }
        }
    }

    None
}

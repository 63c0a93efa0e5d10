//! Field reference graph and cycle detection.

mod cycle;
mod reference_graph;

pub use cycle::{find_any_cycle, would_create_cycle, CyclePath};
pub use reference_graph::{GraphStats, ReferenceGraph, RemovalReport};

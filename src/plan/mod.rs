//! Backlog manifest loading and dependency-ordered scheduling.
//!
//! The backlog is an authored JSON manifest (`{"tasks": [...]}`); loading
//! validates ids and the dependency graph, and scheduling emits a
//! deterministic topological order. Validation never repairs the manifest:
//! duplicate ids, sequence gaps, unknown dependencies, and cycles are all
//! hard errors surfaced to the operator.

pub mod item;
pub mod scheduler;

pub use item::WorkItem;
pub use scheduler::{collect_items, order_items, schedule, SequenceRule};

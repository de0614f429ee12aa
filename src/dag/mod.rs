//! Generic DAG (Directed Acyclic Graph) infrastructure.
//!
//! This module provides the core primitives for the content-addressed channel
//! graph:
//!
//! - [`ContentHash`]: 64-byte SHA3-512 content address for any node
//! - [`DagNodeOps`]: Trait for types that can participate in DAG operations
//! - DAG algorithms: deterministic topological ordering with cycle detection
//!
//! These primitives are domain-agnostic; the channel module builds on them.

mod hash;
pub mod ops;

pub use hash::{current_timestamp_millis, ContentHash};
pub use ops::{topological_order, DagNodeOps, TopologicalOrder};

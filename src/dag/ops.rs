//! Generic DAG operations for replay and import.
//!
//! These algorithms work on any DAG structure and are used for:
//! - Ordering a dump of nodes so parents are applied before children
//! - Detecting nodes that can never be applied because their references loop
//!
//! The operations are generic over node types via the `DagNodeOps` trait,
//! supporting both the in-memory graph and persistent storage backends.

use crate::dag::ContentHash;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Trait for types that can participate in DAG operations.
///
/// This trait provides the minimal interface needed for generic DAG algorithms
/// like topological sorting.
pub trait DagNodeOps {
    /// Returns the content hash of this node.
    fn hash(&self) -> &ContentHash;

    /// Returns the hashes of this node's parent nodes.
    fn parent_hashes(&self) -> Vec<ContentHash>;

    /// Returns the creation timestamp in milliseconds since Unix epoch.
    fn created_at(&self) -> u64;
}

/// Result of ordering a set of nodes.
#[derive(Debug)]
pub struct TopologicalOrder<'a, N> {
    /// Nodes whose in-set parents all precede them.
    pub ordered: Vec<&'a N>,
    /// Nodes that sit on, or depend on, a reference cycle.
    pub cyclic: Vec<&'a N>,
}

/// Sorts nodes into topological order (parents before children).
///
/// Uses Kahn's algorithm with `(created_at, hash)` as the tiebreaker so the
/// output is deterministic. Parents that are not part of the input are
/// ignored; callers decide what to do with nodes whose parents are missing.
/// Nodes that can never become ready are returned in `cyclic` instead of
/// looping forever.
pub fn topological_order<N: DagNodeOps>(nodes: &HashMap<ContentHash, N>) -> TopologicalOrder<'_, N> {
    let mut pending_parents: HashMap<ContentHash, usize> = HashMap::with_capacity(nodes.len());
    let mut children: HashMap<ContentHash, Vec<ContentHash>> = HashMap::new();

    for (hash, node) in nodes {
        let in_set: HashSet<ContentHash> = node
            .parent_hashes()
            .into_iter()
            .filter(|p| nodes.contains_key(p) && p != hash)
            .collect();
        for parent in &in_set {
            children.entry(*parent).or_default().push(*hash);
        }
        let self_loop = node.parent_hashes().contains(hash);
        pending_parents.insert(*hash, in_set.len() + usize::from(self_loop));
    }

    let mut ready: BinaryHeap<Reverse<(u64, ContentHash)>> = pending_parents
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(hash, _)| Reverse((nodes[hash].created_at(), *hash)))
        .collect();

    let mut ordered = Vec::with_capacity(nodes.len());
    while let Some(Reverse((_, hash))) = ready.pop() {
        ordered.push(&nodes[&hash]);
        if let Some(kids) = children.get(&hash) {
            for child in kids {
                if let Some(count) = pending_parents.get_mut(child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse((nodes[child].created_at(), *child)));
                    }
                }
            }
        }
    }

    let placed: HashSet<ContentHash> = ordered.iter().map(|n| *n.hash()).collect();
    let mut cyclic: Vec<&N> = nodes
        .values()
        .filter(|n| !placed.contains(n.hash()))
        .collect();
    cyclic.sort_by_key(|n| (n.created_at(), *n.hash()));

    TopologicalOrder { ordered, cyclic }
}

//! Consistent-hash ring mapping cache keys to the node that owns them.
//!
//! Each node is placed on a 32-bit CRC ring `replicas` times, at the hash of
//! `"<index><name>"`. A key belongs to the first point at or after its own hash,
//! wrapping around at the end of the ring. Adding a node only steals the arcs in front
//! of its points, so roughly `1/N` of the keys move.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// Replica count used when none is configured.
pub const DEFAULT_REPLICAS: usize = 20;

#[derive(Debug, Default)]
struct RingState {
    points: BTreeMap<u32, String>,
    members: BTreeSet<String>,
}

/// Consistent-hash ring safe for concurrent lookups.
#[derive(Debug)]
pub struct ClusterRing {
    replicas: usize,
    state: RwLock<RingState>,
}

impl Default for ClusterRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

impl ClusterRing {
    /// Creates an empty ring placing every node `replicas` times.
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            state: RwLock::new(RingState::default()),
        }
    }

    /// Builds a ring from a list of node names.
    pub fn with_nodes<I, S>(replicas: usize, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ring = Self::new(replicas);
        for node in nodes {
            ring.add_node(node.as_ref());
        }
        ring
    }

    /// Number of points per node.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Adds `name` to the ring. Adding an existing member is a no-op.
    pub fn add_node(&self, name: &str) {
        let mut state = self.state.write();
        if !state.members.insert(name.to_string()) {
            return;
        }
        for idx in 0..self.replicas {
            state
                .points
                .insert(point_hash(&replica_key(name, idx)), name.to_string());
        }
    }

    /// Removes `name` and all of its points.
    pub fn remove(&self, name: &str) {
        let mut state = self.state.write();
        if !state.members.remove(name) {
            return;
        }
        for idx in 0..self.replicas {
            let hash = point_hash(&replica_key(name, idx));
            if state.points.get(&hash).is_some_and(|owner| owner == name) {
                state.points.remove(&hash);
            }
        }
    }

    /// Node responsible for `key`, or `None` on an empty ring.
    pub fn locate_node(&self, key: &str) -> Option<String> {
        let state = self.state.read();
        let hash = point_hash(key);
        state
            .points
            .range(hash..)
            .next()
            .or_else(|| state.points.iter().next())
            .map(|(_, node)| node.clone())
    }

    /// Current members in name order.
    pub fn members(&self) -> Vec<String> {
        self.state.read().members.iter().cloned().collect()
    }

    /// Number of member nodes.
    pub fn len(&self) -> usize {
        self.state.read().members.len()
    }

    /// True if the ring has no members.
    pub fn is_empty(&self) -> bool {
        self.state.read().members.is_empty()
    }
}

fn replica_key(name: &str, idx: usize) -> String {
    format!("{idx}{name}")
}

fn point_hash(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_locates_nothing() {
        let ring = ClusterRing::new(10);
        assert!(ring.locate_node("anything").is_none());
        assert!(ring.is_empty());
    }

    #[test]
    fn single_node_owns_everything() {
        let ring = ClusterRing::with_nodes(10, ["graph-00"]);
        for i in 0..100 {
            assert_eq!(ring.locate_node(&format!("key-{i}")).as_deref(), Some("graph-00"));
        }
    }

    #[test]
    fn duplicate_add_is_ignored_and_remove_clears_points() {
        let ring = ClusterRing::with_nodes(16, ["a", "b"]);
        ring.add_node("a");
        assert_eq!(ring.len(), 2);
        ring.remove("a");
        assert_eq!(ring.members(), vec!["b".to_string()]);
        for i in 0..50 {
            assert_eq!(ring.locate_node(&format!("k{i}")).as_deref(), Some("b"));
        }
    }

    #[test]
    fn lookup_is_deterministic() {
        let ring = ClusterRing::with_nodes(50, ["a", "b", "c"]);
        let first = ring.locate_node("host1/cpu.busy/300");
        for _ in 0..10 {
            assert_eq!(ring.locate_node("host1/cpu.busy/300"), first);
        }
    }
}

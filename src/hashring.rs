//! Weighted consistent-hash ring.
//!
//! Each node contributes `weight` points to the ring, hashed with FNV-1a-32
//! over `"{i}-{node}"`. The ring is kept sorted by descending hash;
//! [`HashRing::find_node`] hashes the key and walks to the first point at or
//! below it, wrapping to the top of the ring when the key hashes below every
//! point. Lookups for a key are stable until the owning node is removed.

use std::collections::HashMap;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[derive(Debug, Clone, Copy)]
struct RingPoint {
    sum: u32,
    node_id: u32,
}

/// A consistent-hash ring over weighted string-valued nodes.
#[derive(Debug, Default)]
pub struct HashRing {
    value_to_id: HashMap<String, u32>,
    id_to_value: HashMap<u32, String>,
    next_node_id: u32,
    points: Vec<RingPoint>,
}

impl HashRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `node_value` with `node_weight` points on the ring.
    ///
    /// Returns false (and changes nothing) if the node is already present.
    pub fn add_node(&mut self, node_value: &str, node_weight: u32) -> bool {
        if self.value_to_id.contains_key(node_value) {
            return false;
        }
        let node_id = self.next_node_id;
        self.next_node_id = self.next_node_id.wrapping_add(1);
        self.value_to_id.insert(node_value.to_owned(), node_id);
        self.id_to_value.insert(node_id, node_value.to_owned());

        for i in 0..node_weight {
            let sum = fnv1a32(format!("{i}-{node_value}").as_bytes());
            self.points.push(RingPoint { sum, node_id });
        }
        self.points.sort_unstable_by(|a, b| b.sum.cmp(&a.sum));
        true
    }

    /// Removes `node_value` and all its points.
    ///
    /// Returns false if the node was not present.
    pub fn remove_node(&mut self, node_value: &str) -> bool {
        let Some(node_id) = self.value_to_id.remove(node_value) else {
            return false;
        };
        self.id_to_value.remove(&node_id);
        self.points.retain(|point| point.node_id != node_id);
        true
    }

    /// Returns the node owning `key`, or `None` on an empty ring.
    #[must_use]
    pub fn find_node(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let sum = fnv1a32(key.as_bytes());
        // First point at or below the key's hash; the ring is descending.
        let mut i = self.points.partition_point(|point| point.sum > sum);
        if i == self.points.len() {
            i = 0;
        }
        self.id_to_value
            .get(&self.points[i].node_id)
            .map(String::as_str)
    }

    /// Number of distinct nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.value_to_id.len()
    }
}

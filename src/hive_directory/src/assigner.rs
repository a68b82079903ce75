use log::debug;
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::{Node, NodeId};

/// Picks the node a new primary index key is placed on.
///
/// `writable` is never empty; the facade refuses the insert before asking.
pub trait Assigner: Send + Sync {
    fn choose_node<'a>(&self, writable: &'a [Node], key: &str) -> &'a Node;
}

/// Uniform choice over the writable nodes.
#[derive(Debug, Default)]
pub struct RandomAssigner;

impl RandomAssigner {
    pub fn new() -> Self {
        Self
    }
}

impl Assigner for RandomAssigner {
    fn choose_node<'a>(&self, writable: &'a [Node], _key: &str) -> &'a Node {
        let index = rand::rng().random_range(0..writable.len());
        &writable[index]
    }
}

#[derive(Debug)]
struct MaglevTable {
    /// (node id, weight) of every writable node the table was built for, in slice order
    signature: Vec<(NodeId, u32)>,
    /// lookup[hash % table_size] = position in the writable slice
    lookup: Vec<i32>,
    table_size: usize,
}

/// Weighted Maglev placement: the same key lands on the same node for as long as the
/// writable set does not change, and a set change moves roughly `1/N` of the keys.
///
/// Node weight is `Node::capacity`; a zero-capacity node is never chosen unless every
/// writable node has zero capacity, in which case all count as weight 1.
#[derive(Debug, Default)]
pub struct ConsistentHashAssigner {
    table: Mutex<Option<MaglevTable>>,
}

impl ConsistentHashAssigner {
    /// Small prime for small clusters (< 6000 total weight)
    const SMALL_TABLE_SIZE: usize = 65537;

    /// Medium prime for everything larger
    const MEDIUM_TABLE_SIZE: usize = 655373;

    pub fn new() -> Self {
        Self::default()
    }

    fn choose_table_size(total_weight: u64) -> usize {
        if total_weight < 6000 {
            Self::SMALL_TABLE_SIZE
        } else {
            Self::MEDIUM_TABLE_SIZE
        }
    }

    #[inline]
    fn hash_with_seed(s: &str, seed: u64) -> u64 {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        s.hash(&mut hasher);
        hasher.finish()
    }

    fn signature_of(writable: &[Node]) -> Vec<(NodeId, u32)> {
        let mut signature: Vec<(NodeId, u32)> =
            writable.iter().map(|node| (node.id, node.capacity)).collect();
        if signature.iter().all(|(_, weight)| *weight == 0) {
            for entry in signature.iter_mut() {
                entry.1 = 1;
            }
        }
        signature
    }

    /// Builds the lookup table: every node walks its own preference sequence
    /// `offset, offset + skip, ...` and claims `weight` empty slots per round.
    fn build(signature: Vec<(NodeId, u32)>) -> MaglevTable {
        let total_weight: u64 = signature.iter().map(|(_, w)| *w as u64).sum();
        let m = Self::choose_table_size(total_weight);

        let mut params: Vec<(usize, usize, u32, usize)> = Vec::new();
        for (position, (node_id, weight)) in signature.iter().enumerate() {
            if *weight == 0 {
                continue;
            }
            let node_key = node_id.to_string();
            let h1 = Self::hash_with_seed(&node_key, 0);
            let h2 = Self::hash_with_seed(&node_key, 1);
            let offset = (h1 % m as u64) as usize;
            let skip = ((h2 % (m as u64 - 1)) + 1) as usize;
            params.push((offset, skip, *weight, position));
        }

        let n = params.len();
        if n == 0 {
            return MaglevTable {
                signature,
                lookup: Vec::new(),
                table_size: m,
            };
        }
        let mut table: Vec<i32> = vec![-1; m];
        let mut next: Vec<usize> = vec![0; n];
        let mut weight_counter: Vec<u32> = params.iter().map(|p| p.2).collect();
        let mut filled = 0;

        while filled < m {
            for i in 0..n {
                if weight_counter[i] == 0 {
                    continue;
                }
                weight_counter[i] -= 1;

                let (offset, skip, _, position) = params[i];
                let mut pos = (offset + next[i] * skip) % m;
                while table[pos] != -1 {
                    next[i] += 1;
                    pos = (offset + next[i] * skip) % m;
                }

                table[pos] = position as i32;
                next[i] += 1;
                filled += 1;
                if filled == m {
                    break;
                }
            }

            if weight_counter.iter().all(|&w| w == 0) {
                for (i, p) in params.iter().enumerate() {
                    weight_counter[i] = p.2;
                }
            }
        }

        debug!(
            "ConsistentHashAssigner: built table of {} slots for {} nodes",
            m, n
        );
        MaglevTable {
            signature,
            lookup: table,
            table_size: m,
        }
    }

    #[inline]
    fn hash_key(key: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

impl Assigner for ConsistentHashAssigner {
    fn choose_node<'a>(&self, writable: &'a [Node], key: &str) -> &'a Node {
        let signature = Self::signature_of(writable);
        let mut guard = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let stale = match guard.as_ref() {
            Some(table) => table.signature != signature,
            None => true,
        };
        if stale {
            *guard = Some(Self::build(signature));
        }

        let position = match guard.as_ref() {
            Some(table) if !table.lookup.is_empty() => {
                let index = (Self::hash_key(key) % table.table_size as u64) as usize;
                table.lookup[index] as usize
            }
            _ => 0,
        };
        &writable[position]
    }
}

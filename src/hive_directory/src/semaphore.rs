use serde::{Deserialize, Serialize};

use crate::{NodeId, Status};

/// One replica of a primary index key: where it lives and whether it accepts writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySemaphore<K> {
    pub key: K,
    pub node_id: NodeId,
    pub status: Status,
}

impl<K> KeySemaphore<K> {
    pub fn new(key: K, node_id: NodeId, status: Status) -> Self {
        Self {
            key,
            node_id,
            status,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.status.is_read_only()
    }
}

/// A key is read-only when any of its replicas is.
pub fn any_read_only<K>(semaphores: &[KeySemaphore<K>]) -> bool {
    semaphores.iter().any(|s| s.is_read_only())
}

pub fn node_ids_of<K>(semaphores: &[KeySemaphore<K>]) -> Vec<NodeId> {
    let mut node_ids: Vec<NodeId> = Vec::with_capacity(semaphores.len());
    for semaphore in semaphores {
        if !node_ids.contains(&semaphore.node_id) {
            node_ids.push(semaphore.node_id);
        }
    }
    node_ids
}

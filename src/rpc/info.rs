use crate::common::Key;

use super::{Rpc, State};

/// Information and statistics about this node.
#[derive(Debug, Clone)]
pub struct Info {
    id: Key,
    endpoint: String,
    state: State,
    routing_table_size: usize,
    chunk_count: usize,
    dead_peers: usize,
}

impl Info {
    /// This node's [Key]
    pub fn id(&self) -> &Key {
        &self.id
    }
    /// The `"host:port"` endpoint other peers reach this node at.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Number of peers in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }

    /// Number of chunks stored locally.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Number of peers evicted after failing to answer a request.
    pub fn dead_peers(&self) -> usize {
        self.dead_peers
    }
}

impl From<&Rpc> for Info {
    fn from(rpc: &Rpc) -> Self {
        Self {
            id: *rpc.id(),
            endpoint: rpc.self_peer().endpoint.clone(),
            state: rpc.state(),
            routing_table_size: rpc.routing_table_size(),
            chunk_count: rpc.chunk_count(),
            dead_peers: rpc.dead_peers(),
        }
    }
}

//! Outbound requests, each passing the contacted peer through the liveness path.

use tracing::{debug, trace};

use crate::common::{
    Chunk, Key, Peer, RequestSpecific, RequestTypeSpecific, ResponseSpecific,
    StoreRequestArguments, TargetRequestArguments,
};

use super::iterative_query::FindValueResult;
use super::socket::{self, RpcError};
use super::Rpc;

impl Rpc {
    /// Ping a peer, returning the peer that answered.
    pub fn ping(&self, peer: &Peer) -> Option<Peer> {
        match self.call(peer, RequestTypeSpecific::Ping) {
            Some(ResponseSpecific::Ping(arguments)) => Some(arguments.responder),
            _ => None,
        }
    }

    /// Ask a peer for its closest peers to `target`.
    pub fn find_node(&self, peer: &Peer, target: &Key) -> Option<Vec<Peer>> {
        let request = RequestTypeSpecific::FindNode(TargetRequestArguments { target: *target });

        match self.call(peer, request) {
            Some(ResponseSpecific::Nodes(arguments)) => Some(self.discovered(arguments.nodes)),
            _ => None,
        }
    }

    /// Ask a peer for a chunk, or for its closest peers to the chunk's key.
    pub fn find_value(&self, peer: &Peer, target: &Key) -> Option<FindValueResult> {
        let request = RequestTypeSpecific::FindValue(TargetRequestArguments { target: *target });

        match self.call(peer, request) {
            Some(ResponseSpecific::Value(arguments)) => Some(FindValueResult::Found(arguments.v)),
            Some(ResponseSpecific::Nodes(arguments)) => {
                Some(FindValueResult::Closest(self.discovered(arguments.nodes)))
            }
            _ => None,
        }
    }

    /// Store a chunk on a peer, returns `true` if the peer holds it afterwards.
    ///
    /// A peer that already holds the chunk is spared the payload, unless we are its
    /// original publisher, in which case its copy is overwritten with ours.
    pub fn store(&self, peer: &Peer, chunk: &Chunk) -> bool {
        let init = RequestTypeSpecific::StoreInit(TargetRequestArguments {
            target: *chunk.key(),
        });

        let continue_store = match self.call(peer, init) {
            Some(ResponseSpecific::StoreInit(arguments)) => arguments.continue_store,
            _ => return false,
        };

        if !continue_store && !chunk.original_publisher() {
            trace!(?peer, key = %chunk.key(), "Peer already holds chunk");
            return true;
        }

        let request = RequestTypeSpecific::Store(StoreRequestArguments {
            target: *chunk.key(),
            v: chunk.data().clone(),
            published_at: chunk.published_at_millis(),
        });

        matches!(self.call(peer, request), Some(ResponseSpecific::Ping(_)))
    }

    /// Ping a peer without any effect on the routing table.
    pub(crate) fn probe(&self, peer: &Peer) -> Result<Peer, RpcError> {
        match self.send(peer, RequestTypeSpecific::Ping)? {
            ResponseSpecific::Ping(arguments) => Ok(arguments.responder),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    // === Private Methods ===

    /// Send a request and update the routing table with the outcome.
    ///
    /// Peers that can't be reached are evicted.
    fn call(&self, peer: &Peer, request_type: RequestTypeSpecific) -> Option<ResponseSpecific> {
        match self.send(peer, request_type) {
            Ok(response) => {
                self.peer_responded(peer, responder(&response));

                Some(response)
            }
            Err(error) if error.is_transport_failure() => {
                debug!(?peer, ?error, "Request failed");
                self.evict_dead_peer(&peer.key);

                None
            }
            Err(error) => {
                debug!(?peer, ?error, "Request rejected");
                self.update_peer(peer.clone());

                None
            }
        }
    }

    fn send(
        &self,
        peer: &Peer,
        request_type: RequestTypeSpecific,
    ) -> Result<ResponseSpecific, RpcError> {
        let address = peer.socket_addr()?;

        let request = RequestSpecific {
            requester: self.self_peer().clone(),
            request_type,
        };

        socket::request(address, request, self.config().request_timeout)
    }

    /// The peer answering at `contacted.endpoint` proved it owns `responder.key`.
    fn peer_responded(&self, contacted: &Peer, responder: &Peer) {
        if responder.key != contacted.key {
            debug!(?contacted, ?responder, "Peer answered under a different key");
            self.routing_table().evict_peer(&contacted.key);
        }

        self.update_peer(Peer::new(responder.key, contacted.endpoint.clone()));
    }

    /// Merge peers from an answer into the routing table, returning them without
    /// our own entry.
    fn discovered(&self, nodes: Vec<Peer>) -> Vec<Peer> {
        nodes
            .into_iter()
            .filter(|peer| peer.key != *self.id())
            .inspect(|peer| self.store_discovered_peer(peer.clone()))
            .collect()
    }
}

fn responder(response: &ResponseSpecific) -> &Peer {
    match response {
        ResponseSpecific::Ping(arguments) => &arguments.responder,
        ResponseSpecific::Nodes(arguments) => &arguments.responder,
        ResponseSpecific::Value(arguments) => &arguments.responder,
        ResponseSpecific::StoreInit(arguments) => &arguments.responder,
    }
}

use std::collections::hash_map::Entry;
use std::net::SocketAddr;

use tracing::{debug, trace};

use crate::common::{
    from_unix_millis, Chunk, NodesResponseArguments, PingResponseArguments, RequestSpecific,
    RequestTypeSpecific, ResponseSpecific, StoreInitResponseArguments, StoreRequestArguments,
    ValueResponseArguments, MAX_BUCKET_SIZE_K,
};

use super::socket::KrpcSocket;
use super::Rpc;

impl Rpc {
    /// Answer an inbound request, then pass the requester through the liveness path.
    ///
    /// Requests arriving during teardown are dropped unanswered.
    pub(crate) fn handle_request(
        &self,
        socket: &KrpcSocket,
        from: SocketAddr,
        transaction_id: u16,
        request: RequestSpecific,
    ) {
        if self.is_dying() {
            trace!(?from, "Dropping request while dying");
            return;
        }

        let RequestSpecific {
            requester,
            request_type,
        } = request;

        let response = match request_type {
            RequestTypeSpecific::Ping => ResponseSpecific::Ping(self.receipt()),
            RequestTypeSpecific::FindNode(arguments) => {
                ResponseSpecific::Nodes(NodesResponseArguments {
                    responder: self.self_peer().clone(),
                    nodes: self
                        .routing_table()
                        .closest_peers(&arguments.target, MAX_BUCKET_SIZE_K),
                })
            }
            RequestTypeSpecific::FindValue(arguments) => match self.local_chunk(&arguments.target)
            {
                Some(v) => ResponseSpecific::Value(ValueResponseArguments {
                    responder: self.self_peer().clone(),
                    v,
                }),
                None => ResponseSpecific::Nodes(NodesResponseArguments {
                    responder: self.self_peer().clone(),
                    nodes: self
                        .routing_table()
                        .closest_peers(&arguments.target, MAX_BUCKET_SIZE_K),
                }),
            },
            RequestTypeSpecific::StoreInit(arguments) => {
                ResponseSpecific::StoreInit(StoreInitResponseArguments {
                    responder: self.self_peer().clone(),
                    continue_store: !self.has_local_chunk(&arguments.target),
                })
            }
            RequestTypeSpecific::Store(arguments) => {
                self.accept_replica(arguments);

                ResponseSpecific::Ping(self.receipt())
            }
        };

        socket.response(from, transaction_id, response);

        self.update_peer(requester);
    }

    fn receipt(&self) -> PingResponseArguments {
        PingResponseArguments {
            responder: self.self_peer().clone(),
        }
    }

    /// Keep a replica sent by a Store request, unless it already expired.
    ///
    /// A chunk held already takes the incoming data and publish time.
    fn accept_replica(&self, arguments: StoreRequestArguments) {
        let replica = Chunk::replica(
            arguments.target,
            arguments.v,
            from_unix_millis(arguments.published_at),
        );

        if replica.is_expired(self.config().expiry_ttl) {
            debug!(key = %arguments.target, "Ignoring expired replica");
            return;
        }

        match self.chunks().entry(arguments.target) {
            Entry::Occupied(mut entry) => entry.get_mut().replace_with(replica),
            Entry::Vacant(entry) => {
                entry.insert(replica);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, SystemTime};

    use bytes::Bytes;

    use crate::common::{to_unix_millis, Key, Peer};
    use crate::rpc::Config;

    use super::*;

    fn rpc() -> Rpc {
        Rpc::new(Peer::new(Key::random(), "127.0.0.1:1"), Config::default())
    }

    fn store(key: Key, published_at: SystemTime) -> StoreRequestArguments {
        StoreRequestArguments {
            target: key,
            v: Bytes::from_static(b"replica"),
            published_at: to_unix_millis(published_at),
        }
    }

    #[test]
    fn accept_replica() {
        let rpc = rpc();
        let key = Key::random();

        rpc.accept_replica(store(key, SystemTime::now()));

        assert_eq!(rpc.local_chunk(&key), Some(Bytes::from_static(b"replica")));
    }

    #[test]
    fn ignore_expired_replica() {
        let rpc = rpc();
        let key = Key::random();

        let long_ago = SystemTime::now() - rpc.config().expiry_ttl - Duration::from_secs(60);
        rpc.accept_replica(store(key, long_ago));

        assert!(!rpc.has_local_chunk(&key));
    }

    #[test]
    fn replica_does_not_downgrade_publisher() {
        let rpc = rpc();
        let key = Key::random();

        rpc.chunks()
            .insert(key, Chunk::new(key, Bytes::from_static(b"replica")));
        rpc.accept_replica(store(key, SystemTime::now()));

        assert!(rpc.chunks().get(&key).unwrap().original_publisher());
    }

    #[test]
    fn store_replaces_held_data() {
        let rpc = rpc();
        let key = Key::random();

        rpc.chunks()
            .insert(key, Chunk::replica(key, Bytes::from_static(b"v1"), SystemTime::now()));

        let mut update = store(key, SystemTime::now());
        update.v = Bytes::from_static(b"v2");
        rpc.accept_replica(update);

        assert_eq!(rpc.local_chunk(&key), Some(Bytes::from_static(b"v2")));
        assert!(!rpc.chunks().get(&key).unwrap().original_publisher());
    }
}

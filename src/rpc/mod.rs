//! K-RPC implementation: the per-node engine behind a [crate::Session].
//!
//! [Rpc] owns the routing table, the local chunk map and the `dying` flag. Both maps
//! are guarded by their own lock, and no lock is ever held across a network call or
//! while holding the other.

pub mod config;
mod handle_request;
mod info;
mod iterative_query;
mod maintenance;
mod send_request;
pub(crate) mod server;
pub mod socket;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::common::{
    resolve_endpoint, Chunk, Dist, Insertion, Key, Peer, RoutingTable, MAX_BUCKET_SIZE_K,
    MAX_CHUNK_SIZE,
};
use crate::{Error, Result};

pub use config::Config;
pub use info::Info;
pub use iterative_query::FindValueResult;
pub use socket::RpcError;

/// Number of peers queried in parallel in each round of an iterative lookup.
pub const ALPHA: usize = 3;
/// Number of peers a chunk is stored on.
pub const REPLICATION_FACTOR: usize = MAX_BUCKET_SIZE_K;
/// How many stale peers may be pinged to make room for a single new peer.
pub const MAX_EVICTION_ATTEMPTS: usize = 3;

/// Pause between two unanswered bootstrap pings.
const BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
/// Lifecycle of a session.
pub enum State {
    Created,
    Joining,
    Active,
    Dying,
    Terminated,
}

#[derive(Debug)]
pub struct Rpc {
    config: Config,
    self_peer: Peer,

    routing_table: Mutex<RoutingTable>,
    chunks: Mutex<HashMap<Key, Chunk>>,

    state: Mutex<State>,
    dying: AtomicBool,
    /// Peers evicted after failing to answer.
    dead_peers: AtomicUsize,
}

impl Rpc {
    pub fn new(self_peer: Peer, config: Config) -> Self {
        Rpc {
            routing_table: Mutex::new(RoutingTable::new(self_peer.clone())),
            chunks: Mutex::new(HashMap::new()),
            state: Mutex::new(State::Created),
            dying: AtomicBool::new(false),
            dead_peers: AtomicUsize::new(0),
            self_peer,
            config,
        }
    }

    // === Getters ===

    /// Returns this node's [Key].
    pub fn id(&self) -> &Key {
        &self.self_peer.key
    }

    pub fn self_peer(&self) -> &Peer {
        &self.self_peer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` once teardown started.
    pub fn is_dying(&self) -> bool {
        self.dying.load(Ordering::Acquire)
    }

    pub fn dead_peers(&self) -> usize {
        self.dead_peers.load(Ordering::Relaxed)
    }

    pub fn routing_table_size(&self) -> usize {
        self.routing_table().size()
    }

    /// Owned copies of all peers in the routing table.
    pub fn peers(&self) -> Vec<Peer> {
        self.routing_table().all_peers()
    }

    /// Owned copy of a peer in the routing table.
    pub fn peer(&self, key: &Key) -> Option<Peer> {
        self.routing_table().get_peer(key)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks().len()
    }

    pub fn has_local_chunk(&self, key: &Key) -> bool {
        self.chunks().contains_key(key)
    }

    pub fn local_chunk(&self, key: &Key) -> Option<Bytes> {
        self.chunks().get(key).map(|chunk| chunk.data().clone())
    }

    // === Lifecycle ===

    pub(crate) fn set_state(&self, state: State) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Stop serving requests and start refusing new work.
    pub(crate) fn begin_dying(&self) {
        self.dying.store(true, Ordering::Release);
        self.set_state(State::Dying);
    }

    /// Learn the bootstrap peer's real key, then populate the routing table around
    /// our own key.
    ///
    /// A node bootstrapping against its own endpoint founds a new network.
    pub fn bootstrap(&self, endpoint: &str) -> Result<()> {
        self.set_state(State::Joining);

        // Fail fast on endpoints that can never be reached.
        resolve_endpoint(endpoint)?;

        let placeholder = Peer::placeholder(endpoint);
        self.routing_table().attempt_insert_peer(placeholder.clone());

        let started = Instant::now();

        let bootstrap_peer = loop {
            if let Some(peer) = self.ping(&placeholder) {
                break peer;
            }

            if started.elapsed() >= self.config.bootstrap_timeout {
                self.routing_table().evict_peer(&placeholder.key);

                return Err(Error::BootstrapTimeout {
                    endpoint: endpoint.to_string(),
                    elapsed: started.elapsed(),
                });
            }

            thread::sleep(BOOTSTRAP_RETRY_INTERVAL);
        };

        self.routing_table().evict_peer(&placeholder.key);

        if &bootstrap_peer.key == self.id() {
            info!(id = %self.id(), "Bootstrapped against ourselves, founding a new network");
        } else {
            debug!(id = %self.id(), bootstrap = ?bootstrap_peer, "Learned bootstrap peer key");
        }

        self.self_lookup();

        info!(
            id = %self.id(),
            peers = self.routing_table_size(),
            "Joined the network"
        );

        self.set_state(State::Active);

        Ok(())
    }

    // === Peers ===

    /// Mark a peer as just seen, inserting it if it is new.
    pub fn update_peer(&self, peer: Peer) {
        if self.routing_table().update_seen_peer(&peer.key) {
            return;
        }

        self.insert_with_eviction(peer);
    }

    /// Insert a peer learned from another peer's answer, without refreshing it if it
    /// is already known.
    pub fn store_discovered_peer(&self, peer: Peer) {
        if self.routing_table().contains(&peer.key) {
            return;
        }

        self.insert_with_eviction(peer);
    }

    /// Insert with ping-before-evict: a full bucket's least recently seen peer is
    /// pinged, and replaced only if it fails to answer as itself.
    fn insert_with_eviction(&self, peer: Peer) {
        for _ in 0..=MAX_EVICTION_ATTEMPTS {
            let insertion = self.routing_table().attempt_insert_peer(peer.clone());

            let lru = match insertion {
                Insertion::Inserted | Insertion::Refreshed | Insertion::Rejected => return,
                Insertion::Full(lru) => lru,
            };

            if self.is_dying() {
                return;
            }

            match self.probe(&lru) {
                Ok(responder) if responder.key == lru.key => {
                    self.routing_table().update_seen_peer(&lru.key);
                    debug!(?peer, "Bucket full of live peers, dropping new peer");

                    return;
                }
                Ok(responder) => {
                    debug!(stale = ?lru, ?responder, "Peer answered under a different key");

                    let mut routing_table = self.routing_table();
                    routing_table.evict_peer(&lru.key);
                    routing_table.attempt_insert_peer(Peer::new(responder.key, lru.endpoint));
                }
                Err(error) => {
                    debug!(?lru, ?error, "Evicting unresponsive peer");
                    self.evict_dead_peer(&lru.key);
                }
            }
        }

        debug!(?peer, "Gave up making room for peer");
    }

    fn evict_dead_peer(&self, key: &Key) {
        if self.routing_table().evict_peer(key).is_some() {
            self.dead_peers.fetch_add(1, Ordering::Relaxed);
        }
    }

    // === Chunks ===

    /// Publish a new content addressed chunk.
    pub fn set(&self, data: Bytes) -> Result<Key> {
        check_chunk_size(&data)?;

        let chunk = Chunk::content_addressed(data);
        let key = *chunk.key();

        self.publish(chunk);

        Ok(key)
    }

    /// Publish a new chunk under a chosen key, like [Key::from_name].
    pub fn set_with_key(&self, key: Key, data: Bytes) -> Result<()> {
        check_chunk_size(&data)?;

        self.publish(Chunk::new(key, data));

        Ok(())
    }

    /// Find a chunk locally, or else in the network.
    pub fn get(&self, key: &Key) -> Option<Bytes> {
        if let Some(data) = self.local_chunk(key) {
            debug!(?key, "Found chunk locally");
            return Some(data);
        }

        self.value_lookup(key)
    }

    /// Store a chunk on the [REPLICATION_FACTOR] closest peers to its key, keeping a
    /// local copy only if this node is itself among the closest.
    pub fn publish(&self, mut chunk: Chunk) {
        let key = *chunk.key();

        chunk.mark_published();

        let closest = self.node_lookup(&key);

        let mut stored = 0;
        let mut max_distance = Dist::ZERO;

        for peer in closest.iter().take(REPLICATION_FACTOR) {
            if self.is_dying() {
                break;
            }

            if self.store(peer, &chunk) {
                stored += 1;
                max_distance = max_distance.max(peer.distance(&key));
            }
        }

        let keep_local = closest.len() < REPLICATION_FACTOR
            || self.id().distance(&key) <= max_distance
            || stored == 0;

        debug!(?key, found = closest.len(), stored, keep_local, "Published chunk");

        if keep_local {
            let mut chunks = self.chunks();

            match chunks.entry(key) {
                // A Store that arrived while republishing is at least as recent.
                Entry::Occupied(_) if !chunk.original_publisher() => {}
                Entry::Occupied(mut entry) => {
                    entry.insert(chunk);
                }
                Entry::Vacant(entry) => {
                    entry.insert(chunk);
                }
            }
        }
    }

    /// Hand every local chunk to the closest peers we know, before leaving.
    pub(crate) fn hand_off_chunks(&self) {
        let chunks: Vec<Chunk> = self.chunks().drain().map(|(_, chunk)| chunk).collect();

        for chunk in chunks {
            let closest = self
                .routing_table()
                .closest_peers(chunk.key(), REPLICATION_FACTOR);

            let stored = closest
                .iter()
                .filter(|peer| self.store(peer, &chunk))
                .count();

            if stored == 0 {
                warn!(key = %chunk.key(), "No peer accepted chunk on teardown, data lost");
            } else {
                debug!(key = %chunk.key(), stored, "Handed off chunk");
            }
        }
    }

    /// Drop all peers and chunks.
    pub(crate) fn clear(&self) {
        self.chunks().clear();
        *self.routing_table() = RoutingTable::new(self.self_peer.clone());
    }

    // === Private Methods ===

    fn routing_table(&self) -> MutexGuard<'_, RoutingTable> {
        self.routing_table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn chunks(&self) -> MutexGuard<'_, HashMap<Key, Chunk>> {
        self.chunks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_chunk_size(data: &Bytes) -> Result<()> {
    if data.len() > MAX_CHUNK_SIZE {
        return Err(Error::ChunkTooLarge {
            size: data.len(),
            max: MAX_CHUNK_SIZE,
        });
    }

    Ok(())
}

//! A node of the Dht: the handle owning all of its threads.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::info;

use crate::common::{Key, Peer};
use crate::rpc::server::Server;
use crate::rpc::socket::KrpcSocket;
use crate::rpc::{Config, Info, Rpc, State};
use crate::Result;

#[derive(Debug)]
/// A node of the Dht, storing and serving chunks for the network.
///
/// Dropping a session stops it without handing off its chunks, see [Session::teardown].
pub struct Session {
    rpc: Arc<Rpc>,
    server: Option<Server>,
    loops: Vec<JoinHandle<()>>,
    /// Dropping it wakes up and stops the background loops.
    shutdown: Option<Sender<()>>,
}

#[derive(Debug, Default, Clone)]
/// Session builder
pub struct SessionBuilder(Config);

impl SessionBuilder {
    /// Set the request timeout, see [Config::request_timeout].
    pub fn request_timeout(&mut self, request_timeout: Duration) -> &mut Self {
        self.0.request_timeout = request_timeout;
        self
    }

    /// Set how long to keep trying the bootstrap peer.
    pub fn bootstrap_timeout(&mut self, bootstrap_timeout: Duration) -> &mut Self {
        self.0.bootstrap_timeout = bootstrap_timeout;
        self
    }

    pub fn republish_interval(&mut self, republish_interval: Duration) -> &mut Self {
        self.0.republish_interval = republish_interval;
        self
    }

    pub fn expiry_ttl(&mut self, expiry_ttl: Duration) -> &mut Self {
        self.0.expiry_ttl = expiry_ttl;
        self
    }

    pub fn sweep_interval(&mut self, sweep_interval: Duration) -> &mut Self {
        self.0.sweep_interval = sweep_interval;
        self
    }

    pub fn refresh_interval(&mut self, refresh_interval: Duration) -> &mut Self {
        self.0.refresh_interval = refresh_interval;
        self
    }

    pub fn bucket_stale_after(&mut self, bucket_stale_after: Duration) -> &mut Self {
        self.0.bucket_stale_after = bucket_stale_after;
        self
    }

    pub fn handler_threads(&mut self, handler_threads: usize) -> &mut Self {
        self.0.handler_threads = handler_threads;
        self
    }

    /// Listen on `self_endpoint` and join the network through `bootstrap_endpoint`.
    ///
    /// Pass the same endpoint twice to found a new network. A `self_endpoint` with
    /// port `0` listens on a free port and advertises it.
    pub fn startup(&self, self_endpoint: &str, bootstrap_endpoint: &str) -> Result<Session> {
        let socket = KrpcSocket::bind(self_endpoint)?;
        let endpoint = advertised_endpoint(self_endpoint, socket.local_addr());

        self.startup_on(socket, endpoint, bootstrap_endpoint)
    }

    /// Same as [Self::startup] on an already bound socket.
    pub(crate) fn startup_on(
        &self,
        socket: KrpcSocket,
        self_endpoint: String,
        bootstrap_endpoint: &str,
    ) -> Result<Session> {
        let self_peer = Peer::new(Key::random(), self_endpoint);

        let session = Session::start(self.0.clone(), self_peer, socket)?;

        // Dropping the session on failure stops its threads.
        session.rpc.bootstrap(bootstrap_endpoint)?;

        Ok(session)
    }
}

impl Session {
    /// Returns a builder to configure a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Start a session with the default [Config].
    pub fn startup(self_endpoint: &str, bootstrap_endpoint: &str) -> Result<Session> {
        Session::builder().startup(self_endpoint, bootstrap_endpoint)
    }

    /// Start the server and background loops, before bootstrapping.
    fn start(config: Config, self_peer: Peer, socket: KrpcSocket) -> Result<Session> {
        let sweep_interval = config.sweep_interval;
        let refresh_interval = config.refresh_interval;

        info!(id = %self_peer.key, endpoint = %self_peer.endpoint, "Starting session");

        let rpc = Arc::new(Rpc::new(self_peer, config));
        let (shutdown, shutdown_signal) = flume::bounded::<()>(1);

        let mut session = Session {
            server: None,
            loops: Vec::with_capacity(3),
            shutdown: Some(shutdown),
            rpc: rpc.clone(),
        };

        session.server = Some(Server::start(rpc.clone(), socket)?);

        session.loops.push(spawn_loop(
            "republish",
            &rpc,
            &shutdown_signal,
            sweep_interval,
            |rpc| {
                rpc.republish_chunks();
            },
        )?);
        session.loops.push(spawn_loop(
            "expiry",
            &rpc,
            &shutdown_signal,
            sweep_interval,
            |rpc| {
                rpc.expire_chunks();
            },
        )?);
        session.loops.push(spawn_loop(
            "refresh",
            &rpc,
            &shutdown_signal,
            refresh_interval,
            Rpc::refresh_buckets,
        )?);

        Ok(session)
    }

    // === Getters ===

    /// This node's [Key].
    pub fn key(&self) -> Key {
        *self.rpc.id()
    }

    /// The `"host:port"` endpoint this node is reachable at.
    pub fn endpoint(&self) -> &str {
        &self.rpc.self_peer().endpoint
    }

    /// Information and statistics about this node.
    pub fn info(&self) -> Info {
        Info::from(self.rpc.as_ref())
    }

    pub fn state(&self) -> State {
        self.rpc.state()
    }

    /// Snapshot of the peers in the routing table.
    pub fn peers(&self) -> Vec<Peer> {
        self.rpc.peers()
    }

    /// The peer with this key in the routing table, if known.
    pub fn peer(&self, key: &Key) -> Option<Peer> {
        self.rpc.peer(key)
    }

    /// Returns `true` if this node stores a copy of the chunk.
    pub fn has_local_chunk(&self, key: &Key) -> bool {
        self.rpc.has_local_chunk(key)
    }

    // === Public Methods ===

    /// Publish `data` as a content addressed chunk, returns its [Key].
    ///
    /// Fails if the data exceeds [crate::MAX_CHUNK_SIZE].
    pub fn set(&self, data: impl Into<Bytes>) -> Result<Key> {
        self.rpc.set(data.into())
    }

    /// Publish `data` under `key`, for example a [Key::from_name].
    pub fn set_with_key(&self, key: Key, data: impl Into<Bytes>) -> Result<()> {
        self.rpc.set_with_key(key, data.into())
    }

    /// Get a chunk from the local store, or else from the network.
    ///
    /// Returns `None` if no peer reached holds it.
    pub fn get(&self, key: &Key) -> Option<Bytes> {
        self.rpc.get(key)
    }

    /// Leave the network.
    ///
    /// Stops serving requests and joins all threads, then optionally stores every
    /// local chunk on the closest peers known, before dropping all state.
    pub fn teardown(mut self, republish: bool) {
        info!(id = %self.key(), republish, "Tearing down session");

        self.stop();

        if republish {
            self.rpc.hand_off_chunks();
        }

        self.rpc.clear();
        self.rpc.set_state(State::Terminated);
    }

    // === Private Methods ===

    fn stop(&mut self) {
        if self.shutdown.is_none() && self.server.is_none() {
            return;
        }

        self.rpc.begin_dying();
        drop(self.shutdown.take());

        if let Some(server) = self.server.take() {
            server.join();
        }

        for handle in self.loops.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.stop();
            self.rpc.set_state(State::Terminated);
        }
    }
}

/// The endpoint to advertise, the bound address if a free port was requested.
fn advertised_endpoint(requested: &str, bound: SocketAddr) -> String {
    match requested.rsplit_once(':') {
        Some((_, "0")) => bound.to_string(),
        _ => requested.to_string(),
    }
}

/// Run `task` every `interval` until the shutdown sender is dropped.
fn spawn_loop(
    name: &str,
    rpc: &Arc<Rpc>,
    shutdown: &Receiver<()>,
    interval: Duration,
    task: fn(&Rpc),
) -> std::io::Result<JoinHandle<()>> {
    let rpc = rpc.clone();
    let shutdown = shutdown.clone();

    thread::Builder::new()
        .name(format!("chunkdht {name}"))
        .spawn(move || loop {
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) if !rpc.is_dying() => task(&rpc),
                _ => break,
            }
        })
}

//! Struct and implementation of the Peer entry in the routing table
use std::fmt::{self, Debug, Formatter};
use std::net::{SocketAddr, ToSocketAddrs};

use crate::common::{Dist, Key};
use crate::{Error, Result};

#[derive(Clone, PartialEq, Eq, Hash)]
/// A peer of the overlay: its key and the `"host:port"` endpoint it listens on.
pub struct Peer {
    pub key: Key,
    pub endpoint: String,
}

impl Peer {
    /// Creates a new Peer from a key and an endpoint.
    pub fn new(key: Key, endpoint: impl Into<String>) -> Peer {
        Peer {
            key,
            endpoint: endpoint.into(),
        }
    }

    /// Peer with a random key, used as a placeholder until the real key is learned.
    pub fn placeholder(endpoint: impl Into<String>) -> Peer {
        Peer::new(Key::random(), endpoint)
    }

    /// Distance from this peer to `target`.
    pub fn distance(&self, target: &Key) -> Dist {
        self.key.distance(target)
    }

    /// Resolve the endpoint, preferring Ipv4 addresses.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        resolve_endpoint(&self.endpoint)
    }
}

impl Debug for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({} @ {})", self.key.short(), self.endpoint)
    }
}

/// Resolve a `"host:port"` endpoint, preferring Ipv4 addresses.
pub fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr> {
    let addresses: Vec<SocketAddr> = endpoint
        .to_socket_addrs()
        .map_err(|_| Error::InvalidEndpoint(endpoint.to_string()))?
        .collect();

    addresses
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or_else(|| Error::InvalidEndpoint(endpoint.to_string()))
}

/// Sort peers by distance to `target` and drop duplicate keys, keeping the first seen.
pub fn sort_and_dedup(peers: &mut Vec<Peer>, target: &Key) {
    let mut seen = std::collections::HashSet::with_capacity(peers.len());
    peers.retain(|peer| seen.insert(peer.key));
    peers.sort_by_key(|peer| peer.distance(target));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_localhost() {
        let address = resolve_endpoint("localhost:4000").unwrap();

        assert_eq!(address.port(), 4000);
        assert!(address.ip().is_loopback());
    }

    #[test]
    fn resolve_invalid() {
        assert!(resolve_endpoint("not an endpoint").is_err());
        assert!(Peer::placeholder("127.0.0.1").socket_addr().is_err());
    }

    #[test]
    fn sort_and_dedup_by_distance() {
        let target = Key([0; 20]);

        let mut near = [0; 20];
        near[19] = 1;
        let mut far = [0; 20];
        far[0] = 1;

        let mut peers = vec![
            Peer::new(Key(far), "a:1"),
            Peer::new(Key(near), "b:1"),
            Peer::new(Key(far), "c:1"),
        ];

        sort_and_dedup(&mut peers, &target);

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].key, Key(near));
        assert_eq!(peers[1].endpoint, "a:1");
    }
}

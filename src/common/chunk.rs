//! Chunks: the byte blobs stored in the Dht and their publication metadata.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::common::Key;

/// Largest chunk payload, small enough for a Store request to fit in one datagram.
pub const MAX_CHUNK_SIZE: usize = 60 * 1024;

#[derive(Clone, Debug, PartialEq)]
/// A stored blob addressed by a [Key].
pub struct Chunk {
    key: Key,
    data: Bytes,
    /// Set on the replica held by the node that accepted the original `set`.
    original_publisher: bool,
    original_publish_time: SystemTime,
    last_published: Instant,
}

impl Chunk {
    /// A new chunk published by this node, addressed by `key`.
    pub fn new(key: Key, data: Bytes) -> Chunk {
        Chunk {
            key,
            data,
            original_publisher: true,
            original_publish_time: SystemTime::now(),
            last_published: Instant::now(),
        }
    }

    /// A new chunk published by this node, addressed by its content.
    pub fn content_addressed(data: Bytes) -> Chunk {
        Chunk::new(Key::from_data(&data), data)
    }

    /// A replica received from another peer's Store request.
    pub fn replica(key: Key, data: Bytes, original_publish_time: SystemTime) -> Chunk {
        Chunk {
            key,
            data,
            original_publisher: false,
            original_publish_time,
            last_published: Instant::now(),
        }
    }

    // === Getters ===

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn original_publisher(&self) -> bool {
        self.original_publisher
    }

    pub fn original_publish_time(&self) -> SystemTime {
        self.original_publish_time
    }

    /// Original publish time as milliseconds since the unix epoch, as sent on the wire.
    pub fn published_at_millis(&self) -> u64 {
        to_unix_millis(self.original_publish_time)
    }

    // === Public Methods ===

    /// Returns true if the chunk was first published more than `ttl` ago.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        match self.original_publish_time.elapsed() {
            Ok(age) => age > ttl,
            // Publish time in the future, clock skew between peers.
            Err(_) => false,
        }
    }

    /// Returns true if the chunk was not (re)published within `interval`.
    pub fn needs_republish(&self, interval: Duration) -> bool {
        self.last_published.elapsed() >= interval
    }

    /// Record a (re)publication. The original publish time never changes, so a chunk
    /// expires `ttl` after its first publication however often it is republished.
    pub fn mark_published(&mut self) {
        self.last_published = Instant::now();
    }

    /// Take the data and publish time of an incoming replica, keeping our own
    /// publisher flag.
    pub fn replace_with(&mut self, replica: Chunk) {
        self.data = replica.data;
        self.original_publish_time = replica.original_publish_time;
        self.last_published = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn with_original_publish_time(mut self, time: SystemTime) -> Self {
        self.original_publish_time = time;
        self
    }
}

pub fn to_unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

pub fn from_unix_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

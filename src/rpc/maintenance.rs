//! Periodic upkeep: chunk expiry, chunk republishing and bucket refreshes.

use tracing::debug;

use crate::common::Chunk;

use super::Rpc;

impl Rpc {
    /// Delete chunks first published more than `expiry_ttl` ago, returns how many.
    pub fn expire_chunks(&self) -> usize {
        let ttl = self.config().expiry_ttl;

        let mut chunks = self.chunks();
        let before = chunks.len();

        chunks.retain(|key, chunk| {
            let expired = chunk.is_expired(ttl);
            if expired {
                debug!(?key, published = ?chunk.original_publish_time(), "Chunk expired");
            }

            !expired
        });

        before - chunks.len()
    }

    /// Republish chunks not published within `republish_interval`, returns how many.
    ///
    /// Each chunk leaves the local map and only comes back if this node is still
    /// among the closest peers to its key. Expired chunks are left to the expiry sweep.
    pub fn republish_chunks(&self) -> usize {
        let interval = self.config().republish_interval;
        let ttl = self.config().expiry_ttl;

        let due: Vec<Chunk> = {
            let mut chunks = self.chunks();

            let keys: Vec<_> = chunks
                .iter()
                .filter(|(_, chunk)| chunk.needs_republish(interval) && !chunk.is_expired(ttl))
                .map(|(key, _)| *key)
                .collect();

            keys.iter().filter_map(|key| chunks.remove(key)).collect()
        };

        let count = due.len();

        for chunk in due {
            if self.is_dying() {
                // Keep it for the teardown hand off.
                self.chunks().entry(*chunk.key()).or_insert(chunk);
                continue;
            }

            self.publish(chunk);
        }

        count
    }

    /// Look up a random peer of every bucket idle for `bucket_stale_after`.
    pub fn refresh_buckets(&self) {
        let stale = self
            .routing_table()
            .random_per_bucket_peers(self.config().bucket_stale_after);

        for peer in stale {
            if self.is_dying() {
                return;
            }

            debug!(?peer, "Refreshing stale bucket");
            self.node_lookup(&peer.key);
        }
    }
}

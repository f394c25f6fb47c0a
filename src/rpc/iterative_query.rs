//! Iterative lookups converging on the peers closest to a target key.

use std::collections::HashSet;
use std::thread;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::common::{sort_and_dedup, Key, Peer, KEY_BITS, MAX_BUCKET_SIZE_K};

use super::{Rpc, ALPHA};

#[derive(Debug, Clone, PartialEq)]
/// Answer to a FindValue request.
pub enum FindValueResult {
    Found(Bytes),
    Closest(Vec<Peer>),
}

/// Answer of a single peer within a lookup.
enum LookupOutcome {
    Closest(Vec<Peer>),
    Found(Bytes),
}

/// Candidates of one lookup, and the peers already asked.
struct Lookup {
    candidates: Vec<Peer>,
    queried: HashSet<Key>,
    /// Peers that failed to answer, never to become candidates again.
    failed: HashSet<Key>,
}

impl Lookup {
    fn new(candidates: Vec<Peer>) -> Self {
        Lookup {
            candidates,
            queried: HashSet::new(),
            failed: HashSet::new(),
        }
    }

    /// Add the answers of a round to the candidates, returns the chunk if a peer
    /// held it.
    fn merge(&mut self, batch: &[Peer], answers: Vec<Option<LookupOutcome>>) -> Option<Bytes> {
        for (peer, answer) in batch.iter().zip(answers) {
            self.queried.insert(peer.key);

            match answer {
                Some(LookupOutcome::Found(data)) => return Some(data),
                Some(LookupOutcome::Closest(peers)) => self.candidates.extend(peers),
                None => {
                    self.failed.insert(peer.key);
                }
            }
        }

        let failed = &self.failed;
        self.candidates.retain(|peer| !failed.contains(&peer.key));

        None
    }
}

impl Rpc {
    /// Look up our own key, then ping every peer discovered on the way.
    pub fn self_lookup(&self) {
        debug!(id = %self.id(), "Self lookup");

        self.node_lookup(self.id());

        for peer in self.peers() {
            if self.is_dying() {
                return;
            }

            self.ping(&peer);
        }
    }

    /// Find the [MAX_BUCKET_SIZE_K] closest live peers to `target`.
    pub fn node_lookup(&self, target: &Key) -> Vec<Peer> {
        let mut lookup = self.start_lookup(target);

        if self.iterative_lookup(&mut lookup, target, false).is_some() {
            return vec![];
        }

        // One last round asking every surviving candidate.
        for batch in lookup.candidates.clone().chunks(ALPHA) {
            if self.is_dying() {
                break;
            }

            let answers = self.query_round(batch, target, false);
            lookup.merge(batch, answers);
        }

        let mut candidates = lookup.candidates;
        sort_and_dedup(&mut candidates, target);
        candidates.truncate(MAX_BUCKET_SIZE_K);

        debug!(?target, found = candidates.len(), "Node lookup done");

        candidates
    }

    /// Find a chunk in the network, halting on the first peer holding it.
    pub fn value_lookup(&self, target: &Key) -> Option<Bytes> {
        let mut lookup = self.start_lookup(target);

        let found = self.iterative_lookup(&mut lookup, target, true);

        debug!(?target, found = found.is_some(), "Value lookup done");

        found
    }

    // === Private Methods ===

    fn start_lookup(&self, target: &Key) -> Lookup {
        Lookup::new(
            self.routing_table()
                .closest_peers(target, MAX_BUCKET_SIZE_K),
        )
    }

    /// Query rounds until the candidates stop getting closer, returns the chunk if
    /// `find_value` is set and a peer held it.
    fn iterative_lookup(
        &self,
        lookup: &mut Lookup,
        target: &Key,
        find_value: bool,
    ) -> Option<Bytes> {
        for round in 0..KEY_BITS {
            if self.is_dying() {
                break;
            }

            let batch: Vec<Peer> = lookup
                .candidates
                .iter()
                .filter(|peer| !lookup.queried.contains(&peer.key))
                .take(ALPHA)
                .cloned()
                .collect();

            if batch.is_empty() {
                break;
            }

            let closest_before = lookup.candidates.first().map(|peer| peer.distance(target));
            let count_before = lookup.candidates.len();

            let answers = self.query_round(&batch, target, find_value);

            if let Some(data) = lookup.merge(&batch, answers) {
                return Some(data);
            }

            sort_and_dedup(&mut lookup.candidates, target);
            lookup.candidates.truncate(MAX_BUCKET_SIZE_K);

            let closest_after = lookup.candidates.first().map(|peer| peer.distance(target));

            let improved = match (closest_before, closest_after) {
                (Some(before), Some(after)) => after < before,
                (None, Some(_)) => true,
                _ => false,
            };

            trace!(
                ?target,
                round,
                improved,
                candidates = lookup.candidates.len(),
                "Lookup round"
            );

            if !improved && lookup.candidates.len() <= count_before {
                break;
            }
        }

        None
    }

    /// Query a batch of peers in parallel, answers in the batch's order.
    fn query_round(
        &self,
        batch: &[Peer],
        target: &Key,
        find_value: bool,
    ) -> Vec<Option<LookupOutcome>> {
        thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|peer| scope.spawn(move || self.query(peer, target, find_value)))
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(None))
                .collect()
        })
    }

    fn query(&self, peer: &Peer, target: &Key, find_value: bool) -> Option<LookupOutcome> {
        if find_value {
            match self.find_value(peer, target)? {
                FindValueResult::Found(data) => Some(LookupOutcome::Found(data)),
                FindValueResult::Closest(peers) => Some(LookupOutcome::Closest(peers)),
            }
        } else {
            self.find_node(peer, target).map(LookupOutcome::Closest)
        }
    }
}

//! Kademlia routing table: a binary trie of k-buckets rooted at this node's key.
//!
//! Leaves hold k-buckets of at most [MAX_BUCKET_SIZE_K] peers sharing the leaf's key
//! prefix. A full leaf is only split when it lies on the path of this node's own key,
//! so the table stays within `O(K * log(N))` peers and has fine resolution close to
//! this node and coarse resolution far from it.
//!
//! Trie nodes live in an arena and refer to each other by index. Leaves are never
//! merged back, so indices stay valid for the lifetime of the table.

use std::slice::Iter;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use crate::common::{Key, Peer, KEY_BITS};

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 20;

const ROOT: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of [RoutingTable::attempt_insert_peer].
pub enum Insertion {
    /// The peer was added as the most recently seen peer of its bucket.
    Inserted,
    /// The peer was already known and is now the most recently seen.
    Refreshed,
    /// The bucket is full and can't be split, carries its least recently seen peer
    /// as a candidate for eviction if it fails to answer a ping.
    Full(Peer),
    /// Our own key never enters the table.
    Rejected,
}

#[derive(Debug, Clone)]
/// Kademlia routing table
pub struct RoutingTable {
    self_peer: Peer,
    tree: Vec<TreeNode>,
}

#[derive(Debug, Clone)]
struct TreeNode {
    /// Index of the key bit this node splits on, or the length of its prefix.
    depth: usize,
    parent: Option<usize>,
    /// Number of peers in this subtree.
    key_count: usize,
    kind: TreeNodeKind,
}

#[derive(Debug, Clone)]
enum TreeNodeKind {
    Leaf(KBucket),
    Branch { zero: usize, one: usize },
}

impl RoutingTable {
    /// Create a new empty [RoutingTable] centered on `self_peer`.
    pub fn new(self_peer: Peer) -> Self {
        RoutingTable {
            self_peer,
            tree: vec![TreeNode {
                depth: 0,
                parent: None,
                key_count: 0,
                kind: TreeNodeKind::Leaf(KBucket::new()),
            }],
        }
    }

    // === Getters ===

    /// Returns the [Key] of this node, where the distance is measured from.
    pub fn id(&self) -> &Key {
        &self.self_peer.key
    }

    pub fn self_peer(&self) -> &Peer {
        &self.self_peer
    }

    /// Return the number of peers in this routing table.
    pub fn size(&self) -> usize {
        self.tree[ROOT].key_count
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    // === Public Methods ===

    /// Attempts to add a peer to its bucket, splitting buckets along our own path
    /// as needed.
    pub fn attempt_insert_peer(&mut self, peer: Peer) -> Insertion {
        if &peer.key == self.id() {
            return Insertion::Rejected;
        }

        loop {
            let (index, on_self_path) = self.leaf_for(&peer.key);
            let depth = self.tree[index].depth;

            let TreeNodeKind::Leaf(bucket) = &mut self.tree[index].kind else {
                return Insertion::Rejected;
            };

            if bucket.update_seen(&peer.key) {
                return Insertion::Refreshed;
            }

            if !bucket.is_full() {
                bucket.push(peer);
                self.adjust_key_counts(index, true);

                return Insertion::Inserted;
            }

            if on_self_path && depth < KEY_BITS {
                self.split(index);
                continue;
            }

            return match bucket.least_recently_seen() {
                Some(lru) => Insertion::Full(lru.clone()),
                None => Insertion::Rejected,
            };
        }
    }

    /// Remove a peer from this routing table, returning it if it was present.
    pub fn evict_peer(&mut self, key: &Key) -> Option<Peer> {
        let (index, _) = self.leaf_for(key);

        let removed = match &mut self.tree[index].kind {
            TreeNodeKind::Leaf(bucket) => bucket.remove(key),
            TreeNodeKind::Branch { .. } => None,
        };

        if removed.is_some() {
            self.adjust_key_counts(index, false);
        }

        removed
    }

    /// Mark a peer as the most recently seen in its bucket.
    ///
    /// Returns `false` if the peer is not in the table.
    pub fn update_seen_peer(&mut self, key: &Key) -> bool {
        let (index, _) = self.leaf_for(key);

        match &mut self.tree[index].kind {
            TreeNodeKind::Leaf(bucket) => bucket.update_seen(key),
            TreeNodeKind::Branch { .. } => false,
        }
    }

    /// Returns an owned copy of the peer with this key, if present.
    pub fn get_peer(&self, key: &Key) -> Option<Peer> {
        self.bucket_for(key)?.get(key).cloned()
    }

    /// Returns `true` if the table holds a peer with this key.
    pub fn contains(&self, key: &Key) -> bool {
        self.bucket_for(key)
            .is_some_and(|bucket| bucket.get(key).is_some())
    }

    /// Return up to `n` peers closest to `target`, ordered by increasing distance.
    pub fn closest_peers(&self, target: &Key, n: usize) -> Vec<Peer> {
        let mut closest = Vec::with_capacity(n.min(self.size()));

        self.collect_closest(ROOT, target, n, &mut closest);

        closest
    }

    /// All peers in the table, bucket by bucket.
    pub fn all_peers(&self) -> Vec<Peer> {
        self.leaves()
            .flat_map(|bucket| bucket.iter().cloned())
            .collect()
    }

    /// One random peer from every bucket that saw no activity for `unaccessed_since`.
    ///
    /// Looking these up revisits the cold parts of the table.
    pub fn random_per_bucket_peers(&self, unaccessed_since: Duration) -> Vec<Peer> {
        let mut rng = rand::thread_rng();

        self.leaves()
            .filter(|bucket| bucket.last_accessed.elapsed() >= unaccessed_since)
            .filter_map(|bucket| bucket.nodes.choose(&mut rng).cloned())
            .collect()
    }

    // === Private Methods ===

    /// Descend to the leaf covering `key`, and whether that leaf lies on our own path.
    fn leaf_for(&self, key: &Key) -> (usize, bool) {
        let mut index = ROOT;
        let mut on_self_path = true;

        loop {
            let node = &self.tree[index];

            match node.kind {
                TreeNodeKind::Leaf(_) => return (index, on_self_path),
                TreeNodeKind::Branch { zero, one } => {
                    let bit = key.bit(node.depth);
                    on_self_path &= bit == self.id().bit(node.depth);

                    index = if bit { one } else { zero };
                }
            }
        }
    }

    fn bucket_for(&self, key: &Key) -> Option<&KBucket> {
        let (index, _) = self.leaf_for(key);

        match &self.tree[index].kind {
            TreeNodeKind::Leaf(bucket) => Some(bucket),
            TreeNodeKind::Branch { .. } => None,
        }
    }

    /// Turn a leaf into a branch, redistributing its peers by their next bit.
    fn split(&mut self, index: usize) {
        let depth = self.tree[index].depth;

        let bucket = match &mut self.tree[index].kind {
            TreeNodeKind::Leaf(bucket) => std::mem::take(bucket),
            TreeNodeKind::Branch { .. } => return,
        };

        let last_accessed = bucket.last_accessed;
        let (ones, zeros): (Vec<Peer>, Vec<Peer>) =
            bucket.nodes.into_iter().partition(|peer| peer.key.bit(depth));

        let zero = self.tree.len();
        let one = zero + 1;

        for nodes in [zeros, ones] {
            self.tree.push(TreeNode {
                depth: depth + 1,
                parent: Some(index),
                key_count: nodes.len(),
                kind: TreeNodeKind::Leaf(KBucket {
                    nodes,
                    last_accessed,
                }),
            });
        }

        self.tree[index].kind = TreeNodeKind::Branch { zero, one };
    }

    fn adjust_key_counts(&mut self, mut index: usize, increment: bool) {
        loop {
            let node = &mut self.tree[index];

            if increment {
                node.key_count += 1;
            } else {
                node.key_count = node.key_count.saturating_sub(1);
            }

            match node.parent {
                Some(parent) => index = parent,
                None => break,
            }
        }
    }

    /// Collect up to `n` peers from the subtree, preferring the child matching
    /// `target`'s bit, since every peer there is closer than any peer in the other.
    fn collect_closest(&self, index: usize, target: &Key, n: usize, closest: &mut Vec<Peer>) {
        if n == 0 {
            return;
        }

        let node = &self.tree[index];

        match &node.kind {
            TreeNodeKind::Leaf(bucket) => {
                let mut peers: Vec<&Peer> = bucket.iter().collect();
                peers.sort_by_key(|peer| peer.distance(target));

                closest.extend(peers.into_iter().take(n).cloned());
            }
            TreeNodeKind::Branch { zero, one } => {
                let (preferred, alternate) = if target.bit(node.depth) {
                    (*one, *zero)
                } else {
                    (*zero, *one)
                };

                self.collect_closest(preferred, target, n, closest);

                let supplied = self.tree[preferred].key_count.min(n);
                if supplied < n {
                    self.collect_closest(alternate, target, n - supplied, closest);
                }
            }
        }
    }

    /// Leaves in order, zero subtrees first.
    fn leaves(&self) -> impl Iterator<Item = &KBucket> {
        let mut stack = vec![ROOT];

        std::iter::from_fn(move || {
            while let Some(index) = stack.pop() {
                match &self.tree[index].kind {
                    TreeNodeKind::Leaf(bucket) => return Some(bucket),
                    TreeNodeKind::Branch { zero, one } => {
                        stack.push(*one);
                        stack.push(*zero);
                    }
                }
            }

            None
        })
    }
}

/// Kbuckets are similar to LRU caches that checks and evicts unresponsive nodes,
/// without dropping any responsive nodes in the process.
#[derive(Debug, Clone)]
pub struct KBucket {
    /// Peers in the k-bucket, sorted by the least recently seen.
    nodes: Vec<Peer>,
    last_accessed: Instant,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            nodes: Vec::with_capacity(MAX_BUCKET_SIZE_K),
            last_accessed: Instant::now(),
        }
    }

    // === Public Methods ===

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= MAX_BUCKET_SIZE_K
    }

    pub fn get(&self, key: &Key) -> Option<&Peer> {
        self.iter().find(|peer| &peer.key == key)
    }

    pub fn least_recently_seen(&self) -> Option<&Peer> {
        self.nodes.first()
    }

    pub fn iter(&self) -> Iter<'_, Peer> {
        self.nodes.iter()
    }

    // === Private Methods ===

    fn push(&mut self, peer: Peer) {
        self.nodes.push(peer);
        self.last_accessed = Instant::now();
    }

    fn remove(&mut self, key: &Key) -> Option<Peer> {
        let index = self.iter().position(|peer| &peer.key == key)?;

        Some(self.nodes.remove(index))
    }

    /// Move the peer to the most recently seen end.
    fn update_seen(&mut self, key: &Key) -> bool {
        match self.iter().position(|peer| &peer.key == key) {
            Some(index) => {
                let peer = self.nodes.remove(index);
                self.nodes.push(peer);
                self.last_accessed = Instant::now();

                true
            }
            None => false,
        }
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn self_peer(key: Key) -> Peer {
        Peer::new(key, "127.0.0.1:1")
    }

    fn peer_with_first_byte(first: u8, i: usize) -> Peer {
        let mut key = Key::random();
        key.0[0] = first;

        Peer::new(key, format!("127.0.0.1:{}", 1000 + i))
    }

    fn random_peer(i: usize) -> Peer {
        Peer::new(Key::random(), format!("127.0.0.1:{}", 1000 + i))
    }

    #[test]
    fn table_is_empty() {
        let mut table = RoutingTable::new(self_peer(Key::random()));
        assert!(table.is_empty());

        table.attempt_insert_peer(random_peer(0));
        assert!(!table.is_empty());
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn should_not_add_self() {
        let key = Key::random();
        let mut table = RoutingTable::new(self_peer(key));

        assert_eq!(
            table.attempt_insert_peer(Peer::new(key, "127.0.0.1:2")),
            Insertion::Rejected
        );
        assert!(table.is_empty());
    }

    #[test]
    fn buckets_are_sets() {
        let mut table = RoutingTable::new(self_peer(Key::random()));
        let peer = random_peer(0);

        assert_eq!(table.attempt_insert_peer(peer.clone()), Insertion::Inserted);
        assert_eq!(table.attempt_insert_peer(peer), Insertion::Refreshed);
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn contains_and_evict() {
        let mut table = RoutingTable::new(self_peer(Key::random()));
        let peer = random_peer(0);

        assert!(!table.contains(&peer.key));

        table.attempt_insert_peer(peer.clone());
        assert!(table.contains(&peer.key));
        assert_eq!(table.get_peer(&peer.key), Some(peer.clone()));

        assert_eq!(table.evict_peer(&peer.key), Some(peer.clone()));
        assert!(!table.contains(&peer.key));
        assert!(table.is_empty());
        assert_eq!(table.evict_peer(&peer.key), None);
    }

    #[test]
    fn should_not_add_more_than_k_off_self_path() {
        // Self starts with a zero bit, every peer starts with a one bit.
        let mut table = RoutingTable::new(self_peer(Key([0; 20])));

        for i in 0..MAX_BUCKET_SIZE_K {
            let peer = peer_with_first_byte(0b1000_0000, i);
            assert_eq!(table.attempt_insert_peer(peer), Insertion::Inserted);
        }

        for i in 0..5 {
            let peer = peer_with_first_byte(0b1000_0000, MAX_BUCKET_SIZE_K + i);
            assert!(matches!(
                table.attempt_insert_peer(peer),
                Insertion::Full(_)
            ));
        }

        assert_eq!(table.size(), MAX_BUCKET_SIZE_K);
    }

    #[test]
    fn splits_along_self_path() {
        let mut table = RoutingTable::new(self_peer(Key([0; 20])));

        for i in 0..MAX_BUCKET_SIZE_K {
            table.attempt_insert_peer(peer_with_first_byte(0b1000_0000, i));
        }
        for i in 0..MAX_BUCKET_SIZE_K {
            let peer = peer_with_first_byte(0b0100_0000, MAX_BUCKET_SIZE_K + i);
            assert_eq!(table.attempt_insert_peer(peer), Insertion::Inserted);
        }

        assert_eq!(table.size(), 2 * MAX_BUCKET_SIZE_K);
        assert_eq!(table.all_peers().len(), 2 * MAX_BUCKET_SIZE_K);
    }

    #[test]
    fn full_returns_least_recently_seen() {
        let mut table = RoutingTable::new(self_peer(Key([0; 20])));

        let peers: Vec<Peer> = (0..MAX_BUCKET_SIZE_K)
            .map(|i| peer_with_first_byte(0b1000_0000, i))
            .collect();
        for peer in &peers {
            table.attempt_insert_peer(peer.clone());
        }

        let newcomer = peer_with_first_byte(0b1000_0000, 99);

        assert_eq!(
            table.attempt_insert_peer(newcomer.clone()),
            Insertion::Full(peers[0].clone())
        );

        assert!(table.update_seen_peer(&peers[0].key));
        assert_eq!(
            table.attempt_insert_peer(newcomer.clone()),
            Insertion::Full(peers[1].clone())
        );

        table.evict_peer(&peers[1].key);
        assert_eq!(table.attempt_insert_peer(newcomer), Insertion::Inserted);
        assert_eq!(table.size(), MAX_BUCKET_SIZE_K);
    }

    #[test]
    fn closest_matches_brute_force() {
        let mut table = RoutingTable::new(self_peer(Key::random()));

        for i in 0..500 {
            table.attempt_insert_peer(random_peer(i));
        }

        let all = table.all_peers();
        assert_eq!(all.len(), table.size());

        for _ in 0..20 {
            let target = Key::random();

            let mut expected = all.clone();
            expected.sort_by_key(|peer| peer.distance(&target));
            expected.truncate(MAX_BUCKET_SIZE_K);

            let closest = table.closest_peers(&target, MAX_BUCKET_SIZE_K);

            assert_eq!(closest, expected);
        }
    }

    #[test]
    fn closest_length_and_order() {
        let mut table = RoutingTable::new(self_peer(Key::random()));

        for i in 0..7 {
            table.attempt_insert_peer(random_peer(i));
        }

        let target = Key::random();

        assert_eq!(table.closest_peers(&target, 3).len(), 3);
        assert_eq!(table.closest_peers(&target, 20).len(), 7);
        assert!(table.closest_peers(&target, 0).is_empty());

        let closest = table.closest_peers(&target, 20);
        for pair in closest.windows(2) {
            assert!(pair[0].distance(&target) <= pair[1].distance(&target));
        }
    }

    #[test]
    fn random_per_bucket_peers() {
        let mut table = RoutingTable::new(self_peer(Key([0; 20])));

        for i in 0..(MAX_BUCKET_SIZE_K + 1) {
            table.attempt_insert_peer(random_peer(i));
        }

        let stale = table.random_per_bucket_peers(Duration::ZERO);
        assert!(!stale.is_empty());
        for peer in &stale {
            assert!(table.contains(&peer.key));
        }

        assert!(table
            .random_per_bucket_peers(Duration::from_secs(3600))
            .is_empty());
    }
}

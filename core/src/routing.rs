//! Kademlia routing table (C10): 256 k-buckets keyed by XOR distance, with
//! IP-diversity and anti-eclipse protections.

use std::collections::HashSet;
use std::net::IpAddr;

use parking_lot::RwLock;

use crate::error::NetworkError;

pub type PeerId = [u8; 32];

/// Maximum peers held per bucket.
pub const K: usize = 20;
/// Maximum peers with the same `/24` (IPv4) or `/48` (IPv6) prefix per bucket.
pub const SUBNET_CAP: usize = 2;
/// Maximum number of peers `mark_outbound_protected` can reserve.
pub const MAX_PROTECTED: usize = 4;
/// Concurrent probes per iterative-lookup round.
pub const ALPHA: usize = 3;
/// Round bound for iterative lookup.
pub const MAX_LOOKUP_ROUNDS: usize = 20;
/// Candidate-set cap during iterative lookup.
pub const MAX_CANDIDATES: usize = 3 * K;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KBucketPeer {
    pub peer_id: PeerId,
    pub host: IpAddr,
    pub port: u16,
    pub last_seen_ts: u64,
}

/// Position (0 = most significant bit) of the highest bit at which `a` and
/// `b` differ, or `None` if they are identical.
fn differing_bit_index(a: &PeerId, b: &PeerId) -> Option<usize> {
    for i in 0..32 {
        let x = a[i] ^ b[i];
        if x != 0 {
            return Some(i * 8 + x.leading_zeros() as usize);
        }
    }
    None
}

/// Full 256-bit XOR distance, as a big-endian byte array, for closeness
/// comparisons within [`RoutingTable::find_closest`].
fn xor_distance(a: &PeerId, b: &PeerId) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// `/24` for IPv4, `/48` for IPv6.
fn subnet_key(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets()[..3].to_vec(),
        IpAddr::V6(v6) => v6.octets()[..6].to_vec(),
    }
}

#[derive(Default, Clone)]
struct Bucket {
    /// Ordered least-recently-seen first; a re-seen peer is moved to the end.
    peers: Vec<KBucketPeer>,
}

impl Bucket {
    fn subnet_count(&self, key: &[u8]) -> usize {
        self.peers
            .iter()
            .filter(|p| subnet_key(&p.host) == key)
            .count()
    }

    fn touch(&mut self, peer_id: &PeerId, last_seen_ts: u64) -> bool {
        if let Some(pos) = self.peers.iter().position(|p| &p.peer_id == peer_id) {
            let mut p = self.peers.remove(pos);
            p.last_seen_ts = last_seen_ts;
            self.peers.push(p);
            true
        } else {
            false
        }
    }
}

/// Owns the full 256-bucket table behind one reader/writer guard, plus a
/// nested guard over the outbound-protected set.
pub struct RoutingTable {
    local_id: PeerId,
    buckets: RwLock<Vec<Bucket>>,
    protected: RwLock<HashSet<PeerId>>,
}

impl RoutingTable {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            buckets: RwLock::new(vec![Bucket::default(); 256]),
            protected: RwLock::new(HashSet::new()),
        }
    }

    fn bucket_index(&self, peer_id: &PeerId) -> Option<usize> {
        differing_bit_index(&self.local_id, peer_id)
    }

    /// Inserts a peer whose handshake has already proven `peer_id =
    /// BLAKE3(pubkey)` (the caller's responsibility; this table trusts its
    /// input). Moves an already-present peer to MRU instead of duplicating.
    /// The subnet-diversity check happens inside this same write guard to
    /// avoid a time-of-check-to-time-of-use race.
    pub fn insert(&self, peer: KBucketPeer) -> Result<(), NetworkError> {
        let Some(idx) = self.bucket_index(&peer.peer_id) else {
            return Err(NetworkError::HandshakeFailed);
        };
        let mut buckets = self.buckets.write();
        let bucket = &mut buckets[idx];

        if bucket.touch(&peer.peer_id, peer.last_seen_ts) {
            return Ok(());
        }

        let key = subnet_key(&peer.host);
        if bucket.subnet_count(&key) >= SUBNET_CAP {
            return Err(NetworkError::SubnetCapReached);
        }
        if bucket.peers.len() >= K {
            // Standard Kademlia: long-lived responsive peers are never
            // evicted for a newcomer.
            return Err(NetworkError::BucketFull);
        }
        bucket.peers.push(peer);
        Ok(())
    }

    /// Marks `peer_id` as re-seen (handshake refresh or message received),
    /// moving it to MRU within its bucket. No-op if the peer is absent.
    pub fn mark_seen(&self, peer_id: &PeerId, last_seen_ts: u64) {
        if let Some(idx) = self.bucket_index(peer_id) {
            self.buckets.write()[idx].touch(peer_id, last_seen_ts);
        }
    }

    /// Removes `peer_id` unless it is in the outbound-protected set.
    /// Returns `true` if a removal occurred.
    pub fn remove(&self, peer_id: &PeerId) -> bool {
        if self.protected.read().contains(peer_id) {
            return false;
        }
        let Some(idx) = self.bucket_index(peer_id) else {
            return false;
        };
        let mut bucket = self.buckets.write();
        let b = &mut bucket[idx];
        let before = b.peers.len();
        b.peers.retain(|p| &p.peer_id != peer_id);
        b.peers.len() != before
    }

    /// Reserves up to [`MAX_PROTECTED`] slots that [`RoutingTable::remove`]
    /// will refuse to evict until [`RoutingTable::unprotect`] is called.
    /// Anti-eclipse measure for outbound connections.
    pub fn mark_outbound_protected(&self, peer_id: PeerId) -> Result<(), NetworkError> {
        let mut protected = self.protected.write();
        if protected.contains(&peer_id) {
            return Ok(());
        }
        if protected.len() >= MAX_PROTECTED {
            return Err(NetworkError::BucketFull);
        }
        protected.insert(peer_id);
        Ok(())
    }

    pub fn unprotect(&self, peer_id: &PeerId) {
        self.protected.write().remove(peer_id);
    }

    pub fn is_protected(&self, peer_id: &PeerId) -> bool {
        self.protected.read().contains(peer_id)
    }

    /// Returns up to `count` peers sorted by XOR distance to `target`; ties
    /// (which cannot occur for distinct ids at the same distance under XOR,
    /// but can for the ordering key once peers from different buckets are
    /// merged) are broken by lexicographic peer-id so equal-distance peers
    /// are never silently dropped from a sorted container.
    pub fn find_closest(&self, target: &PeerId, count: usize) -> Vec<KBucketPeer> {
        let buckets = self.buckets.read();
        let mut all: Vec<KBucketPeer> = buckets.iter().flat_map(|b| b.peers.iter().copied()).collect();
        all.sort_by(|a, b| {
            let da = xor_distance(&a.peer_id, target);
            let db = xor_distance(&b.peer_id, target);
            da.cmp(&db).then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        all.truncate(count);
        all
    }

    pub fn bucket_len(&self, peer_id: &PeerId) -> usize {
        match self.bucket_index(peer_id) {
            Some(idx) => self.buckets.read()[idx].peers.len(),
            None => 0,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }
}

/// Synchronous probe abstraction so the lookup algorithm is testable
/// without any socket; a real `PeerTransport` implementation in the
/// networking layer above this crate drives actual FIND_NODE RPCs.
pub trait LookupProbe {
    fn probe(&self, peer: &KBucketPeer, target: &PeerId) -> Vec<KBucketPeer>;
}

/// Runs the iterative `FindClosest` lookup: up to [`ALPHA`]
/// concurrent probes per round, at most [`MAX_LOOKUP_ROUNDS`] rounds,
/// candidate set capped at [`MAX_CANDIDATES`]. Peers learned through probe
/// responses are *not* inserted into the routing table; only a completed
/// handshake does that (via [`RoutingTable::insert`]). Terminates early
/// once a round fails to improve the closest-known set.
pub fn iterative_lookup(
    table: &RoutingTable,
    target: PeerId,
    probe: &dyn LookupProbe,
) -> Vec<KBucketPeer> {
    let mut known = table.find_closest(&target, MAX_CANDIDATES);
    let mut queried: HashSet<PeerId> = HashSet::new();

    for _ in 0..MAX_LOOKUP_ROUNDS {
        let to_query: Vec<KBucketPeer> = known
            .iter()
            .filter(|p| !queried.contains(&p.peer_id))
            .take(ALPHA)
            .copied()
            .collect();
        if to_query.is_empty() {
            break;
        }

        let closest_before = known.first().map(|p| p.peer_id);
        let mut improved = false;

        for peer in &to_query {
            queried.insert(peer.peer_id);
            let responses = probe.probe(peer, &target);
            for candidate in responses {
                if candidate.peer_id == table.local_id() {
                    continue;
                }
                if !known.iter().any(|p| p.peer_id == candidate.peer_id) {
                    known.push(candidate);
                    improved = true;
                }
            }
        }

        known.sort_by(|a, b| {
            let da = xor_distance(&a.peer_id, &target);
            let db = xor_distance(&b.peer_id, &target);
            da.cmp(&db).then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        known.truncate(MAX_CANDIDATES);

        let closest_after = known.first().map(|p| p.peer_id);
        if !improved && closest_before == closest_after {
            break;
        }
    }

    known
}

//! Registry of the webseeds of a torrent, ranked by how fast they answered
//! previous requests.
mod types;

// re-exports
pub use types::*;

use std::collections::BTreeMap;

use hashbrown::HashSet;
use rand::{seq::SliceRandom, Rng};
use tokio::sync::Mutex;
use tracing::debug;

/// How many of the fastest buckets compete on connectivity.
pub const FASTEST_BUCKETS: usize = 10;

/// Peers grouped by [`Priority`].
///
/// A peer lives in at most one bucket, and is absent from all of them while
/// it is claimed. Empty buckets are removed.
#[derive(Debug, Default)]
pub struct Buckets {
    buckets: BTreeMap<Priority, Vec<Peer>>,
}

impl Buckets {
    /// Take the peer to use for the next download.
    ///
    /// Among the [`FASTEST_BUCKETS`] buckets with the lowest chunk speed, the
    /// one with the lowest connectivity wins, and a random peer of it is
    /// removed and returned.
    pub fn claim_fastest(&mut self) -> Option<(Priority, Peer)> {
        let priority = *self
            .buckets
            .keys()
            .take(FASTEST_BUCKETS)
            .min_by_key(|p| p.connectivity())?;

        let peers = self.buckets.get_mut(&priority)?;
        let i = rand::thread_rng().gen_range(0..peers.len());
        let peer = peers.swap_remove(i);

        if peers.is_empty() {
            self.buckets.remove(&priority);
        }

        Some((priority, peer))
    }

    pub fn insert(&mut self, priority: Priority, peer: Peer) {
        let peers = self.buckets.entry(priority).or_default();
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    /// How many peers are not claimed.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Priority, &Peer)> {
        self.buckets
            .iter()
            .flat_map(|(p, peers)| peers.iter().map(move |v| (p, v)))
    }
}

/// The webseeds of a torrent, shared by all downloaders.
///
/// Every operation locks the registry, does a pure in-memory update and
/// unlocks it. No I/O ever happens while the lock is held, and a caller
/// waiting for the lock is parked instead of spinning.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    buckets: Mutex<Buckets>,
}

impl PeerRegistry {
    /// Register every url once, in random order, with the default priority.
    pub fn new(urls: impl IntoIterator<Item = String>) -> Self {
        let mut seen = HashSet::new();
        let mut peers: Vec<Peer> = urls
            .into_iter()
            .filter(|url| seen.insert(url.clone()))
            .map(Peer::new)
            .collect();

        peers.shuffle(&mut rand::thread_rng());

        let mut buckets = Buckets::default();
        for peer in peers {
            buckets.insert(Priority::default(), peer);
        }

        Self { buckets: Mutex::new(buckets) }
    }

    /// Claim the fastest available peer, see [`Buckets::claim_fastest`].
    ///
    /// Returns `None` if every peer is claimed, the caller should try again
    /// later.
    pub async fn claim_fastest(&self) -> Option<(Priority, Peer)> {
        self.buckets.lock().await.claim_fastest()
    }

    /// Give back a peer that was claimed, without changing its priority.
    pub async fn release(&self, priority: Priority, peer: Peer) {
        self.buckets.lock().await.insert(priority, peer);
    }

    /// Give back a peer with freshly measured latencies, moving it to the
    /// bucket of `measured`.
    pub async fn report_outcome(
        &self,
        old: Priority,
        measured: Priority,
        peer: Peer,
    ) {
        debug!("{peer} moved from {old} to {measured}");
        self.buckets.lock().await.insert(measured, peer);
    }

    /// How many peers are not claimed right now.
    pub async fn available(&self) -> usize {
        self.buckets.lock().await.len()
    }

    /// Every unclaimed peer with its priority, fastest first.
    pub async fn snapshot(&self) -> Vec<(Priority, Peer)> {
        let buckets = self.buckets.lock().await;
        buckets.iter().map(|(p, v)| (*p, v.clone())).collect()
    }
}

//! Remote worker bookkeeping.
//!
//! Transport lives outside this crate; the renderer only tracks which
//! peers exist, how many are usable, and what they have contributed.
//! Tiles handed to a peer are flagged in the tile set and their pixels
//! arrive back through `Renderer::submit_network_result`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub address: String,
    pub state: PeerState,
    pub thread_count: u32,
    pub samples_contributed: u64,
}

/// Registry of render node peers for the current session.
#[derive(Debug, Default)]
pub struct RemoteWorkers {
    peers: Vec<Peer>,
}

impl RemoteWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&mut self, address: impl Into<String>, thread_count: u32) -> usize {
        self.peers.push(Peer {
            address: address.into(),
            state: PeerState::Connected,
            thread_count,
            samples_contributed: 0,
        });
        self.peers.len() - 1
    }

    pub fn mark_disconnected(&mut self, peer: usize) {
        if let Some(p) = self.peers.get_mut(peer) {
            p.state = PeerState::Disconnected;
        }
    }

    pub fn record_samples(&mut self, peer: usize, samples: u64) {
        if let Some(p) = self.peers.get_mut(peer) {
            p.samples_contributed += samples;
        }
    }

    /// Peers that can currently take work.
    pub fn connected(&self) -> usize {
        self.peers
            .iter()
            .filter(|p| p.state == PeerState::Connected)
            .count()
    }

    pub fn total_samples(&self) -> u64 {
        self.peers.iter().map(|p| p.samples_contributed).sum()
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }
}

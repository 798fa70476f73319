use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::dht::{BloomFilter, Endpoint, Identifier, InfoHash};

/// Generated key of a configured server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server#{}", self.0)
    }
}

/// One local identifier and the address it serves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    pub id: ServerId,
    pub identifier: Identifier,
    pub bind: SocketAddr,
    /// Public address, when known or obtained through port mapping.
    pub external: Option<SocketAddr>,
    pub upnp: bool,
}

/// A remote endpoint that announced at least one torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub endpoint: Endpoint,
    pub created: Instant,
    pub updated: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentRecord {
    pub info_hash: InfoHash,
    /// Hosts known to have the complete content.
    pub seeds: BloomFilter,
    /// Hosts known to be downloading.
    pub peers: BloomFilter,
    pub created: Instant,
    pub updated: Instant,
}

impl TorrentRecord {
    pub fn seed_estimate(&self) -> f64 {
        self.seeds.estimate()
    }

    pub fn peer_estimate(&self) -> f64 {
        self.peers.estimate()
    }

    pub fn magnet(&self) -> String {
        magnet_link(&self.info_hash)
    }
}

/// Records that `peer` announced `info_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTorrentRecord {
    pub peer: Endpoint,
    pub info_hash: InfoHash,
    pub seed: bool,
    pub created: Instant,
    pub updated: Instant,
}

pub fn magnet_link(info_hash: &InfoHash) -> String {
    format!("magnet:?urn:btih:{}", info_hash.to_hex())
}

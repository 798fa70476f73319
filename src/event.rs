//! State-change notifications.
//!
//! Routing tables, the torrent store and the wrangler publish immutable
//! snapshots of whatever changed on a broadcast channel. Observers such as a
//! user interface subscribe and never touch live state.
//!
//! ```
//! use rdht::event::EventSink;
//!
//! let sink = EventSink::new(16);
//! let mut rx = sink.subscribe();
//! assert!(rx.try_recv().is_err());
//! ```

use std::net::SocketAddr;

use tokio::sync::broadcast;

use crate::dht::{Bucket, Node};
use crate::store::{PeerRecord, PeerTorrentRecord, ServerId, ServerRecord, TorrentRecord};

#[derive(Debug, Clone)]
pub enum RoutingEvent {
    NodeAdded(Node),
    NodeChanged(Node),
    NodeRemoved(Node),
    BucketChanged(Bucket),
    /// `old` keeps the lower half of its former range, `new` covers the rest.
    BucketSplit { old: Bucket, new: Bucket },
}

#[derive(Debug, Clone)]
pub enum TorrentEvent {
    PeerAdded(PeerRecord),
    PeerUpdated(PeerRecord),
    TorrentAdded(TorrentRecord),
    TorrentChanged(TorrentRecord),
    PeerTorrentAdded(PeerTorrentRecord),
    PeerTorrentUpdated(PeerTorrentRecord),
}

#[derive(Debug, Clone)]
pub enum DhtEvent {
    Routing {
        server: ServerId,
        event: RoutingEvent,
    },
    Torrent(TorrentEvent),
    ServerAdded(ServerRecord),
    ServerRemoved(ServerId),
    PortMappingFailed {
        server: ServerId,
        bind: SocketAddr,
        error: String,
    },
}

/// Cloneable publishing side of the event channel. Publishing with no
/// subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<DhtEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DhtEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: DhtEvent) {
        let _ = self.tx.send(event);
    }
}

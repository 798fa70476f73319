use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use tracing::debug;

use super::records::{magnet_link, PeerRecord, PeerTorrentRecord, TorrentRecord};
use crate::dht::{BloomFilter, Endpoint, InfoHash};
use crate::event::{DhtEvent, EventSink, TorrentEvent};

/// Announced peers, tracked torrents and the links between them.
///
/// Every mutation takes `&mut self`, so a call is applied completely before
/// anyone else observes the store. Events for a call are published after all
/// of its changes are in place.
pub struct TorrentStore {
    peers: HashMap<Endpoint, PeerRecord>,
    torrents: HashMap<InfoHash, TorrentRecord>,
    links: BTreeMap<(InfoHash, Endpoint), PeerTorrentRecord>,
    events: EventSink,
}

impl TorrentStore {
    pub fn new(events: EventSink) -> Self {
        Self {
            peers: HashMap::new(),
            torrents: HashMap::new(),
            links: BTreeMap::new(),
            events,
        }
    }

    /// Records that `endpoint` announced `info_hash`, as a seed or not.
    pub fn record_announcement(
        &mut self,
        endpoint: Endpoint,
        info_hash: InfoHash,
        seed: bool,
        now: Instant,
    ) -> PeerTorrentRecord {
        let mut pending_events = Vec::with_capacity(3);

        match self.peers.get_mut(&endpoint) {
            Some(peer) => {
                peer.updated = now;
                pending_events.push(TorrentEvent::PeerUpdated(peer.clone()));
            }
            None => {
                let peer = PeerRecord {
                    endpoint,
                    created: now,
                    updated: now,
                };
                self.peers.insert(endpoint, peer.clone());
                pending_events.push(TorrentEvent::PeerAdded(peer));
            }
        }

        let single = BloomFilter::with_host(&endpoint.ip());
        let (torrent, added) = self.upsert_torrent(info_hash, now);
        if seed {
            torrent.seeds.merge(&single);
        } else {
            torrent.peers.merge(&single);
        }
        pending_events.push(if added {
            TorrentEvent::TorrentAdded(torrent.clone())
        } else {
            TorrentEvent::TorrentChanged(torrent.clone())
        });

        let link = match self.links.get_mut(&(info_hash, endpoint)) {
            Some(link) => {
                link.seed = seed;
                link.updated = now;
                let link = link.clone();
                pending_events.push(TorrentEvent::PeerTorrentUpdated(link.clone()));
                link
            }
            None => {
                let link = PeerTorrentRecord {
                    peer: endpoint,
                    info_hash,
                    seed,
                    created: now,
                    updated: now,
                };
                self.links.insert((info_hash, endpoint), link.clone());
                pending_events.push(TorrentEvent::PeerTorrentAdded(link.clone()));
                link
            }
        };

        debug!(%endpoint, %info_hash, seed, "announcement recorded");
        for event in pending_events {
            self.events.emit(DhtEvent::Torrent(event));
        }
        link
    }

    /// Unions a remote scrape filter into the torrent's seed or peer filter,
    /// creating the torrent if it is new.
    pub fn merge_scrape_filter(
        &mut self,
        info_hash: InfoHash,
        filter: &BloomFilter,
        seeds: bool,
        now: Instant,
    ) -> TorrentRecord {
        let (torrent, added) = self.upsert_torrent(info_hash, now);
        if seeds {
            torrent.seeds.merge(filter);
        } else {
            torrent.peers.merge(filter);
        }

        let torrent = torrent.clone();
        self.events.emit(DhtEvent::Torrent(if added {
            TorrentEvent::TorrentAdded(torrent.clone())
        } else {
            TorrentEvent::TorrentChanged(torrent.clone())
        }));
        torrent
    }

    /// Peers that announced `info_hash`, most recently updated first.
    /// `noseed` leaves seeds out.
    pub fn peers_for(&self, info_hash: &InfoHash, noseed: bool) -> Vec<PeerTorrentRecord> {
        let mut links: Vec<PeerTorrentRecord> = self
            .links
            .values()
            .filter(|link| &link.info_hash == info_hash && !(noseed && link.seed))
            .cloned()
            .collect();
        links.sort_by(|a, b| b.updated.cmp(&a.updated));
        links
    }

    pub fn torrents_of(&self, endpoint: &Endpoint) -> Vec<PeerTorrentRecord> {
        self.links
            .values()
            .filter(|link| &link.peer == endpoint)
            .cloned()
            .collect()
    }

    pub fn peer(&self, endpoint: &Endpoint) -> Option<&PeerRecord> {
        self.peers.get(endpoint)
    }

    pub fn torrent(&self, info_hash: &InfoHash) -> Option<&TorrentRecord> {
        self.torrents.get(info_hash)
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.peers.values().cloned().collect()
    }

    pub fn torrents(&self) -> Vec<TorrentRecord> {
        self.torrents.values().cloned().collect()
    }

    /// Magnet link for a tracked torrent.
    pub fn magnet_link(&self, info_hash: &InfoHash) -> Option<String> {
        self.torrents.get(info_hash).map(|t| magnet_link(&t.info_hash))
    }

    fn upsert_torrent(&mut self, info_hash: InfoHash, now: Instant) -> (&mut TorrentRecord, bool) {
        let added = !self.torrents.contains_key(&info_hash);
        let torrent = self.torrents.entry(info_hash).or_insert_with(|| TorrentRecord {
            info_hash,
            seeds: BloomFilter::new(),
            peers: BloomFilter::new(),
            created: now,
            updated: now,
        });
        torrent.updated = now;
        (torrent, added)
    }
}

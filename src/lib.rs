//! rdht - A BitTorrent DHT node wrangler
//!
//! This library runs any number of Mainline DHT identities side by side,
//! answering and issuing KRPC queries, tracking announced peers per torrent
//! and estimating swarm sizes from BEP-33 scrape filters.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`dht`] - BEP-5/BEP-33 identifiers, messages, routing tables and node servers
//! - [`store`] - Routing and torrent state behind a single storage worker
//! - [`wrangler`] - Multiple node servers sharing one dispatch loop and store
//! - [`event`] - Broadcast notifications of state changes
//! - [`upnp`] - Port mapping for servers behind NAT
//! - [`config`] - Per-instance configuration
//! - [`constants`] - Protocol constants and defaults

pub mod bencode;
pub mod config;
pub mod constants;
pub mod dht;
pub mod event;
pub mod store;
pub mod upnp;
pub mod wrangler;

pub use bencode::{decode, encode, BencodeError, Value};
pub use config::DhtConfig;
pub use dht::{
    BloomFilter, DhtError, DhtMessage, Endpoint, Identifier, InfoHash, NodeServer, QueryHandle,
    RoutingTable,
};
pub use event::{DhtEvent, EventSink, RoutingEvent, TorrentEvent};
pub use store::{ServerId, Storage, StorageWorker, StoreError};
pub use upnp::{MappingError, NatPmp, PortMapper, PortMapping};
pub use wrangler::NodeWrangler;

//! Routing and torrent state behind a single storage worker.
//!
//! The [`Database`] is owned by one dedicated thread. Servers, the wrangler
//! and observers reach it only by submitting closures through a [`Storage`]
//! handle, so no two call sites ever mutate routing or torrent state
//! concurrently.
//!
//! ```no_run
//! use rdht::event::EventSink;
//! use rdht::store::StorageWorker;
//!
//! # async fn example() -> Result<(), rdht::store::StoreError> {
//! let worker = StorageWorker::spawn(EventSink::new(64))?;
//! let storage = worker.storage();
//! let torrents = storage.call(|db| db.torrents().torrents()).await?;
//! assert!(torrents.is_empty());
//! worker.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod database;
mod error;
mod records;
mod torrents;
mod worker;

pub use database::Database;
pub use error::StoreError;
pub use records::{
    magnet_link, PeerRecord, PeerTorrentRecord, ServerId, ServerRecord, TorrentRecord,
};
pub use torrents::TorrentStore;
pub use worker::{Storage, StorageWorker};

use bytes::Bytes;
use thiserror::Error;

use crate::store::{ServerId, StoreError};
use crate::upnp::MappingError;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A query whose envelope decoded but whose arguments did not. Carries
    /// the transaction id so the sender can be told.
    #[error("malformed query: {reason}")]
    MalformedQuery {
        transaction_id: Bytes,
        reason: String,
    },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid packed endpoint length {0}")]
    InvalidEndpoint(usize),

    #[error("invalid bloom filter: {0}")]
    InvalidBloomFilter(String),

    #[error("too many outstanding transactions")]
    RateLimited,

    #[error("unknown server {0}")]
    UnknownServer(ServerId),

    #[error("port mapping failed: {0}")]
    PortMapping(#[from] MappingError),

    #[error("bootstrap file: {0}")]
    Bootstrap(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

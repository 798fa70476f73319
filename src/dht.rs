//! Distributed Hash Table (BEP-5, BEP-33)
//!
//! Identifiers, endpoints and the KRPC wire messages, the per-identifier
//! routing table, swarm-size bloom filters and the UDP node server that ties
//! them together.

mod bloom;
mod endpoint;
mod error;
mod id;
mod message;
mod node;
mod pending;
mod routing;
mod server;
mod token;

pub use bloom::{BloomFilter, BLOOM_BITS, BLOOM_BYTES, BLOOM_HASHES};
pub use endpoint::{Endpoint, PACKED_V4_LEN, PACKED_V6_LEN};
pub use error::DhtError;
pub use id::{Identifier, InfoHash, ID_LEN};
pub use message::{DhtMessage, MessageBody, Query, Response, TransactionId};
pub use node::{
    Bucket, BucketId, Contact, Node, NodeKey, COMPACT_NODE_V4_LEN, COMPACT_NODE_V6_LEN,
};
pub use pending::QueryHandle;
pub use routing::{id_space_end, AddOutcome, Admission, RoutingTable};
pub use server::NodeServer;
pub use token::SecretWindow;

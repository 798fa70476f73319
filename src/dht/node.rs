use super::endpoint::{Endpoint, PACKED_V4_LEN, PACKED_V6_LEN};
use super::id::{Identifier, ID_LEN};
use bytes::Bytes;
use primitive_types::U256;
use std::fmt;
use std::time::Instant;

pub const COMPACT_NODE_V4_LEN: usize = ID_LEN + PACKED_V4_LEN;
pub const COMPACT_NODE_V6_LEN: usize = ID_LEN + PACKED_V6_LEN;

/// Arena handle for a bucket inside one routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId(pub u32);

/// Arena handle for a node inside one routing table. Handles are issued in
/// insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u64);

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bucket#{}", self.0)
    }
}

/// An identifier paired with the endpoint it was seen at, as carried in
/// `nodes` and `nodes6` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Contact {
    pub id: Identifier,
    pub endpoint: Endpoint,
}

impl Contact {
    pub fn new(id: Identifier, endpoint: Endpoint) -> Self {
        Self { id, endpoint }
    }

    /// Parses one 26 byte (IPv4) or 38 byte (IPv6) compact entry.
    pub fn from_compact(data: &[u8]) -> Option<Self> {
        if data.len() != COMPACT_NODE_V4_LEN && data.len() != COMPACT_NODE_V6_LEN {
            return None;
        }

        let id = Identifier::from_bytes(&data[..ID_LEN]).ok()?;
        let endpoint = Endpoint::from_packed(&data[ID_LEN..]).ok()?;
        Some(Self { id, endpoint })
    }

    pub fn to_compact(&self) -> Vec<u8> {
        let mut compact = Vec::with_capacity(COMPACT_NODE_V6_LEN);
        compact.extend_from_slice(self.id.as_bytes());
        compact.extend_from_slice(&self.endpoint.to_packed());
        compact
    }

    /// Splits a concatenated `nodes` (26 byte) or `nodes6` (38 byte) string.
    /// A trailing partial entry is ignored.
    pub fn parse_all(data: &[u8], entry_len: usize) -> Vec<Contact> {
        data.chunks_exact(entry_len)
            .filter_map(Contact::from_compact)
            .collect()
    }
}

/// A remote node as known to one local routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: NodeKey,
    pub id: Identifier,
    pub endpoint: Endpoint,
    pub bucket: BucketId,
    /// Held in reserve until a slot in its bucket opens.
    pub pending: bool,
    /// The last contact was valid.
    pub good: bool,
    pub version: Option<Bytes>,
    /// Messages the node originated towards us.
    pub received: u64,
    pub created: Instant,
    pub updated: Instant,
}

impl Node {
    pub fn contact(&self) -> Contact {
        Contact::new(self.id, self.endpoint)
    }

    pub fn is_idle(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.saturating_duration_since(self.updated) >= timeout
    }
}

/// A half-open range `[start, end)` of the identifier space. `end` may be
/// 2^160, which is why bounds are kept as 256-bit integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub id: BucketId,
    pub start: U256,
    pub end: U256,
    pub created: Instant,
    pub updated: Instant,
}

impl Bucket {
    pub fn contains(&self, id: &Identifier) -> bool {
        let value = id.to_u256();
        self.start <= value && value < self.end
    }

    pub fn midpoint(&self) -> U256 {
        self.start + (self.end - self.start) / 2
    }

    /// Width of the range; a bucket of width one cannot split.
    pub fn width(&self) -> U256 {
        self.end - self.start
    }
}

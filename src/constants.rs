//! Protocol constants and default tuning parameters.
//!
//! These are the defaults behind [`crate::config::DhtConfig`]; nothing reads
//! them directly at runtime except through a config value.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Version tag sent in the `v` field of every outgoing message
pub const CLIENT_VERSION: &[u8] = b"RD\x00\x01";

/// Default DHT listen port
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Routing table
// ============================================================================

/// Confirmed nodes a bucket may hold (Kademlia k)
pub const MAX_BUCKET_SIZE: usize = 8;

/// A node or bucket not heard from for this long is considered idle
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Nodes returned in `find_node` and `get_peers` responses
pub const CLOSEST_NODES: usize = 8;

// ============================================================================
// Maintenance
// ============================================================================

/// Interval between self-addressed refresh datagrams
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Token secrets kept; one is rotated in per refresh
pub const SECRET_WINDOW: usize = 20;

// ============================================================================
// Transactions
// ============================================================================

/// Outstanding queries per server, far below the 65536 transaction ids
pub const MAX_PENDING_QUERIES: usize = 1024;

/// Unanswered queries are dropped after this long
pub const PENDING_QUERY_TTL: Duration = Duration::from_secs(60);

// ============================================================================
// Buffers and channels
// ============================================================================

/// Largest datagram accepted
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Events buffered per subscriber before lagging subscribers lose some
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// `values` entries returned per `get_peers` response
pub const MAX_VALUES_PER_RESPONSE: usize = 100;

// ============================================================================
// Port mapping (NAT-PMP)
// ============================================================================

pub const NATPMP_PORT: u16 = 5351;

pub const NATPMP_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Requested mapping lifetime in seconds
pub const NATPMP_LIFETIME: u32 = 7200;

// ============================================================================
// KRPC error codes (BEP-5)
// ============================================================================

pub const ERROR_GENERIC: i64 = 201;
pub const ERROR_SERVER: i64 = 202;
pub const ERROR_PROTOCOL: i64 = 203;
pub const ERROR_METHOD_UNKNOWN: i64 = 204;

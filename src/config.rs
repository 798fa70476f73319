//! Per-instance configuration.
//!
//! Every component receives a [`DhtConfig`] at construction; there is no
//! process-wide default state.
//!
//! ```
//! use rdht::config::DhtConfig;
//! use std::time::Duration;
//!
//! let config = DhtConfig::default().with_refresh_interval(Duration::from_secs(5));
//! assert_eq!(config.max_bucket_size, 8);
//! assert_eq!(config.refresh_interval, Duration::from_secs(5));
//! ```

use std::time::Duration;

use bytes::Bytes;

use crate::constants::{
    CLIENT_VERSION, CLOSEST_NODES, EVENT_CHANNEL_CAPACITY, IDLE_TIMEOUT, MAX_BUCKET_SIZE,
    MAX_DATAGRAM_SIZE, MAX_PENDING_QUERIES, PENDING_QUERY_TTL, REFRESH_INTERVAL, SECRET_WINDOW,
};

#[derive(Debug, Clone)]
pub struct DhtConfig {
    pub max_bucket_size: usize,
    pub idle_timeout: Duration,
    pub closest_nodes: usize,
    pub refresh_interval: Duration,
    pub secret_window: usize,
    pub max_pending_queries: usize,
    pub pending_query_ttl: Duration,
    pub recv_buffer_size: usize,
    pub event_capacity: usize,
    pub version: Bytes,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            max_bucket_size: MAX_BUCKET_SIZE,
            idle_timeout: IDLE_TIMEOUT,
            closest_nodes: CLOSEST_NODES,
            refresh_interval: REFRESH_INTERVAL,
            secret_window: SECRET_WINDOW,
            max_pending_queries: MAX_PENDING_QUERIES,
            pending_query_ttl: PENDING_QUERY_TTL,
            recv_buffer_size: MAX_DATAGRAM_SIZE,
            event_capacity: EVENT_CHANNEL_CAPACITY,
            version: Bytes::from_static(CLIENT_VERSION),
        }
    }
}

impl DhtConfig {
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_secret_window(mut self, window: usize) -> Self {
        self.secret_window = window.max(1);
        self
    }

    pub fn with_max_pending_queries(mut self, max: usize) -> Self {
        self.max_pending_queries = max;
        self
    }

    pub fn with_pending_query_ttl(mut self, ttl: Duration) -> Self {
        self.pending_query_ttl = ttl;
        self
    }

    pub fn with_version(mut self, version: impl Into<Bytes>) -> Self {
        self.version = version.into();
        self
    }
}

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::oneshot;

use super::endpoint::Endpoint;
use super::error::DhtError;
use super::id::InfoHash;
use super::message::{DhtMessage, TransactionId};

/// Work to run when the response to a query arrives.
#[derive(Debug)]
pub(crate) enum Continuation {
    Ping,
    /// Ping the contacts the response carries.
    FindNode,
    /// Record returned peers and scrape filters, then ping the contacts.
    GetPeers { info_hash: InfoHash },
    AnnouncePeer,
    /// Hand the message to a caller awaiting a [`QueryHandle`].
    Waiter(oneshot::Sender<DhtMessage>),
}

#[derive(Debug)]
pub(crate) struct PendingQuery {
    pub destination: Endpoint,
    pub sent_at: Instant,
    /// Consumed last-registered first.
    pub callbacks: Vec<Continuation>,
}

/// Outstanding queries of one server keyed by 16-bit transaction id.
///
/// The count is capped well below 65536 so the wrapping counter can always
/// find a free id, and entries older than the TTL are dropped by `expire`.
#[derive(Debug)]
pub(crate) struct PendingQueries {
    last_tid: u16,
    entries: HashMap<u16, PendingQuery>,
    max_outstanding: usize,
    ttl: Duration,
}

impl PendingQueries {
    pub fn new(max_outstanding: usize, ttl: Duration) -> Self {
        Self {
            last_tid: rand::random(),
            entries: HashMap::new(),
            max_outstanding: max_outstanding.min(u16::MAX as usize),
            ttl,
        }
    }

    /// Reserves the next free transaction id for a query to `destination`.
    pub fn allocate(
        &mut self,
        destination: Endpoint,
        callbacks: Vec<Continuation>,
        now: Instant,
    ) -> Result<TransactionId, DhtError> {
        if self.entries.len() >= self.max_outstanding {
            return Err(DhtError::RateLimited);
        }

        let mut tid = self.last_tid.wrapping_add(1);
        while self.entries.contains_key(&tid) {
            tid = tid.wrapping_add(1);
        }
        self.last_tid = tid;

        self.entries.insert(
            tid,
            PendingQuery {
                destination,
                sent_at: now,
                callbacks,
            },
        );
        Ok(encode_tid(tid))
    }

    /// Removes and returns the query `transaction_id` names, provided the
    /// reply came from the endpoint the query was sent to.
    pub fn take(&mut self, transaction_id: &[u8], from: &Endpoint) -> Option<PendingQuery> {
        let tid = decode_tid(transaction_id)?;
        match self.entries.get(&tid) {
            Some(query) if &query.destination == from => self.entries.remove(&tid),
            _ => None,
        }
    }

    /// Drops a registration whose datagram could not be sent.
    pub fn cancel(&mut self, transaction_id: &[u8]) {
        if let Some(tid) = decode_tid(transaction_id) {
            self.entries.remove(&tid);
        }
    }

    /// Removes every query older than the TTL. Dropping the returned entries
    /// closes their waiters.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingQuery> {
        let ttl = self.ttl;
        let stale: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, q)| now.saturating_duration_since(q.sent_at) >= ttl)
            .map(|(tid, _)| *tid)
            .collect();

        stale
            .into_iter()
            .filter_map(|tid| self.entries.remove(&tid))
            .collect()
    }

    /// Whether a query to `endpoint` is still awaiting its reply.
    pub fn has_outstanding(&self, endpoint: &Endpoint) -> bool {
        self.entries.values().any(|q| &q.destination == endpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn set_last_tid(&mut self, tid: u16) {
        self.last_tid = tid;
    }
}

fn encode_tid(tid: u16) -> TransactionId {
    Bytes::copy_from_slice(&tid.to_be_bytes())
}

fn decode_tid(data: &[u8]) -> Option<u16> {
    let bytes: [u8; 2] = data.try_into().ok()?;
    Some(u16::from_be_bytes(bytes))
}

/// The caller's side of an outgoing query.
#[derive(Debug)]
pub struct QueryHandle {
    transaction_id: TransactionId,
    destination: Endpoint,
    rx: oneshot::Receiver<DhtMessage>,
}

impl QueryHandle {
    pub(crate) fn new(
        transaction_id: TransactionId,
        destination: Endpoint,
        rx: oneshot::Receiver<DhtMessage>,
    ) -> Self {
        Self {
            transaction_id,
            destination,
            rx,
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn destination(&self) -> Endpoint {
        self.destination
    }

    /// Resolves to the response or error the remote sent, or `None` once the
    /// query expired or its server shut down.
    pub async fn response(self) -> Option<DhtMessage> {
        self.rx.await.ok()
    }
}

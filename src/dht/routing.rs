use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use bytes::Bytes;
use primitive_types::U256;
use rand::seq::IndexedRandom;
use tracing::{debug, trace};

use super::endpoint::Endpoint;
use super::id::Identifier;
use super::node::{Bucket, BucketId, Node, NodeKey};
use crate::config::DhtConfig;
use crate::event::{DhtEvent, EventSink, RoutingEvent};
use crate::store::ServerId;

/// One past the largest identifier, 2^160.
pub fn id_space_end() -> U256 {
    U256::one() << 160usize
}

/// What `add_node` did with a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Already known; timestamps and counters were updated.
    Refreshed,
    /// Admitted as a confirmed bucket member.
    Added,
    /// Held in reserve because its bucket is full.
    Pending,
    /// Our own identifier, or the bucket's reserve is full too.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    pub admission: Admission,
    /// Idle members the caller should ping out of band.
    pub pings: Vec<Endpoint>,
}

/// The routing table of a single local identifier.
///
/// Buckets and nodes live in arenas keyed by [`BucketId`] and [`NodeKey`];
/// a node refers to its bucket by id. Bucket ranges always partition
/// `[0, 2^160)` exactly. Only the bucket holding our own identifier is ever
/// split, so resolution concentrates around ourselves.
pub struct RoutingTable {
    server: ServerId,
    own_id: Identifier,
    max_bucket_size: usize,
    idle_timeout: Duration,
    buckets: BTreeMap<BucketId, Bucket>,
    ranges: BTreeMap<U256, BucketId>,
    nodes: BTreeMap<NodeKey, Node>,
    by_id: HashMap<Identifier, NodeKey>,
    next_bucket: u32,
    next_node: u64,
    events: EventSink,
}

impl RoutingTable {
    pub fn new(
        server: ServerId,
        own_id: Identifier,
        config: &DhtConfig,
        events: EventSink,
        now: Instant,
    ) -> Self {
        let mut table = Self {
            server,
            own_id,
            max_bucket_size: config.max_bucket_size,
            idle_timeout: config.idle_timeout,
            buckets: BTreeMap::new(),
            ranges: BTreeMap::new(),
            nodes: BTreeMap::new(),
            by_id: HashMap::new(),
            next_bucket: 0,
            next_node: 0,
            events,
        };

        let root = table.create_bucket(U256::zero(), id_space_end(), now);
        table.emit(RoutingEvent::BucketChanged(table.buckets[&root].clone()));
        table
    }

    pub fn server(&self) -> ServerId {
        self.server
    }

    pub fn own_id(&self) -> &Identifier {
        &self.own_id
    }

    /// Records a contact with `id` at `endpoint`.
    ///
    /// `received` is set when the node itself sent us the message, which
    /// bumps its received counter.
    pub fn add_node(
        &mut self,
        endpoint: Endpoint,
        id: Identifier,
        version: Option<Bytes>,
        received: bool,
        now: Instant,
    ) -> AddOutcome {
        if id == self.own_id {
            return AddOutcome {
                admission: Admission::Ignored,
                pings: Vec::new(),
            };
        }

        if let Some(&key) = self.by_id.get(&id) {
            self.touch_node(key, version, received, now);
            return AddOutcome {
                admission: Admission::Refreshed,
                pings: Vec::new(),
            };
        }

        let mut pings = Vec::new();
        loop {
            let bucket_id = self.bucket_id_for(&id);

            if self.confirmed_count(bucket_id) < self.max_bucket_size {
                self.insert_node(endpoint, id, bucket_id, false, version, received, now);
                return AddOutcome {
                    admission: Admission::Added,
                    pings,
                };
            }

            let bucket = &self.buckets[&bucket_id];
            if bucket.contains(&self.own_id) && bucket.width() > U256::one() {
                self.split_bucket(bucket_id, now);
                continue;
            }

            let (culled, idle) = self.cull_bucket(bucket_id, now);
            for endpoint in idle {
                if !pings.contains(&endpoint) {
                    pings.push(endpoint);
                }
            }
            if culled {
                continue;
            }

            if self.pending_count(bucket_id) >= self.max_bucket_size {
                trace!(%id, bucket = %bucket_id, "bucket reserve full, dropping contact");
                return AddOutcome {
                    admission: Admission::Ignored,
                    pings,
                };
            }

            self.insert_node(endpoint, id, bucket_id, true, version, received, now);
            return AddOutcome {
                admission: Admission::Pending,
                pings,
            };
        }
    }

    pub fn remove_node(&mut self, id: &Identifier) -> Option<Node> {
        let key = *self.by_id.get(id)?;
        self.delete_node(key)
    }

    /// Flags the node last seen at `endpoint` as bad because a query sent at
    /// `sent_at` went unanswered. A node heard from after `sent_at` keeps its
    /// flag. Returns whether a node was found.
    pub fn mark_failed(&mut self, endpoint: &Endpoint, sent_at: Instant) -> bool {
        let Some(node) = self.nodes.values_mut().find(|n| &n.endpoint == endpoint) else {
            return false;
        };

        if node.updated > sent_at {
            trace!(id = %node.id, %endpoint, "expired query predates last contact");
        } else if node.good {
            node.good = false;
            let snapshot = node.clone();
            debug!(id = %snapshot.id, %endpoint, "node stopped answering");
            self.emit(RoutingEvent::NodeChanged(snapshot));
        }
        true
    }

    /// Periodic maintenance. Drops stale or bad reserve nodes, promotes
    /// reserve nodes whose bucket has room, and returns the endpoints that
    /// should be pinged: idle members found while culling plus one random
    /// member of every bucket that has been quiet for the idle timeout.
    pub fn refresh(&mut self, now: Instant) -> Vec<Endpoint> {
        let mut pings: Vec<Endpoint> = Vec::new();

        let pending: Vec<NodeKey> = self
            .nodes
            .values()
            .filter(|n| n.pending)
            .map(|n| n.key)
            .collect();

        for key in pending {
            let Some(node) = self.nodes.get(&key) else {
                continue;
            };

            if node.is_idle(now, self.idle_timeout) || !node.good {
                self.delete_node(key);
                continue;
            }

            let bucket_id = node.bucket;
            let room = if self.confirmed_count(bucket_id) < self.max_bucket_size {
                true
            } else {
                let (culled, idle) = self.cull_bucket(bucket_id, now);
                pings.extend(idle);
                culled
            };

            if room {
                self.promote_node(key, now);
            }
        }

        let quiet: Vec<BucketId> = self
            .buckets
            .values()
            .filter(|b| now.saturating_duration_since(b.updated) > self.idle_timeout)
            .map(|b| b.id)
            .collect();

        let mut rng = rand::rng();
        for bucket_id in quiet {
            let members: Vec<&Node> = self.confirmed_members(bucket_id).collect();
            if let Some(node) = members.choose(&mut rng) {
                pings.push(node.endpoint);
            }
        }

        let mut unique = Vec::with_capacity(pings.len());
        for endpoint in pings {
            if !unique.contains(&endpoint) {
                unique.push(endpoint);
            }
        }
        unique
    }

    /// Up to `count` confirmed, good nodes ordered by XOR distance to
    /// `target`, ties broken by insertion order.
    pub fn get_closest(&self, target: &Identifier, count: usize) -> Vec<Node> {
        let mut candidates: Vec<(Identifier, &Node)> = self
            .nodes
            .values()
            .filter(|n| !n.pending && n.good)
            .map(|n| (n.id.distance(target), n))
            .collect();

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.key.cmp(&b.1.key)));
        candidates
            .into_iter()
            .take(count)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn node(&self, id: &Identifier) -> Option<&Node> {
        self.by_id.get(id).and_then(|key| self.nodes.get(key))
    }

    pub fn node_by_endpoint(&self, endpoint: &Endpoint) -> Option<&Node> {
        self.nodes.values().find(|n| &n.endpoint == endpoint)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn bucket(&self, id: BucketId) -> Option<&Bucket> {
        self.buckets.get(&id)
    }

    /// Buckets in identifier order.
    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.ranges.values().filter_map(|id| self.buckets.get(id))
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// The bucket whose range covers `id`.
    ///
    /// # Panics
    ///
    /// Panics if no bucket covers `id`. Bucket ranges always partition the
    /// identifier space, so this indicates a bug in the table itself.
    pub fn bucket_for(&self, id: &Identifier) -> &Bucket {
        &self.buckets[&self.bucket_id_for(id)]
    }

    /// Verifies that bucket ranges partition the identifier space and that
    /// every node sits in the bucket covering it.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut expected_start = U256::zero();
        for bucket in self.buckets() {
            if bucket.start != expected_start {
                return Err(format!(
                    "{} starts at {} but previous range ended at {}",
                    bucket.id, bucket.start, expected_start
                ));
            }
            if bucket.end <= bucket.start {
                return Err(format!("{} is empty", bucket.id));
            }
            expected_start = bucket.end;
        }
        if expected_start != id_space_end() {
            return Err(format!("ranges end at {}, not 2^160", expected_start));
        }
        if self.ranges.len() != self.buckets.len() {
            return Err("range index out of sync with buckets".into());
        }

        for node in self.nodes.values() {
            let bucket = self
                .buckets
                .get(&node.bucket)
                .ok_or_else(|| format!("node {} refers to missing {}", node.id, node.bucket))?;
            if !bucket.contains(&node.id) {
                return Err(format!("node {} outside its {}", node.id, node.bucket));
            }
        }
        Ok(())
    }

    fn emit(&self, event: RoutingEvent) {
        self.events.emit(DhtEvent::Routing {
            server: self.server,
            event,
        });
    }

    fn bucket_id_for(&self, id: &Identifier) -> BucketId {
        let value = id.to_u256();
        match self.ranges.range(..=value).next_back() {
            Some((_, bucket_id)) if self.buckets[bucket_id].end > value => *bucket_id,
            _ => panic!("no bucket covers identifier {}", id),
        }
    }

    fn confirmed_members(&self, bucket: BucketId) -> impl Iterator<Item = &Node> {
        self.nodes
            .values()
            .filter(move |n| n.bucket == bucket && !n.pending)
    }

    fn confirmed_count(&self, bucket: BucketId) -> usize {
        self.confirmed_members(bucket).count()
    }

    fn pending_count(&self, bucket: BucketId) -> usize {
        self.nodes
            .values()
            .filter(|n| n.bucket == bucket && n.pending)
            .count()
    }

    fn create_bucket(&mut self, start: U256, end: U256, now: Instant) -> BucketId {
        let id = BucketId(self.next_bucket);
        self.next_bucket += 1;
        self.buckets.insert(
            id,
            Bucket {
                id,
                start,
                end,
                created: now,
                updated: now,
            },
        );
        self.ranges.insert(start, id);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_node(
        &mut self,
        endpoint: Endpoint,
        id: Identifier,
        bucket: BucketId,
        pending: bool,
        version: Option<Bytes>,
        received: bool,
        now: Instant,
    ) {
        let key = NodeKey(self.next_node);
        self.next_node += 1;

        let node = Node {
            key,
            id,
            endpoint,
            bucket,
            pending,
            good: true,
            version,
            received: u64::from(received),
            created: now,
            updated: now,
        };
        debug!(%id, %endpoint, %bucket, pending, "node added");

        self.nodes.insert(key, node.clone());
        self.by_id.insert(id, key);
        self.emit(RoutingEvent::NodeAdded(node));

        if let Some(b) = self.buckets.get_mut(&bucket) {
            if !pending {
                b.updated = now;
            }
            let snapshot = b.clone();
            self.emit(RoutingEvent::BucketChanged(snapshot));
        }
    }

    fn touch_node(&mut self, key: NodeKey, version: Option<Bytes>, received: bool, now: Instant) {
        let Some(node) = self.nodes.get_mut(&key) else {
            return;
        };

        node.updated = now;
        node.good = true;
        if version.is_some() {
            node.version = version;
        }
        if received {
            node.received += 1;
        }
        let snapshot = node.clone();

        if !snapshot.pending {
            if let Some(bucket) = self.buckets.get_mut(&snapshot.bucket) {
                bucket.updated = now;
            }
        }
        self.emit(RoutingEvent::NodeChanged(snapshot));
    }

    fn promote_node(&mut self, key: NodeKey, now: Instant) {
        let Some(node) = self.nodes.get_mut(&key) else {
            return;
        };
        node.pending = false;
        node.updated = now;
        let snapshot = node.clone();
        debug!(id = %snapshot.id, bucket = %snapshot.bucket, "reserve node promoted");
        self.emit(RoutingEvent::NodeChanged(snapshot.clone()));

        if let Some(bucket) = self.buckets.get_mut(&snapshot.bucket) {
            bucket.updated = now;
            let bucket = bucket.clone();
            self.emit(RoutingEvent::BucketChanged(bucket));
        }
    }

    fn delete_node(&mut self, key: NodeKey) -> Option<Node> {
        let node = self.nodes.remove(&key)?;
        self.by_id.remove(&node.id);
        debug!(id = %node.id, endpoint = %node.endpoint, "node removed");
        self.emit(RoutingEvent::NodeRemoved(node.clone()));
        Some(node)
    }

    /// Scans confirmed members oldest first. The first bad one is deleted;
    /// good members idle past the timeout are collected for pinging.
    fn cull_bucket(&mut self, bucket: BucketId, now: Instant) -> (bool, Vec<Endpoint>) {
        let mut members: Vec<&Node> = self.confirmed_members(bucket).collect();
        members.sort_by(|a, b| a.updated.cmp(&b.updated).then(a.key.cmp(&b.key)));

        let mut idle = Vec::new();
        let mut victim = None;
        for node in members {
            if node.good {
                if node.is_idle(now, self.idle_timeout) {
                    idle.push(node.endpoint);
                }
            } else {
                victim = Some(node.key);
                break;
            }
        }

        match victim {
            Some(key) => {
                self.delete_node(key);
                (true, idle)
            }
            None => (false, idle),
        }
    }

    fn split_bucket(&mut self, bucket_id: BucketId, now: Instant) {
        let (mid, end) = match self.buckets.get_mut(&bucket_id) {
            Some(bucket) => {
                let mid = bucket.midpoint();
                let end = bucket.end;
                bucket.end = mid;
                bucket.updated = now;
                (mid, end)
            }
            None => panic!("split of unknown {}", bucket_id),
        };

        let new_id = self.create_bucket(mid, end, now);

        let moved: Vec<NodeKey> = self
            .nodes
            .values()
            .filter(|n| n.bucket == bucket_id && n.id.to_u256() >= mid)
            .map(|n| n.key)
            .collect();

        for key in &moved {
            if let Some(node) = self.nodes.get_mut(key) {
                node.bucket = new_id;
                let snapshot = node.clone();
                self.emit(RoutingEvent::NodeChanged(snapshot));
            }
        }

        debug!(
            old = %bucket_id,
            new = %new_id,
            moved = moved.len(),
            "bucket split"
        );

        let old = self.buckets[&bucket_id].clone();
        let new = self.buckets[&new_id].clone();
        self.emit(RoutingEvent::BucketSplit { old, new });
    }
}

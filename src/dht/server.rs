use super::endpoint::Endpoint;
use super::error::DhtError;
use super::id::{Identifier, InfoHash};
use super::message::{DhtMessage, MessageBody, Query, Response, TransactionId};
use super::node::{Bucket, Contact, Node};
use super::pending::{Continuation, PendingQueries, QueryHandle};
use super::token::SecretWindow;
use crate::bencode::{decode, Value};
use crate::config::DhtConfig;
use crate::constants::{
    ERROR_METHOD_UNKNOWN, ERROR_PROTOCOL, ERROR_SERVER, MAX_VALUES_PER_RESPONSE,
};
use crate::store::{ServerId, Storage, StoreError};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

enum Reply {
    Response(Response),
    Error { code: i64, message: String },
}

struct QueryOutcome {
    sender_known: bool,
    pings: Vec<Endpoint>,
    reply: Reply,
}

/// `NodeServer` is one local DHT identity ([BEP-5]) serving on one UDP
/// socket.
///
/// Routing and torrent state live in the storage worker; the server only
/// keeps its outstanding transactions and token secrets. Maintenance runs
/// when the server receives its own refresh datagram, which a timer task
/// sends to the server's socket every refresh interval, so it is serialized
/// with ordinary message handling.
///
/// # Examples
///
/// ```no_run
/// use rdht::config::DhtConfig;
/// use rdht::dht::{Identifier, NodeServer};
/// use rdht::event::EventSink;
/// use rdht::store::{ServerId, StorageWorker};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let worker = StorageWorker::spawn(EventSink::new(64))?;
/// let server = NodeServer::bind(
///     ServerId(0),
///     Identifier::generate(),
///     "0.0.0.0:6881".parse()?,
///     None,
///     worker.storage(),
///     DhtConfig::default(),
/// )
/// .await?;
///
/// tokio::spawn(server.clone().run());
/// server.load_bootstrap("bootstrap.dat").await?;
/// # Ok(())
/// # }
/// ```
///
/// [BEP-5]: http://bittorrent.org/beps/bep_0005.html
pub struct NodeServer {
    server_id: ServerId,
    id: Identifier,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    external_addr: Option<SocketAddr>,
    storage: Storage,
    pending: Mutex<PendingQueries>,
    secrets: RwLock<SecretWindow>,
    refresh_token: Bytes,
    config: DhtConfig,
    timer: Mutex<Option<JoinHandle<()>>>,
    got_incoming: AtomicBool,
    closed: watch::Sender<bool>,
}

impl NodeServer {
    /// Binds the socket, creates the server's routing table in storage and
    /// starts the refresh timer.
    pub async fn bind(
        server_id: ServerId,
        id: Identifier,
        bind: SocketAddr,
        external_addr: Option<SocketAddr>,
        storage: Storage,
        config: DhtConfig,
    ) -> Result<Arc<Self>, DhtError> {
        let socket = UdpSocket::bind(bind).await?;
        let local_addr = socket.local_addr()?;

        let table_config = config.clone();
        storage
            .call(move |db| {
                db.create_routing_table(server_id, id, &table_config, Instant::now());
            })
            .await?;

        let refresh_token = Bytes::copy_from_slice(&rand::random::<[u8; 20]>());
        let timer = spawn_refresh_timer(local_addr, refresh_token.clone(), config.refresh_interval);

        info!(server = %server_id, %id, %local_addr, "DHT server bound");

        Ok(Arc::new(Self {
            server_id,
            id,
            socket: Arc::new(socket),
            local_addr,
            external_addr,
            storage,
            pending: Mutex::new(PendingQueries::new(
                config.max_pending_queries,
                config.pending_query_ttl,
            )),
            secrets: RwLock::new(SecretWindow::new(config.secret_window)),
            refresh_token,
            config,
            timer: Mutex::new(Some(timer)),
            got_incoming: AtomicBool::new(false),
            closed: watch::Sender::new(false),
        }))
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn external_addr(&self) -> Option<SocketAddr> {
        self.external_addr
    }

    /// Whether a node we did not know has ever queried us, i.e. whether we
    /// are reachable from outside.
    pub fn got_incoming(&self) -> bool {
        self.got_incoming.load(Ordering::Relaxed)
    }

    pub fn pending_queries(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn token_for(&self, endpoint: &Endpoint) -> Bytes {
        self.secrets.read().token_for(endpoint)
    }

    pub async fn ping(&self, destination: Endpoint) -> Result<QueryHandle, DhtError> {
        self.send_query(destination, Query::Ping, Continuation::Ping)
            .await
    }

    pub async fn find_node(
        &self,
        destination: Endpoint,
        target: Identifier,
    ) -> Result<QueryHandle, DhtError> {
        self.send_query(destination, Query::FindNode { target }, Continuation::FindNode)
            .await
    }

    /// Asks `destination` for peers of `info_hash`. Returned peers and, with
    /// `scrape`, the remote bloom filters are folded into the torrent store.
    pub async fn get_peers(
        &self,
        destination: Endpoint,
        info_hash: InfoHash,
        scrape: bool,
    ) -> Result<QueryHandle, DhtError> {
        let query = Query::GetPeers {
            info_hash,
            scrape,
            noseed: false,
        };
        self.send_query(destination, query, Continuation::GetPeers { info_hash })
            .await
    }

    pub async fn announce_peer(
        &self,
        destination: Endpoint,
        info_hash: InfoHash,
        port: u16,
        token: Bytes,
        seed: bool,
    ) -> Result<QueryHandle, DhtError> {
        let query = Query::AnnouncePeer {
            info_hash,
            port,
            token,
            seed,
            implied_port: false,
        };
        self.send_query(destination, query, Continuation::AnnouncePeer)
            .await
    }

    async fn send_query(
        &self,
        destination: Endpoint,
        query: Query,
        continuation: Continuation,
    ) -> Result<QueryHandle, DhtError> {
        let (tx, rx) = oneshot::channel();

        // Popped last-in first-out, so the waiter sees the message after
        // our own bookkeeping ran.
        let callbacks = vec![Continuation::Waiter(tx), continuation];
        let tid = self
            .pending
            .lock()
            .allocate(destination, callbacks, Instant::now())?;

        let method = query.method().to_string();
        let msg = DhtMessage::query(tid.clone(), Some(self.config.version.clone()), self.id, query);
        let data = msg.encode()?;

        trace!(%method, to = %destination, "sending query");
        if let Err(e) = self.socket.send_to(&data, destination.socket_addr()).await {
            warn!(%method, to = %destination, error = %e, "failed to send query");
            self.pending.lock().cancel(&tid);
        }

        Ok(QueryHandle::new(tid, destination, rx))
    }

    /// Pings without waiting; failures are only logged. An endpoint that
    /// still owes us a reply is not pinged again.
    async fn ping_quietly(&self, destination: Endpoint) {
        if self.pending.lock().has_outstanding(&destination) {
            trace!(to = %destination, "query outstanding, ping skipped");
            return;
        }
        if let Err(e) = self.ping(destination).await {
            debug!(to = %destination, error = %e, "ping not sent");
        }
    }

    async fn send_message(&self, msg: &DhtMessage, to: SocketAddr) {
        match msg.encode() {
            Ok(data) => {
                if let Err(e) = self.socket.send_to(&data, to).await {
                    warn!(%to, error = %e, "failed to send message");
                }
            }
            Err(e) => warn!(%to, error = %e, "failed to encode message"),
        }
    }

    /// Waits for the next datagram without handling it.
    pub async fn recv_datagram(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), DhtError> {
        Ok(self.socket.recv_from(buf).await?)
    }

    /// Receives and handles one datagram.
    pub async fn recv_one(&self, buf: &mut [u8]) -> Result<(), DhtError> {
        let (n, from) = self.recv_datagram(buf).await?;
        self.handle_datagram(&buf[..n], from).await
    }

    pub fn recv_buffer_size(&self) -> usize {
        self.config.recv_buffer_size
    }

    /// Serves the socket until the server is shut down. Servers managed by a
    /// wrangler are driven by its dispatch loop instead.
    pub async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let mut closed = self.closed.subscribe();
        while !*closed.borrow_and_update() {
            tokio::select! {
                result = self.recv_one(&mut buf) => match result {
                    Ok(()) => {}
                    Err(e @ DhtError::Store(_)) => {
                        warn!(server = %self.server_id, error = %e, "storage unavailable, stopping");
                        break;
                    }
                    Err(e) => debug!(server = %self.server_id, error = %e, "receive failed"),
                },
                _ = closed.changed() => {}
            }
        }
    }

    /// Handles one inbound datagram. Malformed remote input is answered or
    /// dropped; only storage failures are returned.
    pub async fn handle_datagram(&self, data: &[u8], from: SocketAddr) -> Result<(), DhtError> {
        let endpoint = Endpoint::from(from);

        let message = match DhtMessage::parse(data) {
            Ok(message) => message,
            Err(DhtError::MalformedQuery {
                transaction_id,
                reason,
            }) => {
                debug!(%from, %reason, "malformed query");
                let reply = DhtMessage::error(transaction_id, ERROR_PROTOCOL, reason);
                self.send_message(&reply, from).await;
                return Ok(());
            }
            Err(DhtError::InvalidMessage(reason)) => {
                debug!(%from, %reason, "ignoring message");
                return Ok(());
            }
            Err(e) => {
                debug!(%from, error = %e, "undecodable datagram");
                let reply = DhtMessage::error(Bytes::new(), ERROR_PROTOCOL, "malformed message");
                self.send_message(&reply, from).await;
                return Ok(());
            }
        };

        match &message.body {
            MessageBody::Query { sender, query } => {
                self.handle_query(&message, *sender, query, endpoint).await
            }
            MessageBody::Response(response) => {
                self.handle_response(&message, response, endpoint).await
            }
            MessageBody::Error { code, message: text } => {
                debug!(%from, code, message = %text, "error reply");
                self.handle_error(&message, endpoint);
                Ok(())
            }
            MessageBody::Refresh { token } => {
                if *token == self.refresh_token {
                    self.refresh().await
                } else {
                    debug!(%from, "refresh datagram with foreign token");
                    Ok(())
                }
            }
        }
    }

    async fn handle_query(
        &self,
        message: &DhtMessage,
        sender: Identifier,
        query: &Query,
        from: Endpoint,
    ) -> Result<(), DhtError> {
        let now = Instant::now();
        trace!(method = query.method(), %from, "query received");

        let token = self.secrets.read().token_for(&from);
        let token_valid = match query {
            Query::AnnouncePeer { token, .. } => self.secrets.read().validate(&from, token),
            _ => false,
        };

        let server = self.server_id;
        let own_id = self.id;
        let closest = self.config.closest_nodes;
        let version = message.version.clone();
        let query = query.clone();

        let outcome = self
            .storage
            .call(move |db| -> Result<QueryOutcome, StoreError> {
                let (table, torrents) = db.split_mut(server)?;
                let sender_known = table.node(&sender).is_some();
                let added = table.add_node(from, sender, version, true, now);

                let mut response = Response::new(own_id);
                let reply = match query {
                    Query::Ping => Reply::Response(response),
                    Query::FindNode { target } => {
                        response.nodes = contacts(table.get_closest(&target, closest));
                        Reply::Response(response)
                    }
                    Query::GetPeers {
                        info_hash,
                        scrape,
                        noseed,
                    } => {
                        response.nodes = contacts(table.get_closest(&info_hash, closest));
                        if let Some(torrent) = torrents.torrent(&info_hash) {
                            let values: Vec<Endpoint> = torrents
                                .peers_for(&info_hash, noseed)
                                .into_iter()
                                .take(MAX_VALUES_PER_RESPONSE)
                                .map(|link| link.peer)
                                .collect();
                            if !values.is_empty() {
                                response.values = Some(values);
                            }
                            if scrape {
                                response.seeds_filter = Some(torrent.seeds.clone());
                                response.peers_filter = Some(torrent.peers.clone());
                            }
                        }
                        response.token = Some(token);
                        Reply::Response(response)
                    }
                    Query::AnnouncePeer {
                        info_hash,
                        port,
                        seed,
                        implied_port,
                        ..
                    } => {
                        if token_valid {
                            let port = if implied_port { from.port() } else { port };
                            let peer = Endpoint::new(from.ip(), port);
                            torrents.record_announcement(peer, info_hash, seed, now);
                            Reply::Response(response)
                        } else {
                            Reply::Error {
                                code: ERROR_PROTOCOL,
                                message: "invalid token".into(),
                            }
                        }
                    }
                    Query::Unknown { method } => Reply::Error {
                        code: ERROR_METHOD_UNKNOWN,
                        message: format!("method unknown: {}", method),
                    },
                };

                Ok(QueryOutcome {
                    sender_known,
                    pings: added.pings,
                    reply,
                })
            })
            .await
            .map_err(DhtError::from)
            .and_then(|outcome| outcome.map_err(DhtError::from));

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                let reply =
                    DhtMessage::error(message.transaction_id.clone(), ERROR_SERVER, "server error");
                self.send_message(&reply, from.socket_addr()).await;
                return Err(e);
            }
        };

        if !outcome.sender_known && !self.got_incoming.swap(true, Ordering::Relaxed) {
            info!(server = %self.server_id, %from, "first incoming query, server is reachable");
        }

        let reply = match outcome.reply {
            Reply::Response(response) => DhtMessage::response(
                message.transaction_id.clone(),
                Some(self.config.version.clone()),
                response,
            ),
            Reply::Error { code, message: text } => {
                debug!(%from, code, message = %text, "rejecting query");
                DhtMessage::error(message.transaction_id.clone(), code, text)
            }
        };
        self.send_message(&reply, from.socket_addr()).await;

        for endpoint in outcome.pings {
            self.ping_quietly(endpoint).await;
        }
        Ok(())
    }

    async fn handle_response(
        &self,
        message: &DhtMessage,
        response: &Response,
        from: Endpoint,
    ) -> Result<(), DhtError> {
        let now = Instant::now();
        let pending = self.pending.lock().take(&message.transaction_id, &from);

        let server = self.server_id;
        let sender = response.id;
        let version = message.version.clone();
        let added = self
            .storage
            .call(move |db| {
                db.routing_mut(server)
                    .map(|table| table.add_node(from, sender, version, true, now))
            })
            .await??;

        let mut to_ping = added.pings;
        let mut learned: Vec<Contact> = Vec::new();

        match pending {
            Some(mut query) => {
                while let Some(callback) = query.callbacks.pop() {
                    match callback {
                        Continuation::Ping | Continuation::AnnouncePeer => {}
                        Continuation::FindNode => learned.extend(response.nodes.iter().copied()),
                        Continuation::GetPeers { info_hash } => {
                            self.absorb_peers(info_hash, response, now).await?;
                            learned.extend(response.nodes.iter().copied());
                        }
                        Continuation::Waiter(tx) => {
                            let _ = tx.send(message.clone());
                        }
                    }
                }
            }
            None => trace!(%from, "response without matching query"),
        }

        if !learned.is_empty() {
            learned.truncate(self.config.closest_nodes * 2);
            let own_id = self.id;
            let unknown = self
                .storage
                .call(move |db| {
                    db.routing(server).map(|table| {
                        learned
                            .into_iter()
                            .filter(|c| c.id != own_id && table.node(&c.id).is_none())
                            .map(|c| c.endpoint)
                            .collect::<Vec<_>>()
                    })
                })
                .await??;
            to_ping.extend(unknown);
        }

        for endpoint in to_ping {
            self.ping_quietly(endpoint).await;
        }
        Ok(())
    }

    async fn absorb_peers(
        &self,
        info_hash: InfoHash,
        response: &Response,
        now: Instant,
    ) -> Result<(), DhtError> {
        let values = response.values.clone().unwrap_or_default();
        let seeds = response.seeds_filter.clone();
        let peers = response.peers_filter.clone();
        if values.is_empty() && seeds.is_none() && peers.is_none() {
            return Ok(());
        }

        self.storage
            .call(move |db| {
                let torrents = db.torrents_mut();
                for peer in values {
                    torrents.record_announcement(peer, info_hash, false, now);
                }
                if let Some(filter) = seeds {
                    torrents.merge_scrape_filter(info_hash, &filter, true, now);
                }
                if let Some(filter) = peers {
                    torrents.merge_scrape_filter(info_hash, &filter, false, now);
                }
            })
            .await?;
        Ok(())
    }

    fn handle_error(&self, message: &DhtMessage, from: Endpoint) {
        let Some(mut query) = self.pending.lock().take(&message.transaction_id, &from) else {
            return;
        };
        while let Some(callback) = query.callbacks.pop() {
            if let Continuation::Waiter(tx) = callback {
                let _ = tx.send(message.clone());
            }
        }
    }

    /// Runs one maintenance pass: expires unanswered transactions and flags
    /// their nodes as failed, refreshes the routing table, rotates the token
    /// secret and pings whatever the table asked for.
    pub async fn refresh(&self) -> Result<(), DhtError> {
        let now = Instant::now();
        let expired = self.pending.lock().expire(now);
        let failed: Vec<(Endpoint, Instant)> =
            expired.iter().map(|q| (q.destination, q.sent_at)).collect();
        drop(expired);

        let server = self.server_id;
        let pings = self
            .storage
            .call(move |db| {
                db.routing_mut(server).map(|table| {
                    for (endpoint, sent_at) in &failed {
                        table.mark_failed(endpoint, *sent_at);
                    }
                    table.refresh(now)
                })
            })
            .await??;

        self.secrets.write().rotate();

        debug!(server = %self.server_id, pings = pings.len(), "maintenance pass");
        for endpoint in pings {
            self.ping_quietly(endpoint).await;
        }
        Ok(())
    }

    /// Seeds the routing table from a bencoded file whose `nodes` list holds
    /// compact node entries or `[host, port]` pairs. Each entry is sent a
    /// `find_node` for our own identifier. Returns how many were contacted.
    pub async fn load_bootstrap(&self, path: impl AsRef<Path>) -> Result<usize, DhtError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let value = decode(&data)?;

        let entries = value
            .get(b"nodes")
            .and_then(|v| v.as_list())
            .ok_or_else(|| DhtError::Bootstrap(format!("{}: missing nodes list", path.display())))?;

        let mut contacted = 0;
        for entry in entries {
            let Some(endpoint) = bootstrap_endpoint(entry).await else {
                debug!(?entry, "skipping bootstrap entry");
                continue;
            };
            self.find_node(endpoint, self.id).await?;
            contacted += 1;
        }

        info!(server = %self.server_id, contacted, "bootstrap sent");
        Ok(contacted)
    }

    pub async fn nodes(&self) -> Result<Vec<Node>, DhtError> {
        let server = self.server_id;
        Ok(self
            .storage
            .call(move |db| {
                db.routing(server)
                    .map(|table| table.nodes().cloned().collect::<Vec<_>>())
            })
            .await??)
    }

    pub async fn buckets(&self) -> Result<Vec<Bucket>, DhtError> {
        let server = self.server_id;
        Ok(self
            .storage
            .call(move |db| {
                db.routing(server)
                    .map(|table| table.buckets().cloned().collect::<Vec<_>>())
            })
            .await??)
    }

    pub async fn closest(&self, target: Identifier, count: usize) -> Result<Vec<Node>, DhtError> {
        let server = self.server_id;
        Ok(self
            .storage
            .call(move |db| db.routing(server).map(|table| table.get_closest(&target, count)))
            .await??)
    }

    /// Stops the refresh timer. The socket closes once the last reference
    /// to the server is dropped.
    pub fn shutdown(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        info!(server = %self.server_id, "DHT server shut down");
    }
}

impl Drop for NodeServer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

fn contacts(nodes: Vec<Node>) -> Vec<Contact> {
    nodes.iter().map(Node::contact).collect()
}

async fn bootstrap_endpoint(entry: &Value) -> Option<Endpoint> {
    if let Some(compact) = entry.as_bytes() {
        return Contact::from_compact(compact).map(|c| c.endpoint);
    }

    let pair = entry.as_list()?;
    let host = pair.first()?.as_str()?;
    let port = u16::try_from(pair.get(1)?.as_integer()?).ok()?;
    let mut addrs = tokio::net::lookup_host((host, port)).await.ok()?;
    addrs.next().map(Endpoint::from)
}

/// Where the refresh datagram goes: our own socket, over loopback when bound
/// to the wildcard address.
fn self_address(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local.port())
        }
        _ => local,
    }
}

fn spawn_refresh_timer(local: SocketAddr, token: Bytes, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let target = self_address(local);
        let bind = match target {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = match UdpSocket::bind(bind).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "refresh timer could not bind");
                return;
            }
        };

        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut counter: u16 = 0;
        loop {
            ticker.tick().await;
            counter = counter.wrapping_add(1);
            let tid: TransactionId = Bytes::copy_from_slice(&counter.to_be_bytes());
            match DhtMessage::refresh(tid, token.clone()).encode() {
                Ok(data) => {
                    if let Err(e) = socket.send_to(&data, target).await {
                        warn!(%target, error = %e, "failed to send refresh datagram");
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode refresh datagram"),
            }
        }
    })
}

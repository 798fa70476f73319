//! Several DHT identities sharing one storage worker.
//!
//! A [`NodeWrangler`] owns the storage worker, the event channel and every
//! [`NodeServer`] it created. One dispatch task waits on all server sockets
//! at once and hands each received datagram to its server, one at a time.
//! Servers join and leave the dispatch loop through a control channel, so
//! registering a server never blocks on network traffic.
//!
//! ```no_run
//! use rdht::config::DhtConfig;
//! use rdht::constants::DEFAULT_PORT;
//! use rdht::dht::Identifier;
//! use rdht::wrangler::NodeWrangler;
//! use std::net::SocketAddr;
//!
//! # async fn example() -> Result<(), rdht::dht::DhtError> {
//! let wrangler = NodeWrangler::new(DhtConfig::default())?;
//! let mut events = wrangler.subscribe();
//!
//! let bind = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT));
//! let server = wrangler
//!     .add_server(Identifier::generate(), bind, None, false)
//!     .await?;
//! server.load_bootstrap("bootstrap.dat").await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! wrangler.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::{abortable, AbortHandle, Abortable, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DhtConfig;
use crate::dht::{DhtError, Endpoint, Identifier, InfoHash, NodeServer};
use crate::event::{DhtEvent, EventSink};
use crate::store::{
    PeerRecord, PeerTorrentRecord, ServerId, ServerRecord, Storage, StorageWorker, TorrentRecord,
};
use crate::upnp::{MappingError, PortMapper, PortMapping};

enum Control {
    Register(Arc<NodeServer>),
    Deregister(ServerId),
    Shutdown,
}

/// Owns the storage worker, the servers and the dispatch task.
pub struct NodeWrangler {
    config: DhtConfig,
    events: EventSink,
    worker: Option<StorageWorker>,
    storage: Storage,
    servers: RwLock<BTreeMap<ServerId, Arc<NodeServer>>>,
    mapper: Option<Arc<dyn PortMapper>>,
    control: mpsc::UnboundedSender<Control>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl NodeWrangler {
    /// Starts the storage worker and the dispatch task. Must be called from
    /// within a tokio runtime.
    pub fn new(config: DhtConfig) -> Result<Self, DhtError> {
        let events = EventSink::new(config.event_capacity);
        let worker = StorageWorker::spawn(events.clone())?;
        let storage = worker.storage();

        let (control, control_rx) = mpsc::unbounded_channel();
        let dispatch = tokio::spawn(dispatch_loop(control_rx));

        info!("node wrangler started");

        Ok(Self {
            config,
            events,
            worker: Some(worker),
            storage,
            servers: RwLock::new(BTreeMap::new()),
            mapper: None,
            control,
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    /// Uses `mapper` for servers added with port mapping requested.
    pub fn with_port_mapper(mut self, mapper: Arc<dyn PortMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn config(&self) -> &DhtConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DhtEvent> {
        self.events.subscribe()
    }

    pub fn storage(&self) -> Storage {
        self.storage.clone()
    }

    /// Registers a new local identity and starts serving it.
    ///
    /// With `use_upnp` the bind address is mapped through the port mapper
    /// first and the server starts only once the mapping exists, bound to the
    /// internal address the mapping names; its public address is the mapped
    /// one. A failed mapping is published as
    /// [`DhtEvent::PortMappingFailed`] and leaves the server record in place
    /// without a running server.
    pub async fn add_server(
        &self,
        identifier: Identifier,
        bind: SocketAddr,
        external: Option<SocketAddr>,
        use_upnp: bool,
    ) -> Result<Arc<NodeServer>, DhtError> {
        let initial_external = if use_upnp { None } else { external };
        let record = self
            .storage
            .call(move |db| db.insert_server(identifier, bind, initial_external, use_upnp))
            .await?;

        let (bind, external) = if use_upnp {
            let mapping = self.map_port(record.id, bind).await?;
            let server = record.id;
            self.storage
                .call(move |db| {
                    db.set_server_mapping(server, mapping.internal, mapping.external)
                })
                .await?;
            (mapping.internal, Some(mapping.external))
        } else {
            (bind, external)
        };

        let server = match NodeServer::bind(
            record.id,
            identifier,
            bind,
            external,
            self.storage.clone(),
            self.config.clone(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                warn!(server = %record.id, %bind, error = %e, "failed to start server");
                let id = record.id;
                self.storage.call(move |db| db.remove_server(id)).await?;
                return Err(e);
            }
        };

        self.servers.write().insert(record.id, server.clone());
        if self.control.send(Control::Register(server.clone())).is_err() {
            warn!(server = %record.id, "dispatch loop has stopped");
        }

        info!(server = %record.id, %identifier, %bind, "server added");
        Ok(server)
    }

    async fn map_port(&self, server: ServerId, bind: SocketAddr) -> Result<PortMapping, DhtError> {
        let result = match &self.mapper {
            Some(mapper) => mapper.map_udp(bind).await,
            None => Err(MappingError::Unsupported),
        };

        match result {
            Ok(mapping) => {
                info!(%server, internal = %mapping.internal, external = %mapping.external, "port mapped");
                Ok(mapping)
            }
            Err(e) => {
                warn!(%server, %bind, error = %e, "port mapping failed");
                self.events.emit(DhtEvent::PortMappingFailed {
                    server,
                    bind,
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Stops a server and forgets it together with its routing table.
    pub async fn remove_server(&self, id: ServerId) -> Result<ServerRecord, DhtError> {
        if let Some(server) = self.servers.write().remove(&id) {
            server.shutdown();
            let _ = self.control.send(Control::Deregister(id));
        }

        let record = self.storage.call(move |db| db.remove_server(id)).await?;
        match record {
            Some(record) => {
                info!(server = %id, "server removed");
                Ok(record)
            }
            None => Err(DhtError::UnknownServer(id)),
        }
    }

    pub fn server(&self, id: ServerId) -> Option<Arc<NodeServer>> {
        self.servers.read().get(&id).cloned()
    }

    /// Running servers in id order.
    pub fn servers(&self) -> Vec<Arc<NodeServer>> {
        self.servers.read().values().cloned().collect()
    }

    /// Every registered server, running or not.
    pub async fn server_records(&self) -> Result<Vec<ServerRecord>, DhtError> {
        Ok(self.storage.call(|db| db.servers()).await?)
    }

    pub async fn peers(&self) -> Result<Vec<PeerRecord>, DhtError> {
        Ok(self.storage.call(|db| db.torrents().peers()).await?)
    }

    pub async fn torrents(&self) -> Result<Vec<TorrentRecord>, DhtError> {
        Ok(self.storage.call(|db| db.torrents().torrents()).await?)
    }

    pub async fn peers_for(
        &self,
        info_hash: InfoHash,
        noseed: bool,
    ) -> Result<Vec<PeerTorrentRecord>, DhtError> {
        Ok(self
            .storage
            .call(move |db| db.torrents().peers_for(&info_hash, noseed))
            .await?)
    }

    pub async fn torrents_of(&self, peer: Endpoint) -> Result<Vec<PeerTorrentRecord>, DhtError> {
        Ok(self
            .storage
            .call(move |db| db.torrents().torrents_of(&peer))
            .await?)
    }

    pub async fn magnet_link(&self, info_hash: InfoHash) -> Result<Option<String>, DhtError> {
        Ok(self
            .storage
            .call(move |db| db.torrents().magnet_link(&info_hash))
            .await?)
    }

    /// Stops every server, then the dispatch task, then the storage worker.
    pub async fn shutdown(mut self) {
        let servers: Vec<Arc<NodeServer>> = {
            let mut servers = self.servers.write();
            std::mem::take(&mut *servers).into_values().collect()
        };
        for server in servers {
            server.shutdown();
            let _ = self.control.send(Control::Deregister(server.server_id()));
        }

        let _ = self.control.send(Control::Shutdown);
        let dispatch = self.dispatch.lock().take();
        if let Some(dispatch) = dispatch {
            let _ = dispatch.await;
        }

        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
        info!("node wrangler shut down");
    }
}

impl Drop for NodeWrangler {
    fn drop(&mut self) {
        for server in self.servers.read().values() {
            server.shutdown();
        }
        let _ = self.control.send(Control::Shutdown);
    }
}

struct Received {
    server: Arc<NodeServer>,
    buf: Vec<u8>,
    result: Result<(usize, SocketAddr), DhtError>,
}

type Receiving = Abortable<BoxFuture<'static, Received>>;

fn receive(server: Arc<NodeServer>, mut buf: Vec<u8>) -> (Receiving, AbortHandle) {
    abortable(
        async move {
            let result = server.recv_datagram(&mut buf).await;
            Received {
                server,
                buf,
                result,
            }
        }
        .boxed(),
    )
}

/// Waits on every registered socket and handles whichever datagram arrives
/// first. Handling runs to completion before the next datagram is taken.
async fn dispatch_loop(mut control: mpsc::UnboundedReceiver<Control>) {
    let mut receiving: FuturesUnordered<Receiving> = FuturesUnordered::new();
    let mut registered: HashMap<ServerId, AbortHandle> = HashMap::new();

    loop {
        tokio::select! {
            command = control.recv() => match command {
                Some(Control::Register(server)) => {
                    let id = server.server_id();
                    let buf = vec![0u8; server.recv_buffer_size()];
                    let (future, handle) = receive(server, buf);
                    if let Some(previous) = registered.insert(id, handle) {
                        previous.abort();
                    }
                    receiving.push(future);
                    debug!(server = %id, "registered with dispatch loop");
                }
                Some(Control::Deregister(id)) => {
                    if let Some(handle) = registered.remove(&id) {
                        handle.abort();
                        debug!(server = %id, "deregistered from dispatch loop");
                    }
                }
                Some(Control::Shutdown) | None => break,
            },
            Some(outcome) = receiving.next(), if !receiving.is_empty() => {
                let Ok(Received { server, buf, result }) = outcome else {
                    continue;
                };
                let id = server.server_id();

                match result {
                    Ok((n, from)) => match server.handle_datagram(&buf[..n], from).await {
                        Ok(()) => {}
                        Err(e @ DhtError::Store(_)) => {
                            warn!(server = %id, error = %e, "storage unavailable, dropping server");
                            registered.remove(&id);
                            continue;
                        }
                        Err(e) => debug!(server = %id, error = %e, "datagram handling failed"),
                    },
                    Err(e) => debug!(server = %id, error = %e, "receive failed"),
                }

                if registered.contains_key(&id) && !server.is_closed() {
                    let (future, handle) = receive(server, buf);
                    registered.insert(id, handle);
                    receiving.push(future);
                } else {
                    registered.remove(&id);
                }
            }
        }
    }

    for handle in registered.values() {
        handle.abort();
    }
    debug!("dispatch loop stopped");
}

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::Instant;

use super::error::StoreError;
use super::records::{ServerId, ServerRecord};
use super::torrents::TorrentStore;
use crate::config::DhtConfig;
use crate::dht::{Identifier, RoutingTable};
use crate::event::{DhtEvent, EventSink};

/// Everything the storage worker owns: the server registry, one routing
/// table per server and the shared torrent store.
pub struct Database {
    servers: BTreeMap<ServerId, ServerRecord>,
    routing: HashMap<ServerId, RoutingTable>,
    torrents: TorrentStore,
    next_server: u32,
    events: EventSink,
}

impl Database {
    pub fn new(events: EventSink) -> Self {
        Self {
            servers: BTreeMap::new(),
            routing: HashMap::new(),
            torrents: TorrentStore::new(events.clone()),
            next_server: 0,
            events,
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Registers a server and generates its id.
    pub fn insert_server(
        &mut self,
        identifier: Identifier,
        bind: SocketAddr,
        external: Option<SocketAddr>,
        upnp: bool,
    ) -> ServerRecord {
        let id = ServerId(self.next_server);
        self.next_server += 1;

        let record = ServerRecord {
            id,
            identifier,
            bind,
            external,
            upnp,
        };
        self.servers.insert(id, record.clone());
        self.events.emit(DhtEvent::ServerAdded(record.clone()));
        record
    }

    /// Forgets a server together with its routing table.
    pub fn remove_server(&mut self, id: ServerId) -> Option<ServerRecord> {
        self.routing.remove(&id);
        let record = self.servers.remove(&id)?;
        self.events.emit(DhtEvent::ServerRemoved(id));
        Some(record)
    }

    /// Records the public address obtained for a server.
    /// Records the addresses a port mapping produced for `id`.
    pub fn set_server_mapping(
        &mut self,
        id: ServerId,
        bind: SocketAddr,
        external: SocketAddr,
    ) -> Option<ServerRecord> {
        let record = self.servers.get_mut(&id)?;
        record.bind = bind;
        record.external = Some(external);
        Some(record.clone())
    }

    pub fn server(&self, id: ServerId) -> Option<&ServerRecord> {
        self.servers.get(&id)
    }

    pub fn servers(&self) -> Vec<ServerRecord> {
        self.servers.values().cloned().collect()
    }

    /// Creates the routing table for `server`, replacing any previous one.
    pub fn create_routing_table(
        &mut self,
        server: ServerId,
        own_id: Identifier,
        config: &DhtConfig,
        now: Instant,
    ) -> &mut RoutingTable {
        let table = RoutingTable::new(server, own_id, config, self.events.clone(), now);
        match self.routing.entry(server) {
            Entry::Occupied(mut slot) => {
                slot.insert(table);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(table),
        }
    }

    pub fn drop_routing_table(&mut self, server: ServerId) -> Option<RoutingTable> {
        self.routing.remove(&server)
    }

    pub fn routing(&self, server: ServerId) -> Result<&RoutingTable, StoreError> {
        self.routing
            .get(&server)
            .ok_or(StoreError::UnknownServer(server))
    }

    pub fn routing_mut(&mut self, server: ServerId) -> Result<&mut RoutingTable, StoreError> {
        self.routing
            .get_mut(&server)
            .ok_or(StoreError::UnknownServer(server))
    }

    pub fn torrents(&self) -> &TorrentStore {
        &self.torrents
    }

    pub fn torrents_mut(&mut self) -> &mut TorrentStore {
        &mut self.torrents
    }

    /// Routing table and torrent store together, for handlers that touch
    /// both in one unit of work.
    pub fn split_mut(
        &mut self,
        server: ServerId,
    ) -> Result<(&mut RoutingTable, &mut TorrentStore), StoreError> {
        let table = self
            .routing
            .get_mut(&server)
            .ok_or(StoreError::UnknownServer(server))?;
        Ok((table, &mut self.torrents))
    }
}

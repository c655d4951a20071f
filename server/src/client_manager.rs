//! Connection pool for the world server
//!
//! This module tracks every live peer connection, including:
//! - Connection id assignment for new sockets
//! - Server-wide capacity enforcement
//! - Lookup and snapshotting for shutdown and diagnostics
//!
//! World membership is not tracked here; a connection's binding to a player
//! lives on the [`Connection`] itself.

use log::info;
use shared::{Connection, ConnectionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Reason sent to sockets refused because the pool is at capacity
pub const SERVER_FULL_REASON: &str = "Server full.";

/// Manages all connected peers
///
/// Shared between the accept loop, per-connection tasks and the shutdown
/// path, so the map sits behind a lock and ids come from an atomic counter.
pub struct ClientManager {
    /// Live connections indexed by id
    clients: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    /// Next id handed to an accepted socket
    next_client_id: AtomicU64,
    /// Maximum number of concurrent connections allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty pool; ids start from 1
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            max_clients,
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Reserves the id for a socket about to be wrapped in a [`Connection`]
    pub fn next_client_id(&self) -> ConnectionId {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Attempts to admit a connection
    ///
    /// Returns false if the server is at capacity or the id is already taken.
    /// The caller is responsible for telling the peer why.
    pub fn add_client(&self, connection: Arc<Connection>) -> bool {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);

        if clients.len() >= self.max_clients || clients.contains_key(&connection.id()) {
            return false;
        }

        match connection.peer_addr() {
            Some(addr) => info!("Client {} connected from {}", connection.id(), addr),
            None => info!("Client {} connected", connection.id()),
        }
        clients.insert(connection.id(), connection);
        true
    }

    /// Removes a client from the pool
    ///
    /// Returns true if the client was found and removed, false if it was
    /// already gone, which makes repeated disconnect paths harmless.
    pub fn remove_client(&self, client_id: ConnectionId) -> bool {
        let removed = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&client_id);
        match removed {
            Some(_) => {
                info!("Client {} removed from pool", client_id);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, client_id: ConnectionId) -> Option<Arc<Connection>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client_id)
            .cloned()
    }

    /// Copy of every live connection
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

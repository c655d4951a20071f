//! Per-connection protocol handling on the server
//!
//! [`ServerContext`] bundles everything a connection needs to act on: the
//! configuration, the world registry, the connection pool, the peer-to-host
//! message registry and the scheduler's deferred queue. It is created once in
//! `main` and passed to every connection explicitly.
//!
//! Each socket gets a [`PeerSession`], the [`PeerHandler`] that walks the
//! connection through the handshake:
//! 1. `Authenticate` is checked against the game and protocol versions
//! 2. `JoinWorld` reserves an entity id and binds the connection
//! 3. `WorldLoaded` hands the spawn to the scheduler task
//! 4. Position, velocity and force messages update or relay world state

use crate::client_manager::{ClientManager, SERVER_FULL_REASON};
use crate::config::ServerConfig;
use crate::scheduler::DeferredSender;
use crate::world::{Player, WorldError, WorldRegistry, TIMED_OUT_REASON};
use bytes::Bytes;
use log::{debug, info, warn};
use shared::{
    host, peer, Binding, Connection, ConnectionState, CustomHandler, Dispatch, DispatchError,
    MessageRegistry, PeerHandler, PROTOCOL_VERSION,
};
use std::sync::Arc;
use std::time::Instant;

pub const UNSUPPORTED_GAME_VERSION: &str = "Unsupported game version.";
pub const UNSUPPORTED_PROTOCOL_VERSION: &str = "Unsupported protocol version.";
pub const WORLD_FULL_REASON: &str = "World is full.";
pub const WORLD_NOT_FOUND_REASON: &str = "World not found.";
pub const NOT_AUTHENTICATED_REASON: &str = "Not authenticated.";
pub const ALREADY_IN_WORLD_REASON: &str = "Already in a world.";
pub const PROTOCOL_ERROR_REASON: &str = "Protocol error.";
pub const SHUTDOWN_REASON: &str = "Server shutting down.";

pub struct ServerContext {
    config: ServerConfig,
    worlds: Arc<WorldRegistry>,
    clients: ClientManager,
    registry: MessageRegistry<PeerSession>,
    deferred: DeferredSender<WorldRegistry>,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        worlds: Arc<WorldRegistry>,
        deferred: DeferredSender<WorldRegistry>,
    ) -> Arc<Self> {
        Self::with_registry(config, worlds, deferred, MessageRegistry::peer_to_host())
    }

    /// Like [`new`](Self::new) with a caller-built registry, for overridden or
    /// custom message handlers
    pub fn with_registry(
        config: ServerConfig,
        worlds: Arc<WorldRegistry>,
        deferred: DeferredSender<WorldRegistry>,
        registry: MessageRegistry<PeerSession>,
    ) -> Arc<Self> {
        Arc::new(Self {
            clients: ClientManager::new(config.max_clients),
            config,
            worlds,
            registry,
            deferred,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn worlds(&self) -> &Arc<WorldRegistry> {
        &self.worlds
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn registry(&self) -> &MessageRegistry<PeerSession> {
        &self.registry
    }

    /// Admits a fresh connection into the pool and starts its handshake
    ///
    /// A full pool gets the peer a `Disconnect` and a closed socket.
    pub fn accept(&self, connection: &Arc<Connection>) -> bool {
        if !self.clients.add_client(Arc::clone(connection)) {
            warn!(
                "Refusing client {}: {} of {} slots in use",
                connection.id(),
                self.clients.len(),
                self.clients.max_clients()
            );
            connection.disconnect_with(&host::Disconnect::new(SERVER_FULL_REASON));
            return false;
        }
        connection.set_state(ConnectionState::Authenticating);
        true
    }

    /// Tears a connection down; safe to call any number of times
    ///
    /// With a `reason`, the peer first gets a `Disconnect` carrying it. The
    /// player, if any, is removed from its world (one `RemovePlayer` broadcast)
    /// and the connection leaves the pool. Returns true for the call that
    /// actually closed the connection.
    pub fn disconnect(&self, connection: &Connection, reason: Option<&str>) -> bool {
        let closed_now = match reason {
            Some(reason) => connection.disconnect_with(&host::Disconnect::new(reason)),
            None => connection.close(),
        };

        if let Some(binding) = connection.unbind() {
            let evicted = self
                .worlds
                .get(&binding.world)
                .and_then(|world| world.evict(binding.entity_id, connection.id()));
            if let Err(e) = evicted {
                warn!(
                    "Failed to remove entity {} of client {} from {}: {}",
                    binding.entity_id,
                    connection.id(),
                    binding.world,
                    e
                );
            }
        }

        self.clients.remove_client(connection.id());

        if closed_now {
            info!(
                "Client {} disconnected ({})",
                connection.id(),
                reason.unwrap_or("closed")
            );
        }
        closed_now
    }

    /// Whether the connection's player is currently in its world's roster
    fn is_spawned(&self, connection: &Connection) -> bool {
        let Some(binding) = connection.binding() else {
            return false;
        };
        let player = self
            .worlds
            .get(&binding.world)
            .and_then(|world| world.player(binding.entity_id));
        matches!(player, Ok(Some(player)) if player.connection().id() == connection.id())
    }

    /// Kicks pooled connections that stayed silent for the handshake timeout
    /// without reaching a world roster
    ///
    /// Covers peers that never authenticate, never join, or join but never
    /// report `WorldLoaded`. Spawned players are left to their world's own
    /// timeout. Returns how many connections were dropped.
    pub fn sweep_stalled(&self, now: Instant) -> usize {
        let limit = self.config.handshake_timeout();
        let mut kicked = 0;
        for connection in self.clients.connections() {
            if connection.is_closed() || self.is_spawned(&connection) {
                continue;
            }
            let silent = now.saturating_duration_since(connection.last_message_received_at());
            if silent < limit {
                continue;
            }
            warn!(
                "Client {} stalled in {:?} for {:?}",
                connection.id(),
                connection.state(),
                silent
            );
            if self.disconnect(&connection, Some(TIMED_OUT_REASON)) {
                kicked += 1;
            }
        }
        kicked
    }

    /// Disconnects every pooled connection
    pub fn shutdown(&self) {
        let connections = self.clients.connections();
        info!("Disconnecting {} clients", connections.len());
        for connection in connections {
            self.disconnect(&connection, Some(SHUTDOWN_REASON));
        }
    }
}

/// Protocol state of one connected peer
pub struct PeerSession {
    ctx: Arc<ServerContext>,
    connection: Arc<Connection>,
    player: Option<Arc<Player>>,
    spawn_requested: bool,
}

fn world_error(tag: i32, err: WorldError) -> DispatchError {
    DispatchError::handler(tag, err.to_string())
}

impl PeerSession {
    pub fn new(ctx: Arc<ServerContext>, connection: Arc<Connection>) -> Self {
        Self {
            ctx,
            connection,
            player: None,
            spawn_requested: false,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn player(&self) -> Option<&Arc<Player>> {
        self.player.as_ref()
    }

    /// Handles one inbound frame body
    ///
    /// Any frame counts as activity for the timeout. Decode and handler errors
    /// kick the peer with a protocol error.
    pub fn handle_frame(&mut self, body: Bytes) -> Dispatch {
        if self.connection.is_closed() {
            return Dispatch::Failed;
        }
        self.connection.touch();

        let ctx = Arc::clone(&self.ctx);
        let connection = Arc::clone(&self.connection);
        let mut kick = |tag: Option<i32>, err: DispatchError| {
            warn!(
                "Client {} sent a bad message (tag {:?}): {}",
                connection.id(),
                tag,
                err
            );
            ctx.disconnect(&connection, Some(PROTOCOL_ERROR_REASON));
        };
        ctx.registry.dispatch(body, self, &mut kick)
    }

    fn deny(&self, reason: &str) {
        info!("Client {} denied: {}", self.connection.id(), reason);
        self.connection
            .send_immediately(&host::AuthenticationResult::denied(reason));
        self.ctx.disconnect(&self.connection, None);
    }

    fn refuse_join(&self, world: &str, reason: &str) {
        info!(
            "Client {} refused entry to {:?}: {}",
            self.connection.id(),
            world,
            reason
        );
        self.connection
            .send_immediately(&host::JoinWorldResult::refused(reason));
    }

    /// The player, once its spawn has been requested
    fn in_world_player(&self) -> Option<&Arc<Player>> {
        if self.spawn_requested {
            self.player.as_ref()
        } else {
            None
        }
    }
}

impl PeerHandler for PeerSession {
    fn on_authenticate(&mut self, message: peer::Authenticate) -> Result<(), DispatchError> {
        if self.connection.state() != ConnectionState::Authenticating {
            warn!(
                "Client {} sent Authenticate while {:?}; ignoring",
                self.connection.id(),
                self.connection.state()
            );
            return Ok(());
        }

        if message.game_version != self.ctx.config.game_version {
            self.deny(UNSUPPORTED_GAME_VERSION);
        } else if message.protocol_version != PROTOCOL_VERSION {
            self.deny(UNSUPPORTED_PROTOCOL_VERSION);
        } else {
            self.connection.set_state(ConnectionState::Idle);
            self.connection
                .send_immediately(&host::AuthenticationResult::Allowed);
            info!(
                "Client {} authenticated (game {}, protocol {})",
                self.connection.id(),
                message.game_version,
                message.protocol_version
            );
        }
        Ok(())
    }

    fn on_join_world(&mut self, message: peer::JoinWorld) -> Result<(), DispatchError> {
        if !self.connection.is_authenticated() {
            self.refuse_join(&message.world_name, NOT_AUTHENTICATED_REASON);
            return Ok(());
        }
        if self.player.is_some() {
            self.refuse_join(&message.world_name, ALREADY_IN_WORLD_REASON);
            return Ok(());
        }

        let world = match self.ctx.worlds.get(&message.world_name) {
            Ok(world) => world,
            Err(WorldError::NotFound(_)) => {
                self.refuse_join(&message.world_name, WORLD_NOT_FOUND_REASON);
                return Ok(());
            }
            Err(e) => return Err(world_error(peer::JOIN_WORLD, e)),
        };

        if world.is_full().map_err(|e| world_error(peer::JOIN_WORLD, e))? {
            self.refuse_join(&message.world_name, WORLD_FULL_REASON);
            return Ok(());
        }

        let entity_id = match world.assign_entity_id() {
            Ok(id) => id,
            Err(WorldError::IdsExhausted(_)) => {
                self.refuse_join(&message.world_name, WORLD_FULL_REASON);
                return Ok(());
            }
            Err(e) => return Err(world_error(peer::JOIN_WORLD, e)),
        };

        self.connection.bind(Binding {
            world: world.name().to_string(),
            entity_id,
        });
        self.player = Some(Arc::new(Player::new(
            entity_id,
            message.username.clone(),
            world.name(),
            Arc::clone(&self.connection),
        )));
        self.connection.set_state(ConnectionState::InWorld);
        self.connection
            .send_immediately(&host::JoinWorldResult::Accepted { entity_id });

        info!(
            "Client {} joined {} as {:?} with entity {}",
            self.connection.id(),
            world.name(),
            message.username,
            entity_id
        );
        Ok(())
    }

    fn on_world_loaded(&mut self) -> Result<(), DispatchError> {
        let Some(player) = self.player.clone() else {
            debug!(
                "Client {} sent WorldLoaded before joining",
                self.connection.id()
            );
            return Ok(());
        };
        if self.spawn_requested {
            debug!("Client {} sent WorldLoaded twice", self.connection.id());
            return Ok(());
        }
        self.spawn_requested = true;

        let ctx = Arc::clone(&self.ctx);
        let submitted = self.ctx.deferred.submit(move |worlds: &WorldRegistry| {
            if player.connection().is_closed() {
                return Ok(());
            }
            let world = match worlds.get(player.world_name()) {
                Ok(world) => world,
                Err(WorldError::NotFound(_)) => {
                    ctx.disconnect(player.connection(), Some(WORLD_NOT_FOUND_REASON));
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let (x, y) = world.spawn_point();
            match world.spawn_player_in_world(Arc::clone(&player), x, y) {
                Ok(()) => Ok(()),
                Err(WorldError::Full { .. }) => {
                    ctx.disconnect(player.connection(), Some(WORLD_FULL_REASON));
                    Ok(())
                }
                Err(WorldError::IdInUse(id)) => {
                    warn!("Entity {} is already spawned in {}", id, world.name());
                    ctx.disconnect(player.connection(), Some(PROTOCOL_ERROR_REASON));
                    Ok(())
                }
                Err(e) => Err(e),
            }
        });

        if !submitted {
            return Err(DispatchError::handler(
                peer::WORLD_LOADED,
                "tick scheduler is not running",
            ));
        }
        Ok(())
    }

    fn on_player_position(&mut self, message: peer::PlayerPosition) -> Result<(), DispatchError> {
        match self.in_world_player() {
            Some(player) => player.set_position(message.x, message.y, message.rotation),
            None => debug!(
                "Client {} sent a position outside a world",
                self.connection.id()
            ),
        }
        Ok(())
    }

    fn on_player_velocity(&mut self, message: peer::PlayerVelocity) -> Result<(), DispatchError> {
        match self.in_world_player() {
            Some(player) => {
                player.set_velocity(message.velocity_x, message.velocity_y, message.rotation)
            }
            None => debug!(
                "Client {} sent a velocity outside a world",
                self.connection.id()
            ),
        }
        Ok(())
    }

    fn on_disconnect(&mut self, message: peer::Disconnect) -> Result<(), DispatchError> {
        info!(
            "Client {} is leaving: {:?}",
            self.connection.id(),
            message.reason
        );
        self.ctx.disconnect(&self.connection, None);
        Ok(())
    }

    fn on_apply_body_force(&mut self, message: peer::ApplyBodyForce) -> Result<(), DispatchError> {
        let Some(player) = self.in_world_player() else {
            debug!(
                "Client {} applied a force outside a world",
                self.connection.id()
            );
            return Ok(());
        };

        let world = self
            .ctx
            .worlds
            .get(player.world_name())
            .map_err(|e| world_error(peer::APPLY_BODY_FORCE, e))?;
        world
            .broadcast_queued(Some(player.id()), &host::ApplyBodyForce::from(message))
            .map_err(|e| world_error(peer::APPLY_BODY_FORCE, e))?;
        Ok(())
    }
}

impl CustomHandler for PeerSession {}

//! Client network layer: TCP connection, handshake and the update loop

use crate::body::{BodyFactory, Renderer};
use crate::game::ClientGameState;
use crate::reconciliation::ReconcileConfig;
use bytes::Bytes;
use log::{debug, info, warn};
use shared::{
    host, peer, read_frames, write_outbound, Binding, Connection, ConnectionState, CustomHandler,
    Dispatch, DispatchError, FrameDecoder, HostHandler, MessageRegistry, DEFAULT_GAME_VERSION,
    DEFAULT_MAX_FRAME_LENGTH, PROTOCOL_VERSION,
};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub username: String,
    pub world: String,
    pub game_version: String,
    pub reconcile: ReconcileConfig,
    /// Simulation and state-upload rate, in updates per second
    pub update_rate: u32,
    pub max_frame_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            username: "player".to_string(),
            world: "Town".to_string(),
            game_version: DEFAULT_GAME_VERSION.to_string(),
            reconcile: ReconcileConfig::default(),
            update_rate: 30,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.update_rate == 0 {
            return Err(ClientError::Config("update rate must be positive".into()));
        }
        let factor = self.reconcile.interpolation_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(ClientError::Config(format!(
                "interpolation factor {} must be in (0, 1]",
                factor
            )));
        }
        if self.reconcile.desync_distance < 0.0 {
            return Err(ClientError::Config("desync distance cannot be negative".into()));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.update_rate.max(1) as f64)
    }
}

/// The peer side of the protocol for one connection
pub struct ClientSession<F: BodyFactory> {
    connection: Arc<Connection>,
    username: String,
    world: String,
    game_version: String,
    game: ClientGameState<F>,
    disconnect_reason: Option<String>,
}

impl<F: BodyFactory> ClientSession<F> {
    pub fn new(connection: Arc<Connection>, config: &ClientConfig, factory: F) -> Self {
        Self {
            connection,
            username: config.username.clone(),
            world: config.world.clone(),
            game_version: config.game_version.clone(),
            game: ClientGameState::new(factory, config.reconcile),
            disconnect_reason: None,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn game(&self) -> &ClientGameState<F> {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut ClientGameState<F> {
        &mut self.game
    }

    /// Why the server ended the session, if it said
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    /// Sends the handshake; the rest of the flow is driven by server replies
    pub fn start(&self) -> bool {
        self.connection.set_state(ConnectionState::Authenticating);
        self.connection.send_immediately(&peer::Authenticate {
            game_version: self.game_version.clone(),
            protocol_version: PROTOCOL_VERSION,
        })
    }

    pub fn handle_frame(&mut self, registry: &MessageRegistry<Self>, body: Bytes) -> Dispatch
    where
        F: 'static,
    {
        self.connection.touch();
        let connection = Arc::clone(&self.connection);
        let mut close = |tag: Option<i32>, err: DispatchError| {
            warn!("Bad message from server (tag {:?}): {}", tag, err);
            connection.close();
        };
        registry.dispatch(body, self, &mut close)
    }

    /// Advances the simulation and queues our state for the server
    pub fn update<R: Renderer>(&mut self, dt: f32, renderer: &mut R) {
        self.game.update(dt);
        self.game.render(renderer);

        if self.connection.state() == ConnectionState::InWorld {
            if let Some((position, velocity)) = self.game.local_state() {
                self.connection.queue(&position);
                self.connection.queue(&velocity);
            }
        }
        self.connection.flush();
    }

    /// Says goodbye and closes the connection
    pub fn leave(&self, reason: &str) -> bool {
        self.connection
            .disconnect_with(&peer::Disconnect {
                reason: reason.to_string(),
            })
    }

    fn end(&mut self, reason: String) {
        self.disconnect_reason = Some(reason);
        self.connection.close();
    }
}

impl<F: BodyFactory> HostHandler for ClientSession<F> {
    fn on_authentication_result(
        &mut self,
        message: host::AuthenticationResult,
    ) -> Result<(), DispatchError> {
        match message {
            host::AuthenticationResult::Allowed => {
                info!("Authenticated, joining {} as {}", self.world, self.username);
                self.connection.set_state(ConnectionState::Idle);
                self.connection.send_immediately(&peer::JoinWorld {
                    world_name: self.world.clone(),
                    username: self.username.clone(),
                });
            }
            host::AuthenticationResult::Denied { reason } => {
                warn!("Authentication denied: {}", reason);
                self.end(reason);
            }
        }
        Ok(())
    }

    fn on_join_world_result(
        &mut self,
        message: host::JoinWorldResult,
    ) -> Result<(), DispatchError> {
        match message {
            host::JoinWorldResult::Accepted { entity_id } => {
                info!("Joined {} as entity {}", self.world, entity_id);
                self.connection.bind(Binding {
                    world: self.world.clone(),
                    entity_id,
                });
                self.connection.set_state(ConnectionState::InWorld);
                self.game.set_local_player(entity_id);
                self.connection.send_immediately(&peer::WorldLoaded);
            }
            host::JoinWorldResult::Refused { reason } => {
                warn!("Could not join {}: {}", self.world, reason);
                self.leave(&reason);
                self.disconnect_reason = Some(reason);
            }
        }
        Ok(())
    }

    fn on_create_player(&mut self, message: host::CreatePlayer) -> Result<(), DispatchError> {
        self.game.spawn_remote(message);
        Ok(())
    }

    fn on_remove_player(&mut self, message: host::RemovePlayer) -> Result<(), DispatchError> {
        if !self.game.remove_remote(message.entity_id) {
            debug!("RemovePlayer for unknown entity {}", message.entity_id);
        }
        Ok(())
    }

    fn on_player_position(&mut self, message: host::PlayerPosition) -> Result<(), DispatchError> {
        if self.game.apply_position(message).is_none() {
            debug!("Position for unknown entity {}", message.entity_id);
        }
        Ok(())
    }

    fn on_player_velocity(&mut self, message: host::PlayerVelocity) -> Result<(), DispatchError> {
        self.game.apply_velocity(message);
        Ok(())
    }

    fn on_disconnect(&mut self, message: host::Disconnect) -> Result<(), DispatchError> {
        info!("Server disconnected us: {}", message.reason);
        self.end(message.reason);
        Ok(())
    }

    fn on_apply_body_force(&mut self, message: host::ApplyBodyForce) -> Result<(), DispatchError> {
        if !self.game.apply_force(message) {
            debug!("Force for unknown entity {}", message.entity_id);
        }
        Ok(())
    }
}

impl<F: BodyFactory> CustomHandler for ClientSession<F> {}

/// A connected client: socket tasks plus the session they feed
pub struct Client<F: BodyFactory + 'static> {
    session: ClientSession<F>,
    registry: MessageRegistry<ClientSession<F>>,
    frames: mpsc::UnboundedReceiver<Bytes>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    update_interval: Duration,
}

impl<F: BodyFactory + 'static> Client<F> {
    /// Connects and sends the handshake
    pub async fn connect(config: &ClientConfig, factory: F) -> Result<Self, ClientError> {
        Self::connect_with_registry(config, factory, MessageRegistry::host_to_peer()).await
    }

    pub async fn connect_with_registry(
        config: &ClientConfig,
        factory: F,
        registry: MessageRegistry<ClientSession<F>>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        info!("Connecting to {}", config.server_addr);
        let stream = TcpStream::connect(&config.server_addr).await?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();

        let (connection, outbound) = Connection::channel(0, peer_addr);
        let connection = Arc::new(connection);

        let writer = tokio::spawn(async move {
            if let Err(e) = write_outbound(write_half, outbound).await {
                debug!("Writer stopped: {}", e);
            }
        });

        let (frame_tx, frames) = mpsc::unbounded_channel();
        let max_frame_length = config.max_frame_length;
        let reader = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new(max_frame_length);
            let result = read_frames(read_half, &mut decoder, |body| {
                if frame_tx.send(body).is_err() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await;
            if let Err(e) = result {
                warn!("Connection to server lost: {}", e);
            }
        });

        let session = ClientSession::new(connection, config, factory);
        session.start();

        Ok(Self {
            session,
            registry,
            frames,
            reader,
            writer,
            update_interval: config.update_interval(),
        })
    }

    pub fn session(&self) -> &ClientSession<F> {
        &self.session
    }

    /// Handle for closing the connection from outside [`run`](Self::run)
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(self.session.connection())
    }

    /// Processes server messages and runs updates until the connection ends
    ///
    /// Returns the disconnect reason the server gave, if any.
    pub async fn run<R: Renderer>(mut self, renderer: &mut R) -> Result<Option<String>, ClientError> {
        let mut timer = interval(self.update_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_update = Instant::now();

        loop {
            tokio::select! {
                frame = self.frames.recv() => {
                    match frame {
                        Some(body) => {
                            self.session.handle_frame(&self.registry, body);
                        }
                        None => {
                            info!("Server closed the connection");
                            break;
                        }
                    }
                }
                _ = timer.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_update).as_secs_f32();
                    last_update = now;
                    self.session.update(dt, renderer);
                }
            }

            if self.session.connection().is_closed() {
                break;
            }
        }

        self.session.connection().close();
        let _ = self.writer.await;
        self.reader.abort();
        Ok(self.session.disconnect_reason)
    }
}

//! Tag-to-handler dispatch for inbound frames
//!
//! A [`MessageRegistry`] serves one direction of the protocol. Its built-in
//! catalog decodes each canonical message and calls the matching method on a
//! handler trait ([`PeerHandler`] on the host, [`HostHandler`] on the peer).
//! Embedding applications can replace any built-in entry with
//! [`MessageRegistry::register`] or extend the protocol through the separate
//! custom catalog ([`MessageRegistry::register_custom`]), which is only
//! consulted for tags the main catalog does not know.
//!
//! Dispatch never fails outward: decode and handler errors are routed to an
//! [`ErrorSink`] and the registry stays usable for the next frame.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use crate::codec::MessageReader;
use crate::error::DispatchError;
use crate::messages::{host, peer, Message};

/// Decodes the payload after the tag and hands it to the handler
pub type Invoker<H> =
    Arc<dyn Fn(&mut MessageReader, &mut H) -> Result<(), DispatchError> + Send + Sync>;

/// Which tag space a registry decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    PeerToHost,
    HostToPeer,
}

/// What happened to one dispatched frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handled by the main catalog
    Handled(i32),
    /// Handled by the custom catalog
    Custom(i32),
    /// No entry for the tag; dropped
    Ignored(i32),
    /// Reported to the error sink
    Failed,
}

/// Receives errors raised while dispatching a frame
pub trait ErrorSink {
    fn on_error(&mut self, tag: Option<i32>, error: DispatchError);
}

impl<F> ErrorSink for F
where
    F: FnMut(Option<i32>, DispatchError),
{
    fn on_error(&mut self, tag: Option<i32>, error: DispatchError) {
        self(tag, error)
    }
}

/// Generic hook for protocol extensions routed with [`MessageRegistry::route_custom`]
pub trait CustomHandler {
    fn on_custom(&mut self, tag: i32, reader: &mut MessageReader) -> Result<(), DispatchError> {
        debug!(
            "Custom message {} ({} bytes) has no handler",
            tag,
            reader.remaining()
        );
        Ok(())
    }
}

/// Host-side handler: one method per peer-to-host message
pub trait PeerHandler {
    fn on_authenticate(&mut self, message: peer::Authenticate) -> Result<(), DispatchError>;
    fn on_join_world(&mut self, message: peer::JoinWorld) -> Result<(), DispatchError>;
    fn on_world_loaded(&mut self) -> Result<(), DispatchError>;
    fn on_player_position(&mut self, message: peer::PlayerPosition) -> Result<(), DispatchError>;
    fn on_player_velocity(&mut self, message: peer::PlayerVelocity) -> Result<(), DispatchError>;
    fn on_disconnect(&mut self, message: peer::Disconnect) -> Result<(), DispatchError>;
    fn on_apply_body_force(&mut self, message: peer::ApplyBodyForce)
        -> Result<(), DispatchError>;
}

/// Peer-side handler: one method per host-to-peer message
pub trait HostHandler {
    fn on_authentication_result(
        &mut self,
        message: host::AuthenticationResult,
    ) -> Result<(), DispatchError>;
    fn on_join_world_result(&mut self, message: host::JoinWorldResult)
        -> Result<(), DispatchError>;
    fn on_create_player(&mut self, message: host::CreatePlayer) -> Result<(), DispatchError>;
    fn on_remove_player(&mut self, message: host::RemovePlayer) -> Result<(), DispatchError>;
    fn on_player_position(&mut self, message: host::PlayerPosition) -> Result<(), DispatchError>;
    fn on_player_velocity(&mut self, message: host::PlayerVelocity) -> Result<(), DispatchError>;
    fn on_disconnect(&mut self, message: host::Disconnect) -> Result<(), DispatchError>;
    fn on_apply_body_force(&mut self, message: host::ApplyBodyForce)
        -> Result<(), DispatchError>;
}

pub struct MessageRegistry<H> {
    direction: Direction,
    handlers: HashMap<i32, Invoker<H>>,
    custom: HashMap<i32, Invoker<H>>,
}

impl<H: 'static> MessageRegistry<H> {
    /// A registry with no entries in either catalog
    pub fn empty(direction: Direction) -> Self {
        Self {
            direction,
            handlers: HashMap::new(),
            custom: HashMap::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Inserts or replaces the main-catalog entry for `tag`
    pub fn register<F>(&mut self, tag: i32, invoker: F) -> Option<Invoker<H>>
    where
        F: Fn(&mut MessageReader, &mut H) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.handlers.insert(tag, Arc::new(invoker))
    }

    /// Inserts or replaces the custom-catalog entry for `tag`
    pub fn register_custom<F>(&mut self, tag: i32, invoker: F) -> Option<Invoker<H>>
    where
        F: Fn(&mut MessageReader, &mut H) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.custom.insert(tag, Arc::new(invoker))
    }

    pub fn unregister(&mut self, tag: i32) -> Option<Invoker<H>> {
        self.handlers.remove(&tag)
    }

    pub fn contains(&self, tag: i32) -> bool {
        self.handlers.contains_key(&tag) || self.custom.contains_key(&tag)
    }

    /// Dispatches one frame body (tag and payload) to `handler`
    pub fn dispatch(&self, body: Bytes, handler: &mut H, sink: &mut dyn ErrorSink) -> Dispatch {
        let mut reader = MessageReader::new(body);

        let tag = match reader.read_tag() {
            Ok(tag) => tag,
            Err(e) => {
                warn!("Dropping frame without a type tag: {}", e);
                sink.on_error(None, e.into());
                return Dispatch::Failed;
            }
        };

        let (invoker, outcome) = if let Some(invoker) = self.handlers.get(&tag) {
            (invoker, Dispatch::Handled(tag))
        } else if let Some(invoker) = self.custom.get(&tag) {
            (invoker, Dispatch::Custom(tag))
        } else {
            debug!("Ignoring unregistered {:?} tag {}", self.direction, tag);
            return Dispatch::Ignored(tag);
        };

        match invoker(&mut reader, handler) {
            Ok(()) => outcome,
            Err(e) => {
                warn!("Failed to handle {:?} tag {}: {}", self.direction, tag, e);
                sink.on_error(Some(tag), e);
                Dispatch::Failed
            }
        }
    }
}

impl<H: CustomHandler + 'static> MessageRegistry<H> {
    /// Routes `tag` through the custom catalog to [`CustomHandler::on_custom`]
    pub fn route_custom(&mut self, tag: i32) {
        self.register_custom(tag, move |reader, handler: &mut H| {
            handler.on_custom(tag, reader)
        });
    }
}

impl<H: PeerHandler + 'static> MessageRegistry<H> {
    /// The canonical peer-to-host catalog
    pub fn peer_to_host() -> Self {
        let mut registry = Self::empty(Direction::PeerToHost);
        registry.register(peer::AUTHENTICATE, |reader, handler: &mut H| {
            handler.on_authenticate(peer::Authenticate::decode(reader)?)
        });
        registry.register(peer::JOIN_WORLD, |reader, handler: &mut H| {
            handler.on_join_world(peer::JoinWorld::decode(reader)?)
        });
        registry.register(peer::WORLD_LOADED, |_reader, handler: &mut H| {
            handler.on_world_loaded()
        });
        registry.register(peer::PLAYER_POSITION, |reader, handler: &mut H| {
            handler.on_player_position(peer::PlayerPosition::decode(reader)?)
        });
        registry.register(peer::PLAYER_VELOCITY, |reader, handler: &mut H| {
            handler.on_player_velocity(peer::PlayerVelocity::decode(reader)?)
        });
        registry.register(peer::DISCONNECT, |reader, handler: &mut H| {
            handler.on_disconnect(peer::Disconnect::decode(reader)?)
        });
        registry.register(peer::APPLY_BODY_FORCE, |reader, handler: &mut H| {
            handler.on_apply_body_force(peer::ApplyBodyForce::decode(reader)?)
        });
        registry
    }
}

impl<H: HostHandler + 'static> MessageRegistry<H> {
    /// The canonical host-to-peer catalog
    pub fn host_to_peer() -> Self {
        let mut registry = Self::empty(Direction::HostToPeer);
        registry.register(host::AUTHENTICATION_RESULT, |reader, handler: &mut H| {
            handler.on_authentication_result(host::AuthenticationResult::decode(reader)?)
        });
        registry.register(host::JOIN_WORLD_RESULT, |reader, handler: &mut H| {
            handler.on_join_world_result(host::JoinWorldResult::decode(reader)?)
        });
        registry.register(host::CREATE_PLAYER, |reader, handler: &mut H| {
            handler.on_create_player(host::CreatePlayer::decode(reader)?)
        });
        registry.register(host::REMOVE_PLAYER, |reader, handler: &mut H| {
            handler.on_remove_player(host::RemovePlayer::decode(reader)?)
        });
        registry.register(host::PLAYER_POSITION, |reader, handler: &mut H| {
            handler.on_player_position(host::PlayerPosition::decode(reader)?)
        });
        registry.register(host::PLAYER_VELOCITY, |reader, handler: &mut H| {
            handler.on_player_velocity(host::PlayerVelocity::decode(reader)?)
        });
        registry.register(host::DISCONNECT, |reader, handler: &mut H| {
            handler.on_disconnect(host::Disconnect::decode(reader)?)
        });
        registry.register(host::APPLY_BODY_FORCE, |reader, handler: &mut H| {
            handler.on_apply_body_force(host::ApplyBodyForce::decode(reader)?)
        });
        registry
    }
}

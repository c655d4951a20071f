//! Message catalog for both directions of the protocol
//!
//! Peer-to-host and host-to-peer messages live in separate tag spaces. The
//! same tag value may appear in both, since the receiving side always knows
//! which direction it is decoding.

use bytes::Bytes;

use crate::codec::{MessageReader, MessageWriter};
use crate::error::CodecError;

/// A wire message with a fixed type tag and field order
pub trait Message: Sized {
    const TAG: i32;

    /// Writes the payload fields in declared order
    fn encode_fields(&self, writer: &mut MessageWriter);

    /// Reads the payload fields; the tag has already been consumed
    fn decode(reader: &mut MessageReader) -> Result<Self, CodecError>;

    /// Writes the tag followed by the payload
    fn encode(&self, writer: &mut MessageWriter) {
        writer.write_tag(Self::TAG);
        self.encode_fields(writer);
    }

    /// Encodes into a complete, length-prefixed frame
    fn to_frame(&self) -> Bytes {
        let mut writer = MessageWriter::new();
        self.encode(&mut writer);
        writer.finish()
    }
}

/// Messages sent by a peer (client) to the host (server)
pub mod peer {
    use super::*;

    pub const AUTHENTICATE: i32 = 1;
    pub const JOIN_WORLD: i32 = 2;
    pub const WORLD_LOADED: i32 = 3;
    pub const PLAYER_POSITION: i32 = 4;
    pub const PLAYER_VELOCITY: i32 = 5;
    pub const DISCONNECT: i32 = 6;
    pub const APPLY_BODY_FORCE: i32 = 7;

    /// Handshake carrying the peer's game and protocol versions
    #[derive(Debug, Clone, PartialEq)]
    pub struct Authenticate {
        pub game_version: String,
        pub protocol_version: i32,
    }

    impl Message for Authenticate {
        const TAG: i32 = AUTHENTICATE;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_str(&self.game_version);
            writer.write_i32(self.protocol_version);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                game_version: reader.read_string()?,
                protocol_version: reader.read_i32()?,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct JoinWorld {
        pub world_name: String,
        pub username: String,
    }

    impl Message for JoinWorld {
        const TAG: i32 = JOIN_WORLD;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_str(&self.world_name);
            writer.write_str(&self.username);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                world_name: reader.read_string()?,
                username: reader.read_string()?,
            })
        }
    }

    /// Acknowledges that the peer finished loading the joined world
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct WorldLoaded;

    impl Message for WorldLoaded {
        const TAG: i32 = WORLD_LOADED;

        fn encode_fields(&self, _writer: &mut MessageWriter) {}

        fn decode(_reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PlayerPosition {
        pub rotation: f32,
        pub x: f32,
        pub y: f32,
    }

    impl Message for PlayerPosition {
        const TAG: i32 = PLAYER_POSITION;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_f32(self.rotation);
            writer.write_f32(self.x);
            writer.write_f32(self.y);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                rotation: reader.read_f32()?,
                x: reader.read_f32()?,
                y: reader.read_f32()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PlayerVelocity {
        pub velocity_x: f32,
        pub velocity_y: f32,
        pub rotation: f32,
    }

    impl Message for PlayerVelocity {
        const TAG: i32 = PLAYER_VELOCITY;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_f32(self.velocity_x);
            writer.write_f32(self.velocity_y);
            writer.write_f32(self.rotation);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                velocity_x: reader.read_f32()?,
                velocity_y: reader.read_f32()?,
                rotation: reader.read_f32()?,
            })
        }
    }

    /// Peer-initiated disconnect; an empty reason means none was given
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct Disconnect {
        pub reason: String,
    }

    impl Message for Disconnect {
        const TAG: i32 = DISCONNECT;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_str(&self.reason);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                reason: reader.read_string()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct ApplyBodyForce {
        pub entity_id: i32,
        pub force_x: f32,
        pub force_y: f32,
        pub point_x: f32,
        pub point_y: f32,
    }

    impl Message for ApplyBodyForce {
        const TAG: i32 = APPLY_BODY_FORCE;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_i32(self.entity_id);
            writer.write_f32(self.force_x);
            writer.write_f32(self.force_y);
            writer.write_f32(self.point_x);
            writer.write_f32(self.point_y);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                entity_id: reader.read_i32()?,
                force_x: reader.read_f32()?,
                force_y: reader.read_f32()?,
                point_x: reader.read_f32()?,
                point_y: reader.read_f32()?,
            })
        }
    }
}

/// Messages sent by the host (server) to a peer (client)
pub mod host {
    use super::*;

    pub const AUTHENTICATION_RESULT: i32 = 1;
    pub const JOIN_WORLD_RESULT: i32 = 2;
    pub const CREATE_PLAYER: i32 = 3;
    pub const REMOVE_PLAYER: i32 = 4;
    pub const PLAYER_POSITION: i32 = 5;
    pub const PLAYER_VELOCITY: i32 = 6;
    pub const DISCONNECT: i32 = 7;
    pub const APPLY_BODY_FORCE: i32 = 8;

    /// `[allowed: bool]` followed by `[reason: string]` only when denied
    #[derive(Debug, Clone, PartialEq)]
    pub enum AuthenticationResult {
        Allowed,
        Denied { reason: String },
    }

    impl AuthenticationResult {
        pub fn denied(reason: impl Into<String>) -> Self {
            AuthenticationResult::Denied {
                reason: reason.into(),
            }
        }

        pub fn is_allowed(&self) -> bool {
            matches!(self, AuthenticationResult::Allowed)
        }
    }

    impl Message for AuthenticationResult {
        const TAG: i32 = AUTHENTICATION_RESULT;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            match self {
                AuthenticationResult::Allowed => writer.write_bool(true),
                AuthenticationResult::Denied { reason } => {
                    writer.write_bool(false);
                    writer.write_str(reason);
                }
            }
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            if reader.read_bool()? {
                Ok(AuthenticationResult::Allowed)
            } else {
                Ok(AuthenticationResult::Denied {
                    reason: reader.read_string()?,
                })
            }
        }
    }

    /// `[allowed: bool]` followed by the entity id when accepted, or a reason
    #[derive(Debug, Clone, PartialEq)]
    pub enum JoinWorldResult {
        Accepted { entity_id: i32 },
        Refused { reason: String },
    }

    impl JoinWorldResult {
        pub fn refused(reason: impl Into<String>) -> Self {
            JoinWorldResult::Refused {
                reason: reason.into(),
            }
        }
    }

    impl Message for JoinWorldResult {
        const TAG: i32 = JOIN_WORLD_RESULT;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            match self {
                JoinWorldResult::Accepted { entity_id } => {
                    writer.write_bool(true);
                    writer.write_i32(*entity_id);
                }
                JoinWorldResult::Refused { reason } => {
                    writer.write_bool(false);
                    writer.write_str(reason);
                }
            }
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            if reader.read_bool()? {
                Ok(JoinWorldResult::Accepted {
                    entity_id: reader.read_i32()?,
                })
            } else {
                Ok(JoinWorldResult::Refused {
                    reason: reader.read_string()?,
                })
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct CreatePlayer {
        pub username: String,
        pub entity_id: i32,
        pub x: f32,
        pub y: f32,
    }

    impl Message for CreatePlayer {
        const TAG: i32 = CREATE_PLAYER;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_str(&self.username);
            writer.write_i32(self.entity_id);
            writer.write_f32(self.x);
            writer.write_f32(self.y);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                username: reader.read_string()?,
                entity_id: reader.read_i32()?,
                x: reader.read_f32()?,
                y: reader.read_f32()?,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct RemovePlayer {
        pub entity_id: i32,
        pub username: String,
    }

    impl Message for RemovePlayer {
        const TAG: i32 = REMOVE_PLAYER;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_i32(self.entity_id);
            writer.write_str(&self.username);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                entity_id: reader.read_i32()?,
                username: reader.read_string()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PlayerPosition {
        pub entity_id: i32,
        pub rotation: f32,
        pub x: f32,
        pub y: f32,
    }

    impl Message for PlayerPosition {
        const TAG: i32 = PLAYER_POSITION;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_i32(self.entity_id);
            writer.write_f32(self.rotation);
            writer.write_f32(self.x);
            writer.write_f32(self.y);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                entity_id: reader.read_i32()?,
                rotation: reader.read_f32()?,
                x: reader.read_f32()?,
                y: reader.read_f32()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PlayerVelocity {
        pub entity_id: i32,
        pub velocity_x: f32,
        pub velocity_y: f32,
        pub rotation: f32,
    }

    impl Message for PlayerVelocity {
        const TAG: i32 = PLAYER_VELOCITY;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_i32(self.entity_id);
            writer.write_f32(self.velocity_x);
            writer.write_f32(self.velocity_y);
            writer.write_f32(self.rotation);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                entity_id: reader.read_i32()?,
                velocity_x: reader.read_f32()?,
                velocity_y: reader.read_f32()?,
                rotation: reader.read_f32()?,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct Disconnect {
        pub reason: String,
    }

    impl Disconnect {
        pub fn new(reason: impl Into<String>) -> Self {
            Self {
                reason: reason.into(),
            }
        }
    }

    impl Message for Disconnect {
        const TAG: i32 = DISCONNECT;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_str(&self.reason);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                reason: reader.read_string()?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct ApplyBodyForce {
        pub entity_id: i32,
        pub force_x: f32,
        pub force_y: f32,
        pub point_x: f32,
        pub point_y: f32,
    }

    impl From<peer::ApplyBodyForce> for ApplyBodyForce {
        fn from(force: peer::ApplyBodyForce) -> Self {
            Self {
                entity_id: force.entity_id,
                force_x: force.force_x,
                force_y: force.force_y,
                point_x: force.point_x,
                point_y: force.point_y,
            }
        }
    }

    impl Message for ApplyBodyForce {
        const TAG: i32 = APPLY_BODY_FORCE;

        fn encode_fields(&self, writer: &mut MessageWriter) {
            writer.write_i32(self.entity_id);
            writer.write_f32(self.force_x);
            writer.write_f32(self.force_y);
            writer.write_f32(self.point_x);
            writer.write_f32(self.point_y);
        }

        fn decode(reader: &mut MessageReader) -> Result<Self, CodecError> {
            Ok(Self {
                entity_id: reader.read_i32()?,
                force_x: reader.read_f32()?,
                force_y: reader.read_f32()?,
                point_x: reader.read_f32()?,
                point_y: reader.read_f32()?,
            })
        }
    }
}

/// Any peer-to-host message, decoded from a frame body
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    Authenticate(peer::Authenticate),
    JoinWorld(peer::JoinWorld),
    WorldLoaded,
    PlayerPosition(peer::PlayerPosition),
    PlayerVelocity(peer::PlayerVelocity),
    Disconnect(peer::Disconnect),
    ApplyBodyForce(peer::ApplyBodyForce),
    /// A tag outside the canonical catalog, with its undecoded payload
    Custom { tag: i32, payload: Bytes },
}

impl PeerMessage {
    pub fn decode_frame(body: Bytes) -> Result<Self, CodecError> {
        let mut reader = MessageReader::new(body);
        let message = match reader.read_tag()? {
            peer::AUTHENTICATE => PeerMessage::Authenticate(peer::Authenticate::decode(&mut reader)?),
            peer::JOIN_WORLD => PeerMessage::JoinWorld(peer::JoinWorld::decode(&mut reader)?),
            peer::WORLD_LOADED => PeerMessage::WorldLoaded,
            peer::PLAYER_POSITION => {
                PeerMessage::PlayerPosition(peer::PlayerPosition::decode(&mut reader)?)
            }
            peer::PLAYER_VELOCITY => {
                PeerMessage::PlayerVelocity(peer::PlayerVelocity::decode(&mut reader)?)
            }
            peer::DISCONNECT => PeerMessage::Disconnect(peer::Disconnect::decode(&mut reader)?),
            peer::APPLY_BODY_FORCE => {
                PeerMessage::ApplyBodyForce(peer::ApplyBodyForce::decode(&mut reader)?)
            }
            tag => PeerMessage::Custom {
                tag,
                payload: reader.take_rest(),
            },
        };
        Ok(message)
    }
}

/// Any host-to-peer message, decoded from a frame body
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    AuthenticationResult(host::AuthenticationResult),
    JoinWorldResult(host::JoinWorldResult),
    CreatePlayer(host::CreatePlayer),
    RemovePlayer(host::RemovePlayer),
    PlayerPosition(host::PlayerPosition),
    PlayerVelocity(host::PlayerVelocity),
    Disconnect(host::Disconnect),
    ApplyBodyForce(host::ApplyBodyForce),
    Custom { tag: i32, payload: Bytes },
}

impl HostMessage {
    pub fn decode_frame(body: Bytes) -> Result<Self, CodecError> {
        let mut reader = MessageReader::new(body);
        let message = match reader.read_tag()? {
            host::AUTHENTICATION_RESULT => HostMessage::AuthenticationResult(
                host::AuthenticationResult::decode(&mut reader)?,
            ),
            host::JOIN_WORLD_RESULT => {
                HostMessage::JoinWorldResult(host::JoinWorldResult::decode(&mut reader)?)
            }
            host::CREATE_PLAYER => {
                HostMessage::CreatePlayer(host::CreatePlayer::decode(&mut reader)?)
            }
            host::REMOVE_PLAYER => {
                HostMessage::RemovePlayer(host::RemovePlayer::decode(&mut reader)?)
            }
            host::PLAYER_POSITION => {
                HostMessage::PlayerPosition(host::PlayerPosition::decode(&mut reader)?)
            }
            host::PLAYER_VELOCITY => {
                HostMessage::PlayerVelocity(host::PlayerVelocity::decode(&mut reader)?)
            }
            host::DISCONNECT => HostMessage::Disconnect(host::Disconnect::decode(&mut reader)?),
            host::APPLY_BODY_FORCE => {
                HostMessage::ApplyBodyForce(host::ApplyBodyForce::decode(&mut reader)?)
            }
            tag => HostMessage::Custom {
                tag,
                payload: reader.take_rest(),
            },
        };
        Ok(message)
    }
}

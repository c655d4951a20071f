//! Protocol pieces shared by the world server and its clients: the binary wire
//! codec, the two-direction message catalog, tag dispatch, per-peer connection
//! state and the socket read/write loops.

pub mod codec;
pub mod connection;
pub mod error;
pub mod messages;
pub mod registry;
pub mod transport;

pub use codec::{FrameDecoder, MessageReader, MessageWriter};
pub use connection::{Binding, Connection, ConnectionId, ConnectionState, Outbound};
pub use error::{CodecError, DispatchError, TransportError};
pub use messages::{host, peer, HostMessage, Message, PeerMessage};
pub use registry::{
    CustomHandler, Direction, Dispatch, ErrorSink, HostHandler, MessageRegistry, PeerHandler,
};
pub use transport::{read_frames, write_outbound};

/// Identifier of a player or entity, unique within its world at any instant
pub type EntityId = i32;

/// Version of the wire protocol spoken by this build
pub const PROTOCOL_VERSION: i32 = 1;

/// Game version advertised by clients unless configured otherwise
pub const DEFAULT_GAME_VERSION: &str = "1.0";

/// Upper bound on a single frame unless configured otherwise
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Squared distance between two points
pub fn distance_squared(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_distance_squared() {
        assert_approx_eq!(distance_squared(10.0, 10.0, 20.0, 10.0), 100.0, 1e-6);
        assert_approx_eq!(distance_squared(0.0, 0.0, -3.0, 4.0), 25.0, 1e-6);
        assert_eq!(distance_squared(1.5, 1.5, 1.5, 1.5), 0.0);
    }

    #[test]
    fn test_protocol_constants() {
        assert!(PROTOCOL_VERSION > 0);
        assert!(DEFAULT_MAX_FRAME_LENGTH >= 1024);
        assert!(!DEFAULT_GAME_VERSION.is_empty());
    }
}

//! # World Client Library
//!
//! This library provides the peer side of the world synchronization layer. It
//! connects to a world server, completes the handshake, joins a world and
//! keeps a simulated body for every player the server reports.
//!
//! ## Architecture Overview
//!
//! The client owns its local simulation and treats the server as the
//! authority on where everyone is:
//!
//! ### Handshake
//! On connect the client sends `Authenticate`. An allowed result is followed
//! by `JoinWorld`, an accepted join by `WorldLoaded`, after which the server
//! introduces every player already in the world and places the client's own
//! player at the spawn point.
//!
//! ### Reconciliation
//! Remote bodies keep simulating between updates. When an authoritative
//! position arrives, small offsets are tolerated; a large one either snaps the
//! body into place or steers it there over a few updates by setting its
//! velocity toward the target.
//!
//! ### State Upload
//! Every update the client queues its own position and velocity and flushes
//! them as one write.
//!
//! ## Module Organization
//!
//! ### Body Module (`body`)
//! Collaborator traits for physics bodies, body factories and renderers, plus
//! a kinematic body and a logging renderer for headless use.
//!
//! ### Reconciliation Module (`reconciliation`)
//! Desync detection, snapping and interpolation toward server positions.
//!
//! ### Game Module (`game`)
//! The local player and all remote entities, keyed by entity id.
//!
//! ### Network Module (`network`)
//! TCP connection, host-message handling and the update loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::body::{KinematicBodyFactory, LogRenderer};
//! use client::network::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         username: "ada".to_string(),
//!         ..ClientConfig::default()
//!     };
//!     let client = Client::connect(&config, KinematicBodyFactory::default()).await?;
//!
//!     let mut renderer = LogRenderer::default();
//!     if let Some(reason) = client.run(&mut renderer).await? {
//!         println!("Disconnected: {}", reason);
//!     }
//!     Ok(())
//! }
//! ```

pub mod body;
pub mod game;
pub mod network;
pub mod reconciliation;

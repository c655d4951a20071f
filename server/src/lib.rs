//! # World Server Library
//!
//! This library provides the authoritative host for the world synchronization
//! layer. It accepts peer connections, walks them through the handshake,
//! places their players into named worlds and keeps every peer up to date
//! with everyone else's state.
//!
//! ## Core Responsibilities
//!
//! ### Connection Handshake
//! Every peer moves through the same states:
//! - `Authenticating`: the peer's game and protocol versions are checked
//! - `Idle`: authenticated, free to ask for a world
//! - `InWorld`: bound to a player entity in exactly one world
//! - `Disconnected`: terminal, reached exactly once whatever the cause
//!
//! ### World Membership
//! Worlds enforce their capacity, hand out entity ids and introduce players
//! to one another: a newcomer learns about everyone already present, and
//! everyone present learns about the newcomer, before the newcomer is added.
//!
//! ### State Broadcasting
//! Once per tick each world flushes the batch queued for every player, drops
//! players that went quiet for longer than the world's timeout, and queues
//! every remaining player's position and velocity for all the others.
//!
//! ## Architecture Design
//!
//! ### Tasks
//! The server runs on tokio:
//! - **Accept loop**: admits sockets while the connection pool has room
//! - **Reader task** per connection: splits the byte stream into frames and
//!   dispatches them through the message registry
//! - **Writer task** per connection: the only code that touches the socket's
//!   write half, so immediate sends and tick flushes never interleave
//! - **Tick scheduler**: one task ticking every world at a fixed rate, with
//!   catch-up passes after a slow tick and a deferred queue drained after
//!   each pass
//!
//! ### Wire Protocol
//! Length-prefixed TCP frames carrying a big-endian type tag and payload.
//! Peer-to-host and host-to-peer messages use separate tag spaces; see the
//! `shared` crate for the catalog.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Command-line values and the JSON world list, with validation.
//!
//! ### World Module (`world`)
//! Players, entities, the per-world roster and the registry of worlds:
//! - Capacity checks and spawn ordering
//! - Idempotent player removal
//! - Immediate and queued broadcasts, encoded once per message
//! - The per-world tick with timeout detection
//!
//! ### Scheduler Module (`scheduler`)
//! The fixed-rate tick loop, catch-up arithmetic and deferred task queue.
//! A failed tick stops the scheduler for good.
//!
//! ### Client Manager Module (`client_manager`)
//! The server-wide connection pool and its capacity limit.
//!
//! ### Session Module (`session`)
//! The shared server context and the per-connection message handler.
//!
//! ### Network Module (`network`)
//! TCP listener, accept loop and the reader/writer tasks for each peer.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::scheduler::TickScheduler;
//! use server::session::ServerContext;
//! use server::world::WorldRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let worlds = Arc::new(WorldRegistry::from_configs(&config.worlds)?);
//!
//!     // The scheduler owns the ticking; connections submit spawns through it
//!     let scheduler = TickScheduler::new(Arc::clone(&worlds), config.tick_interval());
//!     let ctx = ServerContext::new(config.clone(), worlds, scheduler.deferred());
//!
//!     let server = Server::bind(&config.bind_addr, ctx).await?;
//!     tokio::spawn(scheduler.run());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod network;
pub mod scheduler;
pub mod session;
pub mod world;

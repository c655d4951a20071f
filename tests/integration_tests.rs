//! Integration tests for the world synchronization layer
//!
//! Every test here starts a real server on a loopback port with its tick
//! scheduler running, then talks to it over TCP.

use assert_approx_eq::assert_approx_eq;
use server::config::{ServerConfig, WorldConfig};
use server::network::Server;
use server::scheduler::TickScheduler;
use server::session::{
    ServerContext, UNSUPPORTED_GAME_VERSION, UNSUPPORTED_PROTOCOL_VERSION, WORLD_NOT_FOUND_REASON,
};
use server::world::WorldRegistry;
use shared::{host, peer, FrameDecoder, HostMessage, Message, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    let mut town = WorldConfig::new("Town");
    town.spawn_x = 12.0;
    town.spawn_y = -4.0;
    ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        tick_rate: 50,
        worlds: vec![town, WorldConfig::new("Caves")],
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> (SocketAddr, Arc<ServerContext>) {
    let worlds = Arc::new(WorldRegistry::from_configs(&config.worlds).unwrap());
    let scheduler = TickScheduler::new(Arc::clone(&worlds), config.tick_interval());
    let ctx = ServerContext::new(config.clone(), worlds, scheduler.deferred());
    let server = Server::bind(&config.bind_addr, Arc::clone(&ctx))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    tokio::spawn(server.run());
    tokio::spawn(scheduler.run());
    (addr, ctx)
}

/// Raw protocol peer speaking frames directly over a socket
struct TestPeer {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl TestPeer {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            decoder: FrameDecoder::new(shared::DEFAULT_MAX_FRAME_LENGTH),
        }
    }

    async fn send<M: Message>(&mut self, message: &M) {
        self.stream.write_all(&message.to_frame()).await.unwrap();
    }

    /// Next host message, or `None` once the server has closed the socket
    async fn recv(&mut self) -> Option<HostMessage> {
        loop {
            if let Some(body) = self.decoder.next_frame().unwrap() {
                return Some(HostMessage::decode_frame(body).unwrap());
            }
            let read = timeout(WAIT, self.stream.read_buf(self.decoder.buffer_mut()))
                .await
                .expect("timed out waiting for the server")
                .unwrap_or(0);
            if read == 0 {
                return None;
            }
        }
    }

    /// Skips messages until one matches
    async fn recv_until<F>(&mut self, mut matches: F) -> HostMessage
    where
        F: FnMut(&HostMessage) -> bool,
    {
        loop {
            match self.recv().await {
                Some(message) if matches(&message) => return message,
                Some(_) => continue,
                None => panic!("server closed the connection first"),
            }
        }
    }

    /// Drains until EOF, returning everything received on the way
    async fn recv_to_close(&mut self) -> Vec<HostMessage> {
        let mut received = Vec::new();
        while let Some(message) = self.recv().await {
            received.push(message);
        }
        received
    }

    async fn authenticate(&mut self) {
        self.send(&peer::Authenticate {
            game_version: shared::DEFAULT_GAME_VERSION.to_string(),
            protocol_version: PROTOCOL_VERSION,
        })
        .await;
        assert_eq!(
            self.recv().await,
            Some(HostMessage::AuthenticationResult(
                host::AuthenticationResult::Allowed
            ))
        );
    }

    /// Authenticates, joins `world` and waits for the spawn placement
    async fn enter(&mut self, username: &str, world: &str) -> i32 {
        self.authenticate().await;
        self.join(username, world).await
    }

    /// Joins `world` on an authenticated connection and waits for the spawn
    async fn join(&mut self, username: &str, world: &str) -> i32 {
        self.send(&peer::JoinWorld {
            username: username.to_string(),
            world_name: world.to_string(),
        })
        .await;
        let entity_id = match self.recv().await {
            Some(HostMessage::JoinWorldResult(host::JoinWorldResult::Accepted { entity_id })) => {
                entity_id
            }
            other => panic!("join was not accepted: {:?}", other),
        };

        self.send(&peer::WorldLoaded).await;
        self.recv_until(|m| {
            matches!(m, HostMessage::PlayerPosition(p) if p.entity_id == entity_id)
        })
        .await;
        entity_id
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never became true");
}

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    /// Tests the full path from connect to spawn
    #[tokio::test]
    async fn join_places_player_at_spawn_point() {
        let (addr, ctx) = start_server(test_config()).await;
        let mut client = TestPeer::connect(addr).await;
        client.authenticate().await;

        client
            .send(&peer::JoinWorld {
                username: "ada".to_string(),
                world_name: "Town".to_string(),
            })
            .await;
        let entity_id = match client.recv().await {
            Some(HostMessage::JoinWorldResult(host::JoinWorldResult::Accepted { entity_id })) => {
                entity_id
            }
            other => panic!("unexpected reply: {:?}", other),
        };

        client.send(&peer::WorldLoaded).await;
        match client.recv().await {
            Some(HostMessage::PlayerPosition(position)) => {
                assert_eq!(position.entity_id, entity_id);
                assert_eq!((position.x, position.y), (12.0, -4.0));
            }
            other => panic!("expected our spawn position, got {:?}", other),
        }

        let town = ctx.worlds().get("Town").unwrap();
        wait_for(|| town.contains_player(entity_id).unwrap()).await;
        assert_eq!(ctx.clients().len(), 1);
    }

    /// Tests that a mismatched game version is denied and the socket closed
    #[tokio::test]
    async fn wrong_game_version_is_denied() {
        let (addr, _ctx) = start_server(test_config()).await;
        let mut client = TestPeer::connect(addr).await;
        client
            .send(&peer::Authenticate {
                game_version: "0.1".to_string(),
                protocol_version: PROTOCOL_VERSION,
            })
            .await;

        let received = client.recv_to_close().await;
        assert_eq!(
            received,
            vec![HostMessage::AuthenticationResult(
                host::AuthenticationResult::denied(UNSUPPORTED_GAME_VERSION)
            )]
        );
    }

    /// Tests that a mismatched protocol version is denied
    #[tokio::test]
    async fn wrong_protocol_version_is_denied() {
        let (addr, _ctx) = start_server(test_config()).await;
        let mut client = TestPeer::connect(addr).await;
        client
            .send(&peer::Authenticate {
                game_version: shared::DEFAULT_GAME_VERSION.to_string(),
                protocol_version: PROTOCOL_VERSION + 1,
            })
            .await;

        let received = client.recv_to_close().await;
        assert_eq!(
            received.first(),
            Some(&HostMessage::AuthenticationResult(
                host::AuthenticationResult::denied(UNSUPPORTED_PROTOCOL_VERSION)
            ))
        );
    }

    /// Tests that joining an unknown world is refused without disconnecting
    #[tokio::test]
    async fn unknown_world_is_refused() {
        let (addr, _ctx) = start_server(test_config()).await;
        let mut client = TestPeer::connect(addr).await;
        client.authenticate().await;

        client
            .send(&peer::JoinWorld {
                username: "ada".to_string(),
                world_name: "Atlantis".to_string(),
            })
            .await;
        assert_eq!(
            client.recv().await,
            Some(HostMessage::JoinWorldResult(host::JoinWorldResult::refused(
                WORLD_NOT_FOUND_REASON
            )))
        );

        // Still connected, so a second attempt can succeed
        let entity_id = client.join("ada", "Caves").await;
        assert!(entity_id > 0);
    }

    /// Tests that a full client pool turns new connections away
    #[tokio::test]
    async fn full_server_refuses_connection() {
        let config = ServerConfig {
            max_clients: 1,
            ..test_config()
        };
        let (addr, ctx) = start_server(config).await;

        let mut first = TestPeer::connect(addr).await;
        first.authenticate().await;

        let mut second = TestPeer::connect(addr).await;
        let received = second.recv_to_close().await;
        assert_eq!(
            received,
            vec![HostMessage::Disconnect(host::Disconnect::new(
                server::client_manager::SERVER_FULL_REASON
            ))]
        );
        assert_eq!(ctx.clients().len(), 1);
    }

    /// Tests that garbage on the wire gets a protocol error
    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let config = ServerConfig {
            max_frame_length: 128,
            ..test_config()
        };
        let (addr, ctx) = start_server(config).await;
        let mut client = TestPeer::connect(addr).await;

        client
            .stream
            .write_all(&(1024u32).to_be_bytes())
            .await
            .unwrap();

        let received = client.recv_to_close().await;
        assert_eq!(
            received,
            vec![HostMessage::Disconnect(host::Disconnect::new(
                server::session::PROTOCOL_ERROR_REASON
            ))]
        );
        wait_for(|| ctx.clients().is_empty()).await;
    }
}

/// WORLD SYNCHRONIZATION TESTS
mod world_sync_tests {
    use super::*;

    /// Tests that both sides learn about each other when a second player joins
    #[tokio::test]
    async fn players_see_each_other() {
        let (addr, _ctx) = start_server(test_config()).await;

        let mut alice = TestPeer::connect(addr).await;
        let alice_id = alice.enter("alice", "Town").await;

        let mut bob = TestPeer::connect(addr).await;
        bob.authenticate().await;
        bob.send(&peer::JoinWorld {
            username: "bob".to_string(),
            world_name: "Town".to_string(),
        })
        .await;
        let bob_id = match bob.recv().await {
            Some(HostMessage::JoinWorldResult(host::JoinWorldResult::Accepted { entity_id })) => {
                entity_id
            }
            other => panic!("join was not accepted: {:?}", other),
        };
        assert_ne!(alice_id, bob_id);
        bob.send(&peer::WorldLoaded).await;

        match bob.recv_until(|m| matches!(m, HostMessage::CreatePlayer(_))).await {
            HostMessage::CreatePlayer(create) => {
                assert_eq!(create.entity_id, alice_id);
                assert_eq!(create.username, "alice");
            }
            _ => unreachable!(),
        }

        match alice
            .recv_until(|m| matches!(m, HostMessage::CreatePlayer(_)))
            .await
        {
            HostMessage::CreatePlayer(create) => {
                assert_eq!(create.entity_id, bob_id);
                assert_eq!(create.username, "bob");
                assert_approx_eq!(create.x, 12.0);
                assert_approx_eq!(create.y, -4.0);
            }
            _ => unreachable!(),
        }
    }

    /// Tests that uploaded positions reach other players on the tick
    #[tokio::test]
    async fn positions_are_relayed() {
        let (addr, _ctx) = start_server(test_config()).await;

        let mut alice = TestPeer::connect(addr).await;
        let alice_id = alice.enter("alice", "Town").await;
        let mut bob = TestPeer::connect(addr).await;
        bob.enter("bob", "Town").await;

        alice
            .send(&peer::PlayerPosition {
                rotation: 1.5,
                x: 40.0,
                y: 2.0,
            })
            .await;
        alice
            .send(&peer::PlayerVelocity {
                velocity_x: 3.0,
                velocity_y: 0.0,
                rotation: 1.5,
            })
            .await;

        bob.recv_until(|m| {
            matches!(m, HostMessage::PlayerPosition(p)
                if p.entity_id == alice_id && p.x == 40.0 && p.y == 2.0)
        })
        .await;
        bob.recv_until(|m| {
            matches!(m, HostMessage::PlayerVelocity(v)
                if v.entity_id == alice_id && v.velocity_x == 3.0)
        })
        .await;
    }

    /// Tests that players in different worlds never hear of each other
    #[tokio::test]
    async fn worlds_are_isolated() {
        let (addr, ctx) = start_server(test_config()).await;

        let mut alice = TestPeer::connect(addr).await;
        alice.enter("alice", "Town").await;
        let mut bob = TestPeer::connect(addr).await;
        bob.enter("bob", "Caves").await;

        assert_eq!(ctx.worlds().get("Town").unwrap().player_count().unwrap(), 1);
        assert_eq!(ctx.worlds().get("Caves").unwrap().player_count().unwrap(), 1);

        // A few ticks' worth of traffic, none of it about the other world
        tokio::time::sleep(Duration::from_millis(200)).await;
        alice.send(&peer::Disconnect { reason: "bye".to_string() }).await;
        for message in alice.recv_to_close().await {
            assert!(
                !matches!(message, HostMessage::CreatePlayer(_)),
                "unexpected {:?}",
                message
            );
        }
    }
}

/// DISCONNECT TESTS
mod disconnect_tests {
    use super::*;

    /// Tests that a leaving player is removed exactly once
    #[tokio::test]
    async fn leaving_player_is_removed_once() {
        let (addr, ctx) = start_server(test_config()).await;

        let mut alice = TestPeer::connect(addr).await;
        let alice_id = alice.enter("alice", "Town").await;
        let mut bob = TestPeer::connect(addr).await;
        bob.enter("bob", "Town").await;
        assert_eq!(ctx.clients().len(), 2);

        alice
            .send(&peer::Disconnect {
                reason: "Client closed.".to_string(),
            })
            .await;
        alice.recv_to_close().await;

        bob.recv_until(|m| {
            matches!(m, HostMessage::RemovePlayer(r) if r.entity_id == alice_id)
        })
        .await;

        let town = ctx.worlds().get("Town").unwrap();
        wait_for(|| ctx.clients().len() == 1).await;
        assert!(!town.contains_player(alice_id).unwrap());

        // Let several ticks pass; no second removal may follow
        let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
        while tokio::time::Instant::now() < deadline {
            let next = timeout(Duration::from_millis(50), bob.recv()).await;
            if let Ok(Some(message)) = next {
                assert!(
                    !matches!(message, HostMessage::RemovePlayer(_)),
                    "duplicate removal"
                );
            }
        }
    }

    /// Tests that dropping the socket counts as leaving
    #[tokio::test]
    async fn dropped_socket_removes_player() {
        let (addr, ctx) = start_server(test_config()).await;

        let mut alice = TestPeer::connect(addr).await;
        let alice_id = alice.enter("alice", "Town").await;
        let mut bob = TestPeer::connect(addr).await;
        bob.enter("bob", "Town").await;

        drop(alice);

        bob.recv_until(|m| {
            matches!(m, HostMessage::RemovePlayer(r) if r.entity_id == alice_id)
        })
        .await;
        wait_for(|| ctx.clients().len() == 1).await;
    }

    /// Tests that a silent player is timed out
    #[tokio::test]
    async fn inactive_player_times_out() {
        let mut config = test_config();
        config.max_clients = 1;
        config.worlds[0].timeout_ms = 200;
        let (addr, ctx) = start_server(config).await;

        let mut idle = TestPeer::connect(addr).await;
        let idle_id = idle.enter("idle", "Town").await;

        let received = idle.recv_to_close().await;
        assert_eq!(
            received.last(),
            Some(&HostMessage::Disconnect(host::Disconnect::new(
                server::world::TIMED_OUT_REASON
            )))
        );

        // The silent peer keeps its socket open; its slot must still be freed
        let town = ctx.worlds().get("Town").unwrap();
        wait_for(|| !town.contains_player(idle_id).unwrap()).await;
        wait_for(|| ctx.clients().is_empty()).await;

        let mut next = TestPeer::connect(addr).await;
        next.authenticate().await;
        assert_eq!(ctx.clients().len(), 1);
        drop(idle);
    }

    /// Tests that a peer which never authenticates is dropped
    #[tokio::test]
    async fn silent_handshake_times_out() {
        let config = ServerConfig {
            max_clients: 1,
            handshake_timeout_ms: 200,
            ..test_config()
        };
        let (addr, ctx) = start_server(config).await;

        let mut silent = TestPeer::connect(addr).await;
        wait_for(|| ctx.clients().len() == 1).await;

        let received = silent.recv_to_close().await;
        assert_eq!(
            received,
            vec![HostMessage::Disconnect(host::Disconnect::new(
                server::world::TIMED_OUT_REASON
            ))]
        );
        wait_for(|| ctx.clients().is_empty()).await;

        let mut next = TestPeer::connect(addr).await;
        next.authenticate().await;
        drop(silent);
    }

    /// Tests that a joiner who never reports the world loaded is dropped
    #[tokio::test]
    async fn joined_but_unloaded_peer_times_out() {
        let config = ServerConfig {
            handshake_timeout_ms: 200,
            ..test_config()
        };
        let (addr, ctx) = start_server(config).await;

        let mut stuck = TestPeer::connect(addr).await;
        stuck.authenticate().await;
        stuck
            .send(&peer::JoinWorld {
                username: "stuck".to_string(),
                world_name: "Town".to_string(),
            })
            .await;
        let entity_id = match stuck.recv().await {
            Some(HostMessage::JoinWorldResult(host::JoinWorldResult::Accepted { entity_id })) => {
                entity_id
            }
            other => panic!("join was not accepted: {:?}", other),
        };

        let received = stuck.recv_to_close().await;
        assert_eq!(
            received.last(),
            Some(&HostMessage::Disconnect(host::Disconnect::new(
                server::world::TIMED_OUT_REASON
            )))
        );
        wait_for(|| ctx.clients().is_empty()).await;

        // The reservation went with the connection
        let town = ctx.worlds().get("Town").unwrap();
        assert!(!town.release_entity_id(entity_id).unwrap());
    }

    /// Tests that shutdown tells every client why
    #[tokio::test]
    async fn shutdown_disconnects_everyone() {
        let (addr, ctx) = start_server(test_config()).await;

        let mut alice = TestPeer::connect(addr).await;
        alice.enter("alice", "Town").await;
        let mut bob = TestPeer::connect(addr).await;
        bob.authenticate().await;
        wait_for(|| ctx.clients().len() == 2).await;

        ctx.shutdown();

        for client in [&mut alice, &mut bob] {
            let received = client.recv_to_close().await;
            assert_eq!(
                received.last(),
                Some(&HostMessage::Disconnect(host::Disconnect::new(
                    server::session::SHUTDOWN_REASON
                )))
            );
        }
        assert!(ctx.clients().is_empty());
    }
}

/// CLIENT END-TO-END TESTS
mod client_tests {
    use super::*;
    use client::body::{KinematicBodyFactory, LogRenderer};
    use client::network::{Client, ClientConfig};

    /// Tests that the real client completes the handshake and shows up for others
    #[tokio::test]
    async fn client_joins_and_is_seen() {
        let (addr, _ctx) = start_server(test_config()).await;

        let mut watcher = TestPeer::connect(addr).await;
        watcher.enter("watcher", "Town").await;

        let config = ClientConfig {
            server_addr: addr.to_string(),
            username: "ada".to_string(),
            world: "Town".to_string(),
            ..ClientConfig::default()
        };
        let client = Client::connect(&config, KinematicBodyFactory::default())
            .await
            .unwrap();
        let connection = client.connection();
        let running = tokio::spawn(async move {
            let mut renderer = LogRenderer::default();
            client.run(&mut renderer).await
        });

        match watcher
            .recv_until(|m| matches!(m, HostMessage::CreatePlayer(_)))
            .await
        {
            HostMessage::CreatePlayer(create) => assert_eq!(create.username, "ada"),
            _ => unreachable!(),
        }

        connection.disconnect_with(&peer::Disconnect {
            reason: "Client closed.".to_string(),
        });
        let reason = timeout(WAIT, running).await.unwrap().unwrap().unwrap();
        assert_eq!(reason, None);
    }

    /// Tests that the client reports the server's refusal
    #[tokio::test]
    async fn client_reports_denial() {
        let config = ServerConfig {
            game_version: "2.0".to_string(),
            ..test_config()
        };
        let (addr, _ctx) = start_server(config).await;

        let client_config = ClientConfig {
            server_addr: addr.to_string(),
            ..ClientConfig::default()
        };
        let client = Client::connect(&client_config, KinematicBodyFactory::default())
            .await
            .unwrap();
        let mut renderer = LogRenderer::default();
        let reason = timeout(WAIT, client.run(&mut renderer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason.as_deref(), Some(UNSUPPORTED_GAME_VERSION));
    }
}

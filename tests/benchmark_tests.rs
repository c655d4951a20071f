//! Performance benchmarks for the hot paths of world synchronization

use client::body::KinematicBodyFactory;
use client::game::ClientGameState;
use client::reconciliation::ReconcileConfig;
use server::config::WorldConfig;
use server::world::{Player, World};
use shared::{host, Connection, FrameDecoder, HostMessage, Message, Outbound};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Benchmarks encoding and decoding of the most frequent message
#[test]
fn benchmark_message_codec() {
    let message = host::PlayerPosition {
        entity_id: 483,
        rotation: 1.25,
        x: 104.5,
        y: -20.0,
    };

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut decoder = FrameDecoder::new(shared::DEFAULT_MAX_FRAME_LENGTH);
        decoder.extend_from_slice(&message.to_frame());
        let body = decoder.next_frame().unwrap().unwrap();
        let decoded = HostMessage::decode_frame(body).unwrap();
        assert!(matches!(decoded, HostMessage::PlayerPosition(_)));
    }

    let duration = start.elapsed();
    println!(
        "Message codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks splitting one large read into frames
#[test]
fn benchmark_frame_splitting() {
    let frames = 10_000;
    let frame = host::PlayerVelocity {
        entity_id: 7,
        velocity_x: 1.0,
        velocity_y: -1.0,
        rotation: 0.5,
    }
    .to_frame();

    let mut decoder = FrameDecoder::new(shared::DEFAULT_MAX_FRAME_LENGTH);
    for _ in 0..frames {
        decoder.extend_from_slice(&frame);
    }

    let start = Instant::now();
    let mut count = 0;
    while let Some(body) = decoder.next_frame().unwrap() {
        HostMessage::decode_frame(body).unwrap();
        count += 1;
    }

    let duration = start.elapsed();
    println!(
        "Frame splitting: {} frames in {:?} ({:.2} ns/frame)",
        count,
        duration,
        duration.as_nanos() as f64 / count as f64
    );

    assert_eq!(count, frames);
    assert_eq!(decoder.buffered(), 0);
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks world ticks with a full roster
#[test]
fn benchmark_world_tick() {
    let mut config = WorldConfig::new("Bench");
    config.capacity = 64;
    let world = World::new(&config);

    let mut outputs: Vec<mpsc::UnboundedReceiver<Outbound>> = Vec::new();
    for i in 0..config.capacity {
        let (connection, rx) = Connection::channel(i as u64, None);
        let id = world.assign_entity_id().unwrap();
        let player = Arc::new(Player::new(
            id,
            format!("player{}", i),
            world.name(),
            Arc::new(connection),
        ));
        player.set_position(i as f32, 0.0, 0.0);
        world.spawn_player_in_world(player, 0.0, 0.0).unwrap();
        outputs.push(rx);
    }

    let ticks = 50;
    let start = Instant::now();
    let mut flushed = 0;

    for _ in 0..ticks {
        let now = std::time::Instant::now();
        for player in world.players().unwrap() {
            player.connection().touch_at(now);
        }
        let summary = world.tick(now).unwrap();
        flushed += summary.flushed_bytes;
        for rx in outputs.iter_mut() {
            while rx.try_recv().is_ok() {}
        }
    }

    let duration = start.elapsed();
    println!(
        "World tick: {} players × {} ticks in {:?} ({:.2} μs/tick, {} bytes flushed)",
        config.capacity,
        ticks,
        duration,
        duration.as_micros() as f64 / ticks as f64,
        flushed
    );

    assert_eq!(world.player_count().unwrap(), config.capacity);
    assert!(flushed > 0);
    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks client-side reconciliation of many remote players
#[test]
fn benchmark_client_reconciliation() {
    let mut game = ClientGameState::new(KinematicBodyFactory::default(), ReconcileConfig::default());
    for entity_id in 0..100 {
        game.spawn_remote(host::CreatePlayer {
            username: format!("player{}", entity_id),
            entity_id,
            x: 0.0,
            y: 0.0,
        });
    }

    let frames = 1000;
    let dt = 1.0 / 60.0;
    let start = Instant::now();

    for frame in 0..frames {
        if frame % 10 == 0 {
            for entity_id in 0..100 {
                game.apply_position(host::PlayerPosition {
                    entity_id,
                    rotation: 0.0,
                    x: frame as f32,
                    y: entity_id as f32,
                });
            }
        }
        game.update(dt);
    }

    let duration = start.elapsed();
    println!(
        "Client reconciliation: 100 remotes × {} frames in {:?} ({:.2} μs/frame)",
        frames,
        duration,
        duration.as_micros() as f64 / frames as f64
    );

    assert_eq!(game.remote_count(), 100);
    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

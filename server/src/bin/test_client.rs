//! Raw protocol probe: authenticates, joins a world, wanders for a while and
//! prints every message the server sends back.

use clap::Parser;
use shared::{
    peer, FrameDecoder, HostMessage, Message, DEFAULT_GAME_VERSION, DEFAULT_MAX_FRAME_LENGTH,
    PROTOCOL_VERSION,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{interval, timeout};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,
    /// World to join
    #[clap(short, long, default_value = "Town")]
    world: String,
    /// Name to join under
    #[clap(short, long, default_value = "probe")]
    username: String,
    /// Game version to present
    #[clap(long, default_value = DEFAULT_GAME_VERSION)]
    game_version: String,
    /// Seconds to stay connected
    #[clap(short, long, default_value = "5")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let mut stream = TcpStream::connect(&args.server).await?;
    stream.set_nodelay(true)?;

    stream
        .write_all(
            &peer::Authenticate {
                game_version: args.game_version.clone(),
                protocol_version: PROTOCOL_VERSION,
            }
            .to_frame(),
        )
        .await?;

    let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_LENGTH);
    let mut ticker = interval(Duration::from_millis(100));
    let mut step = 0u32;
    let mut in_world = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.duration);

    while tokio::time::Instant::now() < deadline {
        tokio::select! {
            read = stream.read_buf(decoder.buffer_mut()) => {
                if read? == 0 {
                    println!("Server closed the connection");
                    return Ok(());
                }
                while let Some(body) = decoder.next_frame()? {
                    let message = HostMessage::decode_frame(body)?;
                    println!("<- {:?}", message);
                    match message {
                        HostMessage::AuthenticationResult(result) if result.is_allowed() => {
                            stream.write_all(&peer::JoinWorld {
                                world_name: args.world.clone(),
                                username: args.username.clone(),
                            }.to_frame()).await?;
                        }
                        HostMessage::JoinWorldResult(shared::host::JoinWorldResult::Accepted { .. }) => {
                            stream.write_all(&peer::WorldLoaded.to_frame()).await?;
                            in_world = true;
                        }
                        HostMessage::Disconnect(_) => return Ok(()),
                        _ => {}
                    }
                }
            }
            _ = ticker.tick() => {
                if in_world {
                    step += 1;
                    let angle = step as f32 * 0.1;
                    let mut batch = peer::PlayerPosition {
                        rotation: angle,
                        x: 10.0 * angle.cos(),
                        y: 10.0 * angle.sin(),
                    }
                    .to_frame()
                    .to_vec();
                    batch.extend_from_slice(&peer::PlayerVelocity {
                        velocity_x: -angle.sin(),
                        velocity_y: angle.cos(),
                        rotation: angle,
                    }
                    .to_frame());
                    stream.write_all(&batch).await?;
                }
            }
        }
    }

    println!("Leaving after {} updates", step);
    stream
        .write_all(&peer::Disconnect::default().to_frame())
        .await?;
    let _ = timeout(Duration::from_millis(200), stream.shutdown()).await;
    Ok(())
}

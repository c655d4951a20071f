use clap::Parser;
use client::body::{KinematicBodyFactory, LogRenderer};
use client::network::{Client, ClientConfig};
use client::reconciliation::ReconcileConfig;
use log::info;
use shared::peer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Name shown to other players
    #[arg(short = 'u', long, default_value = "player")]
    username: String,

    /// World to join
    #[arg(short = 'w', long, default_value = "Town")]
    world: String,

    /// Game version to present to the server
    #[arg(long, default_value = shared::DEFAULT_GAME_VERSION)]
    game_version: String,

    /// Offset from the server position that triggers a correction
    #[arg(short = 'd', long, default_value = "3.0")]
    desync_distance: f32,

    /// Teleport on desync instead of interpolating
    #[arg(long)]
    snap: bool,

    /// Share of the remaining offset applied as velocity per update
    #[arg(long, default_value = "0.5")]
    interpolation_factor: f32,

    /// Updates per second
    #[arg(short = 'r', long, default_value = "30")]
    update_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ClientConfig {
        server_addr: args.server,
        username: args.username,
        world: args.world,
        game_version: args.game_version,
        reconcile: ReconcileConfig {
            desync_distance: args.desync_distance,
            snap: args.snap,
            interpolation_factor: args.interpolation_factor,
            ..ReconcileConfig::default()
        },
        update_rate: args.update_rate,
        ..ClientConfig::default()
    };

    info!("Starting client...");
    let client = Client::connect(&config, KinematicBodyFactory::default()).await?;
    let connection = client.connection();
    let mut renderer = LogRenderer::default();

    let run = client.run(&mut renderer);
    tokio::pin!(run);

    let reason = tokio::select! {
        result = &mut run => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, leaving...");
            connection.disconnect_with(&peer::Disconnect {
                reason: "Client closed.".to_string(),
            });
            run.await?
        }
    };

    match reason {
        Some(reason) => info!("Disconnected by server: {}", reason),
        None => info!("Disconnected"),
    }
    Ok(())
}

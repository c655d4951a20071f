use clap::Parser;
use log::{error, info};
use server::config::{self, ServerConfig, WorldConfig, DEFAULT_WORLD_NAME};
use server::network::Server;
use server::scheduler::TickScheduler;
use server::session::ServerContext;
use server::world::WorldRegistry;
use std::path::PathBuf;
use std::sync::Arc;

/// Command line arguments for the world server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// World ticks per second
    #[clap(short, long, default_value = "20")]
    tick_rate: u32,
    /// Maximum number of concurrent connections
    #[clap(short, long, default_value = "64")]
    max_clients: usize,
    /// Game version peers must present
    #[clap(long, default_value = shared::DEFAULT_GAME_VERSION)]
    game_version: String,
    /// Largest accepted frame in bytes
    #[clap(long, default_value_t = shared::DEFAULT_MAX_FRAME_LENGTH)]
    max_frame_length: usize,
    /// Milliseconds a connection may stay silent before entering a world
    #[clap(long, default_value = "10000")]
    handshake_timeout_ms: u64,
    /// JSON file listing the hosted worlds
    #[clap(short, long)]
    worlds: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, config::ConfigError> {
        let worlds = match &self.worlds {
            Some(path) => config::load_worlds(path)?,
            None => vec![WorldConfig::new(DEFAULT_WORLD_NAME)],
        };
        let config = ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            tick_rate: self.tick_rate,
            max_clients: self.max_clients,
            game_version: self.game_version,
            max_frame_length: self.max_frame_length,
            handshake_timeout_ms: self.handshake_timeout_ms,
            worlds,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Args::parse().into_config()?;
    info!(
        "Starting world server: {} worlds, {} Hz, up to {} clients",
        config.worlds.len(),
        config.tick_rate,
        config.max_clients
    );

    let worlds = Arc::new(WorldRegistry::from_configs(&config.worlds)?);
    let scheduler = TickScheduler::new(Arc::clone(&worlds), config.tick_interval());
    let ctx = ServerContext::new(config.clone(), worlds, scheduler.deferred());
    let server = Server::bind(&config.bind_addr, Arc::clone(&ctx)).await?;

    let server_handle = tokio::spawn(server.run());
    let scheduler_handle = tokio::spawn(scheduler.run());

    // Handle shutdown gracefully
    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("Network task failed: {}", e),
                Err(e) => error!("Network task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = scheduler_handle => {
            match result {
                Ok(Err(e)) => error!("Tick scheduler stopped: {}", e),
                Err(e) => error!("Tick scheduler panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    ctx.shutdown();
    Ok(())
}

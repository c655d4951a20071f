//! Server network layer: TCP accept loop and per-connection tasks

use crate::session::{PeerSession, ServerContext, PROTOCOL_ERROR_REASON};
use log::{debug, error, info, warn};
use shared::{read_frames, write_outbound, Connection, FrameDecoder, TransportError};
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, MissedTickBehavior};

/// Shortest pause between two sweeps for stalled handshakes
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);

/// Listens for peers and runs one reader and one writer task per connection
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Server {
    pub async fn bind(addr: &str, ctx: Arc<ServerContext>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Accepts connections until the listener fails
    ///
    /// Also sweeps the pool for connections that stalled before reaching a
    /// world roster.
    pub async fn run(self) -> std::io::Result<()> {
        let sweeper = tokio::spawn(sweep_stalled(Arc::clone(&self.ctx)));
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    sweeper.abort();
                    return Err(e);
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }

            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                serve_connection(ctx, stream, addr).await;
            });
        }
    }
}

/// Drives one peer from accept to teardown
async fn serve_connection(ctx: Arc<ServerContext>, stream: TcpStream, addr: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let (connection, outbound) = Connection::channel(ctx.clients().next_client_id(), Some(addr));
    let connection = Arc::new(connection);
    let id = connection.id();

    let writer = tokio::spawn(async move {
        if let Err(e) = write_outbound(write_half, outbound).await {
            debug!("Writer for client {} stopped: {}", id, e);
        }
    });

    if !ctx.accept(&connection) {
        let _ = writer.await;
        return;
    }

    let mut session = PeerSession::new(Arc::clone(&ctx), Arc::clone(&connection));
    let mut decoder = FrameDecoder::new(ctx.config().max_frame_length);

    // A kick from another task (tick timeout, sweep, shutdown) closes the
    // connection without any frame arriving, so wait for that as well
    let result = tokio::select! {
        result = read_frames(read_half, &mut decoder, |body| {
            session.handle_frame(body);
            if connection.is_closed() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }) => result,
        _ = connection.closed() => Ok(()),
    };

    match result {
        Ok(()) => {
            ctx.disconnect(&connection, None);
        }
        Err(TransportError::Codec(e)) => {
            warn!("Client {} sent an unreadable frame: {}", id, e);
            ctx.disconnect(&connection, Some(PROTOCOL_ERROR_REASON));
        }
        Err(TransportError::Io(e)) => {
            debug!("Client {} socket error: {}", id, e);
            ctx.disconnect(&connection, None);
        }
    }

    let _ = writer.await;
    debug!("Client {} tasks finished", id);
}

/// Periodically drops connections that went quiet outside a world roster
async fn sweep_stalled(ctx: Arc<ServerContext>) {
    let period = (ctx.config().handshake_timeout() / 4).max(MIN_SWEEP_PERIOD);
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        timer.tick().await;
        let kicked = ctx.sweep_stalled(Instant::now());
        if kicked > 0 {
            debug!("Dropped {} stalled connections", kicked);
        }
    }
}

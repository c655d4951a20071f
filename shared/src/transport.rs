//! Socket plumbing shared by host and peer
//!
//! Each connection runs one reader loop and one writer task. The writer owns
//! the write half and drains [`Outbound`] items in order; the reader splits the
//! byte stream into frame bodies with a [`FrameDecoder`].

use std::ops::ControlFlow;

use bytes::Bytes;
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::codec::FrameDecoder;
use crate::connection::Outbound;
use crate::error::TransportError;

/// Writes outbound frames until the channel closes or a `Close` arrives
pub async fn write_outbound<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frames(bytes) => {
                writer.write_all(&bytes).await?;
                writer.flush().await?;
            }
            Outbound::Close => break,
        }
    }
    debug!("Writer finished, shutting down write half");
    writer.shutdown().await
}

/// Feeds complete frame bodies to `on_frame` until EOF or `Break`
pub async fn read_frames<R, F>(
    mut reader: R,
    decoder: &mut FrameDecoder,
    mut on_frame: F,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    F: FnMut(Bytes) -> ControlFlow<()>,
{
    loop {
        while let Some(body) = decoder.next_frame()? {
            if on_frame(body).is_break() {
                return Ok(());
            }
        }

        if reader.read_buf(decoder.buffer_mut()).await? == 0 {
            if decoder.buffered() > 0 {
                debug!("Peer closed with {} bytes of a partial frame", decoder.buffered());
            }
            return Ok(());
        }
    }
}

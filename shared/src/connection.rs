//! Per-peer connection state
//!
//! A [`Connection`] is shared between the task reading the peer's socket and
//! whoever produces output for it (the tick scheduler on the host, the update
//! loop on the peer). Writes never touch the socket directly: frames go over an
//! unbounded channel to a single writer task, so two producers can never
//! interleave bytes on the wire.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use log::debug;
use tokio::sync::{mpsc, watch};

use crate::messages::Message;
use crate::EntityId;

pub type ConnectionId = u64;

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Channel not yet established
    Connecting,
    /// Handshake sent, waiting for the host's verdict
    Authenticating,
    /// Authenticated, not in a world
    Idle,
    /// Bound to a player in a world
    InWorld,
    /// Terminal
    Disconnected,
}

/// Work items for the connection's writer task
#[derive(Debug)]
pub enum Outbound {
    /// One or more complete frames, written with a single write and flush
    Frames(Bytes),
    /// Shut the write half down and stop
    Close,
}

/// The world and entity a connection's player lives under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub world: String,
    pub entity_id: EntityId,
}

pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Mutex<ConnectionState>,
    pending: Mutex<BytesMut>,
    last_message_received_at: Mutex<Instant>,
    binding: Mutex<Option<Binding>>,
    closed: AtomicBool,
    closed_signal: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            outbound,
            state: Mutex::new(ConnectionState::Connecting),
            pending: Mutex::new(BytesMut::new()),
            last_message_received_at: Mutex::new(Instant::now()),
            binding: Mutex::new(None),
            closed: AtomicBool::new(false),
            closed_signal: watch::channel(false).0,
        }
    }

    /// Creates a connection together with the receiving end of its output
    pub fn channel(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, peer_addr, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Moves to `next`; a disconnected connection stays disconnected
    pub fn set_state(&self, next: ConnectionState) -> bool {
        let mut state = lock(&self.state);
        if *state == ConnectionState::Disconnected {
            return false;
        }
        debug!("Connection {}: {:?} -> {:?}", self.id, *state, next);
        *state = next;
        true
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Idle | ConnectionState::InWorld
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Records inbound traffic; any message type counts
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&self, at: Instant) {
        *lock(&self.last_message_received_at) = at;
    }

    pub fn last_message_received_at(&self) -> Instant {
        *lock(&self.last_message_received_at)
    }

    /// Binds a player; fails if one is already bound
    pub fn bind(&self, binding: Binding) -> bool {
        let mut current = lock(&self.binding);
        if current.is_some() {
            return false;
        }
        *current = Some(binding);
        true
    }

    pub fn binding(&self) -> Option<Binding> {
        lock(&self.binding).clone()
    }

    pub fn unbind(&self) -> Option<Binding> {
        lock(&self.binding).take()
    }

    /// Hands the message to the writer now, bypassing the tick batch
    pub fn send_immediately<M: Message>(&self, message: &M) -> bool {
        self.send_frame(message.to_frame())
    }

    pub fn send_frame(&self, frame: Bytes) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.send(Outbound::Frames(frame)).is_ok()
    }

    /// Appends the message to the batch written on the next [`flush`](Self::flush)
    pub fn queue<M: Message>(&self, message: &M) {
        self.queue_frame(&message.to_frame());
    }

    pub fn queue_frame(&self, frame: &Bytes) {
        if self.is_closed() {
            return;
        }
        lock(&self.pending).extend_from_slice(frame);
    }

    /// Bytes waiting for the next flush
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Writes every queued frame as one batch; returns the number of bytes
    pub fn flush(&self) -> usize {
        let batch = {
            let mut pending = lock(&self.pending);
            if pending.is_empty() {
                return 0;
            }
            pending.split().freeze()
        };
        let len = batch.len();
        if self.send_frame(batch) {
            len
        } else {
            0
        }
    }

    /// Closes the channel; only the first call has any effect
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *lock(&self.state) = ConnectionState::Disconnected;
        lock(&self.pending).clear();
        let _ = self.outbound.send(Outbound::Close);
        self.closed_signal.send_replace(true);
        true
    }

    /// Resolves once the connection has been closed, by this or any other task
    pub async fn closed(&self) {
        let mut signal = self.closed_signal.subscribe();
        loop {
            if *signal.borrow_and_update() {
                return;
            }
            if signal.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sends `farewell` immediately, then closes
    pub fn disconnect_with<M: Message>(&self, farewell: &M) -> bool {
        if self.is_closed() {
            return false;
        }
        self.send_immediately(farewell);
        self.close()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

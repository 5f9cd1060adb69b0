//! Live connection state shared between the hub and the socket tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use huddle_core::{ConnectionId, Participant, SessionCode};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a connection. Moves strictly forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Authorized and upgraded, not yet admitted by the hub.
    Pending = 0,
    /// Admitted; receives session traffic.
    Registered = 1,
    /// Removed from the hub; socket tasks are winding down.
    Closing = 2,
    /// Socket tasks finished.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Registered,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Result of queueing a frame for a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Frame is in the outbound queue.
    Queued,
    /// Queue at capacity; the frame was dropped.
    Full,
    /// Queue already closed; the frame was dropped.
    Closed,
}

/// One participant's live duplex channel.
pub struct ClientConnection {
    /// Hub-assigned identity.
    pub id: ConnectionId,
    /// Session the connection was authorized against.
    pub code: SessionCode,
    /// Who is on the other end.
    pub participant: Participant,
    /// Sender half of the outbound queue. Taken when the hub drops the
    /// connection so the write loop drains and stops.
    tx: Mutex<Option<mpsc::Sender<Arc<String>>>>,
    state: AtomicU8,
    /// Cancelled when either side of the socket should stop.
    cancel: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Frames dropped because the queue was full or closed.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a pending connection.
    pub fn new(
        code: SessionCode,
        participant: Participant,
        tx: mpsc::Sender<Arc<String>>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            code,
            participant,
            tx: Mutex::new(Some(tx)),
            state: AtomicU8::new(ConnectionState::Pending as u8),
            cancel,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame without waiting.
    pub fn try_send(&self, frame: Arc<String>) -> Delivery {
        let outcome = match self.tx.lock().as_ref() {
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => Delivery::Queued,
                Err(TrySendError::Full(_)) => Delivery::Full,
                Err(TrySendError::Closed(_)) => Delivery::Closed,
            },
            None => Delivery::Closed,
        };
        if outcome != Delivery::Queued {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Drop the outbound sender. Idempotent.
    pub fn close_queue(&self) {
        let _ = self.tx.lock().take();
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Pending -> Registered`. Fails from any other state.
    pub fn mark_registered(&self) -> bool {
        self.transition(ConnectionState::Pending, ConnectionState::Registered)
    }

    /// `Pending | Registered -> Closing`. Returns `false` if already closing.
    pub fn begin_close(&self) -> bool {
        self.transition(ConnectionState::Registered, ConnectionState::Closing)
            || self.transition(ConnectionState::Pending, ConnectionState::Closing)
    }

    /// Final state once the socket tasks have stopped.
    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Ask both socket tasks to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token the socket tasks watch.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

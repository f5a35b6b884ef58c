//! Per-connection session state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use roster_core::ids::{BotId, ConnectionId};
use roster_core::protocol::ServerFrame;
use tokio::sync::mpsc;

/// Result of one outbound send attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame was handed to the connection's writer.
    Delivered,
    /// The connection is closed; do not retry against this connection.
    Closed,
    /// The send queue is full; the frame may be retried later.
    Busy,
}

/// One open gateway connection.
///
/// Constructed when a socket upgrades; authorized subjects are written
/// exactly once when the handshake completes and never change afterward.
pub struct ClientConnection {
    /// Unique connection id (registration-ordered).
    pub id: ConnectionId,
    /// Send channel into the connection's WebSocket writer task.
    tx: mpsc::Sender<Arc<String>>,
    /// Subjects this connection is authorized for. Empty until authorized.
    subjects: Mutex<Vec<roster_directory::BotSubject>>,
    /// Set once the socket is gone or closing; post-close sends are no-ops.
    closed: AtomicBool,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded since the last ping.
    pub is_alive: AtomicBool,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Frames dropped due to a full send queue.
    pub dropped_frames: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection around a writer channel.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            subjects: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Record the authorized subject set. Called once at handshake completion.
    pub fn authorize(&self, subjects: Vec<roster_directory::BotSubject>) {
        let mut guard = self.subjects.lock();
        debug_assert!(guard.is_empty(), "connection authorized twice");
        *guard = subjects;
    }

    /// Whether the handshake has completed with at least one subject.
    pub fn is_authorized(&self) -> bool {
        !self.subjects.lock().is_empty()
    }

    /// The authorized subject records.
    pub fn subjects(&self) -> Vec<roster_directory::BotSubject> {
        self.subjects.lock().clone()
    }

    /// Just the authorized bot ids, for event-log scans.
    pub fn subject_ids(&self) -> Vec<BotId> {
        self.subjects.lock().iter().map(|s| s.bot_id).collect()
    }

    /// Attempt to enqueue a text frame for the writer task.
    pub fn send(&self, message: Arc<String>) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Closed;
        }
        match self.tx.try_send(message) {
            Ok(()) => SendOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Busy
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let _ = self.closed.swap(true, Ordering::AcqRel);
                SendOutcome::Closed
            }
        }
    }

    /// Serialize and send a protocol frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> SendOutcome {
        self.send(Arc::new(frame.to_json()))
    }

    /// Frames dropped so far on a full queue.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Mark the connection closed.
    ///
    /// Returns `true` only for the first call, so close-side effects (the
    /// close frame, the close code) happen exactly once.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the connection as alive (pong or inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the ping cycle.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }
}

//! Per-connection state shared between a session and the registry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use admincraft_core::Identity;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Lifecycle of a session.
///
/// `Connecting` covers the upgrade request up to token verification. A
/// connection object only exists from `Authenticated` onwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade accepted, token not yet verified.
    Connecting,
    /// Token verified; streamer not yet attached.
    Authenticated,
    /// Steady state: output flows out, commands flow in.
    Streaming,
    /// Teardown in progress.
    Closing,
    /// All resources released.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// An authenticated WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: String,
    identity: Identity,
    state: Mutex<SessionState>,
    /// Outbound queue drained by the socket writer.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection in the `Authenticated` state.
    pub fn new(id: String, identity: Identity, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            identity,
            state: Mutex::new(SessionState::Authenticated),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Who this connection belongs to.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to a new lifecycle state.
    pub fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Whether broadcasts should reach this connection.
    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Queue a text frame for the client.
    ///
    /// Never blocks. Returns `false` and counts a drop if the queue is full
    /// or the writer is gone.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Wait for room in the outbound queue.
    ///
    /// Used for tail output, which is throttled rather than dropped. `None`
    /// once the writer is gone.
    pub async fn reserve(&self) -> Option<mpsc::Permit<'_, Arc<String>>> {
        self.tx.reserve().await.ok()
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (pong or any other frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag. `true` if the client was heard from
    /// since the previous check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the client was last heard from.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("user_id", &self.identity.user_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

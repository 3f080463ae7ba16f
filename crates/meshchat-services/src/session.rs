//! Session management — one handle per TCP connection.
//!
//! A `SessionHandle` is the shareable half of a session: it owns the write side
//! of the socket behind a per-session lock, the lifecycle state, and the
//! session's cancellation token. The read side is owned by the session's read
//! loop task (see `node.rs`), which is the only place frames are received.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use meshchat_core::{write_frame, Message, PeerId};

use crate::error::ProtocolError;

/// Process-local session identifier. Never reused.
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Write half of a session's byte stream.
pub type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Who opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by our listener.
    Inbound,
    /// Dialled by us.
    Outbound,
}

/// Session lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Outbound only: socket exists, JOIN not sent yet.
    Connecting = 0,
    /// Waiting for JOIN / ACK_JOIN to name the remote peer.
    Handshaking = 1,
    /// Remote peer known; any message type is dispatched.
    Active = 2,
    /// LEAVE received, error hit, or stop requested.
    Closing = 3,
    /// Socket shut down, read loop gone.
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Handshaking,
            2 => SessionState::Active,
            3 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

struct SessionShared {
    id: SessionId,
    direction: Direction,
    remote_addr: String,
    state: AtomicU8,
    peer: OnceLock<PeerId>,
    name: OnceLock<String>,
    writer: Mutex<FrameWriter>,
    cancel: CancellationToken,
}

/// Cheap, cloneable reference to a live session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl SessionHandle {
    /// Wrap the write half of a fresh connection.
    ///
    /// Outbound sessions start in `Connecting`, inbound ones in `Handshaking`.
    /// `cancel` is normally a child of the node's shutdown token.
    pub fn new(
        direction: Direction,
        remote_addr: impl Into<String>,
        writer: FrameWriter,
        cancel: CancellationToken,
    ) -> Self {
        let initial = match direction {
            Direction::Outbound => SessionState::Connecting,
            Direction::Inbound => SessionState::Handshaking,
        };
        Self {
            inner: Arc::new(SessionShared {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                direction,
                remote_addr: remote_addr.into(),
                state: AtomicU8::new(initial as u8),
                peer: OnceLock::new(),
                name: OnceLock::new(),
                writer: Mutex::new(writer),
                cancel,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn remote_addr(&self) -> &str {
        &self.inner.remote_addr
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Move to `next` if that is forward of the current state.
    /// Returns the state actually in effect afterwards.
    pub(crate) fn advance(&self, next: SessionState) -> SessionState {
        let prev = self.inner.state.fetch_max(next as u8, Ordering::AcqRel);
        SessionState::from_u8(prev.max(next as u8))
    }

    /// Still usable for sending?
    pub fn is_open(&self) -> bool {
        self.state() < SessionState::Closing
    }

    /// Remote peer id, once the handshake (or the dial that created this
    /// session) has named it.
    pub fn peer_id(&self) -> Option<&PeerId> {
        self.inner.peer.get()
    }

    /// Bind the remote peer id. A session is bound at most once; rebinding to
    /// the same id is a no-op, rebinding to a different one returns the id
    /// already bound.
    pub fn bind_peer(&self, id: PeerId) -> Result<(), PeerId> {
        let bound = self.inner.peer.get_or_init(|| id.clone());
        if *bound == id {
            Ok(())
        } else {
            Err(bound.clone())
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.get().map(String::as_str)
    }

    /// Record the remote display name; first writer wins.
    pub fn set_name(&self, name: &str) {
        let _ = self.inner.name.set(name.to_string());
    }

    /// Best human-readable label for status lines.
    pub fn label(&self) -> String {
        if let Some(name) = self.name() {
            return name.to_string();
        }
        match self.peer_id() {
            Some(id) => id.short(),
            None => self.inner.remote_addr.clone(),
        }
    }

    /// Encode and write one message.
    ///
    /// Writes to one socket are serialized by the session's writer lock, so the
    /// read loop and a broadcast can target the same session safely. A failed
    /// write moves the session to `Closing`.
    pub async fn send(&self, message: &Message) -> Result<(), ProtocolError> {
        if !self.is_open() {
            return Err(ProtocolError::ConnectionBroken("session is closing".into()));
        }
        let frame = message.encode();
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = write_frame(&mut *writer, &frame).await {
            drop(writer);
            self.close();
            return Err(e.into());
        }
        tracing::trace!(
            session = self.id(),
            kind = ?message.message_type(),
            bytes = frame.len(),
            "frame sent"
        );
        Ok(())
    }

    /// Ask the session to stop. Its read loop observes the token and exits.
    pub fn close(&self) {
        self.advance(SessionState::Closing);
        self.inner.cancel.cancel();
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Shut the write side down and mark the session closed.
    pub(crate) async fn shutdown_writer(&self) {
        self.advance(SessionState::Closing);
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::trace!(session = self.id(), error = %e, "socket shutdown failed");
        }
        drop(writer);
        self.advance(SessionState::Closed);
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for SessionHandle {}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id())
            .field("direction", &self.direction())
            .field("remote_addr", &self.remote_addr())
            .field("state", &self.state())
            .field("peer", &self.peer_id())
            .finish()
    }
}

/// Every open session, handshaking or active, shared across all tasks.
pub type SessionTable = Arc<DashMap<SessionId, SessionHandle>>;

/// Create a new empty session table.
pub fn new_session_table() -> SessionTable {
    Arc::new(DashMap::new())
}

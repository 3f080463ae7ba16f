//! The node — owns the registry, the session table and the shutdown
//! coordinator, and drives every session's read loop.
//!
//! Message semantics live in `membership.rs`; this file is the plumbing around
//! them: accepting and dialling sockets, turning them into sessions, reading
//! frames, and tearing sessions down.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use meshchat_core::config::MeshConfig;
use meshchat_core::{read_frame, Message, PeerId, PeerInfo};

use crate::error::ProtocolError;
use crate::events::{EventSender, NodeEvent};
use crate::registry::{PeerEntry, PeerRegistry};
use crate::session::{
    new_session_table, Direction, FrameWriter, SessionHandle, SessionState, SessionTable,
};
use crate::shutdown::ShutdownCoordinator;

/// Tunables the node needs at runtime.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub max_frame_len: usize,
    pub connect_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self::from_config(&MeshConfig::default())
    }
}

impl NodeSettings {
    pub fn from_config(config: &MeshConfig) -> Self {
        Self {
            max_frame_len: config.limits.max_frame_len,
            connect_timeout: config.network.connect_timeout(),
            shutdown_grace: config.shutdown.grace(),
        }
    }
}

/// Why a read loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ending {
    /// Token cancelled: node stopping, or the session was closed from outside.
    Stopped,
    /// Remote sent LEAVE; its record is already gone.
    Left,
    /// Lost the duplicate-session tie-break.
    Duplicate,
    /// Remote turned out to be this node.
    SelfConnection,
}

/// What the read loop does after a message is handled.
#[derive(Debug)]
pub(crate) enum Flow {
    Continue,
    Close(Ending),
}

struct NodeInner {
    registry: PeerRegistry,
    sessions: SessionTable,
    shutdown: ShutdownCoordinator,
    events: EventSender,
    settings: NodeSettings,
}

/// A running overlay participant. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node announcing itself as `local`. Nothing runs until `serve`
    /// or `connect` is called.
    pub fn new(local: PeerInfo, settings: NodeSettings, events: EventSender) -> Self {
        let shutdown = ShutdownCoordinator::new(settings.shutdown_grace);
        Self {
            inner: Arc::new(NodeInner {
                registry: PeerRegistry::new(local),
                sessions: new_session_table(),
                shutdown,
                events,
                settings,
            }),
        }
    }

    pub fn local(&self) -> &PeerInfo {
        self.inner.registry.local()
    }

    pub fn local_id(&self) -> &PeerId {
        self.inner.registry.local_id()
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.inner.registry
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.inner.sessions
    }

    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.inner.shutdown
    }

    pub(crate) fn emit(&self, event: NodeEvent) {
        let _ = self.inner.events.send(event);
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Start accepting inbound connections on `listener`.
    pub fn serve(&self, listener: TcpListener) -> JoinHandle<()> {
        let node = self.clone();
        self.inner.shutdown.spawn(node.accept_loop(listener))
    }

    /// `connect host:port`: dial, announce ourselves, and push our membership.
    ///
    /// The remote's id arrives later in ACK_JOIN.
    pub async fn connect(&self, addr: &str) -> Result<SessionHandle, ProtocolError> {
        let stream = self.dial(addr).await?;
        let session = self.adopt(stream, Direction::Outbound);
        session.send(&Message::Join(self.local().clone())).await?;
        session.advance(SessionState::Handshaking);
        let known = self.inner.registry.peer_infos().await;
        session.send(&Message::PeerList(known)).await?;
        tracing::info!(addr, session = session.id(), "dialled peer, JOIN sent");
        Ok(session)
    }

    /// `say text`: one CHAT frame to every peer with an open session.
    /// Returns how many peers it was written to.
    pub async fn say(&self, text: &str) -> usize {
        let targets = self.inner.registry.live_sessions().await;
        let message = Message::Chat {
            text: text.to_string(),
        };
        let mut delivered = 0;
        for (id, session) in targets {
            match session.send(&message).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(peer = %id, error = %e, "chat send failed"),
            }
        }
        tracing::debug!(delivered, "chat broadcast");
        delivered
    }

    /// `peers`: every known record, local node first.
    pub async fn peers(&self) -> Vec<PeerEntry> {
        self.inner.registry.snapshot().await
    }

    /// `exit`: LEAVE to every open session, close them, stop the listener,
    /// and wait for all tasks. The whole sequence shares one grace period, so
    /// a peer that stopped reading cannot hold it up. Returns false if the
    /// grace period expired first.
    pub async fn exit(&self) -> bool {
        let deadline = Instant::now() + self.inner.shutdown.grace();
        if !self.inner.shutdown.is_stopping() {
            let open: Vec<SessionHandle> = self
                .inner
                .sessions
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            tracing::info!(sessions = open.len(), "leaving the mesh");

            let mut leaving = JoinSet::new();
            for session in open.iter().cloned() {
                leaving.spawn(async move {
                    if let Err(e) = session.send(&Message::Leave).await {
                        tracing::debug!(session = session.id(), error = %e, "LEAVE not delivered");
                    }
                });
            }
            let sent = tokio::time::timeout_at(deadline, async {
                while leaving.join_next().await.is_some() {}
            })
            .await;
            if sent.is_err() {
                tracing::warn!(pending = leaving.len(), "grace expired before every LEAVE was written");
                leaving.abort_all();
            }

            for session in &open {
                session.close();
            }
            self.inner.shutdown.trigger();
        }

        let clean = self.inner.shutdown.wait_until(deadline).await;
        if clean {
            tracing::info!("node stopped");
        } else {
            tracing::warn!(
                remaining = self.inner.shutdown.tasks(),
                "shutdown grace expired with tasks still running"
            );
        }
        clean
    }

    // ── Sockets ───────────────────────────────────────────────────────────────

    async fn accept_loop(self, listener: TcpListener) {
        let token = self.inner.shutdown.token().clone();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "listening for peers");
            self.emit(NodeEvent::Listening {
                addr: addr.to_string(),
            });
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("listener shutting down");
                    return;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!(%addr, "accepted connection");
                            self.adopt(stream, Direction::Inbound);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
    }

    /// Open an outbound TCP connection, bounded by the connect timeout.
    pub(crate) async fn dial(&self, addr: &str) -> Result<TcpStream, ProtocolError> {
        let timeout = self.inner.settings.connect_timeout;
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ProtocolError::Connect {
                addr: addr.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ProtocolError::Connect {
                addr: addr.to_string(),
                reason: format!("timed out after {timeout:?}"),
            }),
        }
    }

    /// Wrap a connected TCP stream in a session and start its read loop.
    pub fn adopt(&self, stream: TcpStream, direction: Direction) -> SessionHandle {
        let remote = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(error = %e, "TCP_NODELAY not set");
        }
        let (reader, writer) = stream.into_split();
        self.adopt_io(reader, Box::new(writer), remote, direction)
    }

    /// Wrap any byte stream halves in a session and start its read loop.
    pub fn adopt_io<R>(
        &self,
        reader: R,
        writer: FrameWriter,
        remote_addr: String,
        direction: Direction,
    ) -> SessionHandle
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let session = SessionHandle::new(
            direction,
            remote_addr,
            writer,
            self.inner.shutdown.child_token(),
        );
        self.inner.sessions.insert(session.id(), session.clone());
        tracing::debug!(
            session = session.id(),
            remote = session.remote_addr(),
            ?direction,
            "session opened"
        );
        let node = self.clone();
        self.inner
            .shutdown
            .spawn(node.read_loop(session.clone(), reader));
        session
    }

    // ── Read loop ─────────────────────────────────────────────────────────────

    async fn read_loop<R>(self, session: SessionHandle, mut reader: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let max_len = self.inner.settings.max_frame_len;
        let token = session.cancellation().clone();

        let outcome = loop {
            let frame = tokio::select! {
                biased;
                _ = token.cancelled() => break Ok(Ending::Stopped),
                frame = read_frame(&mut reader, max_len) => frame,
            };

            let handled = match frame {
                Ok(payload) => match Message::decode(&payload) {
                    Ok(message) => self.dispatch(&session, message).await,
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e.into()),
            };

            match handled {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close(ending)) => break Ok(ending),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(session = session.id(), error = %e, "ignoring frame");
                }
                Err(e) => break Err(e),
            }
        };

        self.finish_session(&session, outcome).await;
    }

    /// Tear a session down after its read loop exits.
    ///
    /// The peer's record goes with it only if the record still points at this
    /// session; a tie-break loser leaves the winner alone.
    async fn finish_session(&self, session: &SessionHandle, outcome: Result<Ending, ProtocolError>) {
        session.advance(SessionState::Closing);
        self.inner.sessions.remove(&session.id());

        let removed = match session.peer_id() {
            Some(id) => self.inner.registry.remove_if_session(id, session).await,
            None => None,
        };

        match &outcome {
            Ok(ending) => {
                tracing::debug!(session = session.id(), ?ending, "session ended");
            }
            Err(e) => {
                tracing::info!(
                    session = session.id(),
                    peer = %session.label(),
                    error = %e,
                    "session failed"
                );
            }
        }

        let stopping = self.inner.shutdown.is_stopping();
        if let Some(entry) = removed {
            if !stopping {
                let reason = match &outcome {
                    Ok(_) => "closed".to_string(),
                    Err(e) => e.to_string(),
                };
                self.emit(NodeEvent::ConnectionLost {
                    id: Some(entry.info.id),
                    name: entry.info.name,
                    reason,
                });
            }
        }

        session.shutdown_writer().await;
    }
}

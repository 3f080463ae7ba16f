//! Membership protocol — what each message type does to a session and the
//! registry.
//!
//! Handlers run inside the receiving session's read loop, one message at a
//! time. They return `Flow::Close` to end the session cleanly, or an error for
//! the read loop to classify.

use meshchat_core::{Message, PeerId, PeerInfo};

use crate::error::ProtocolError;
use crate::events::NodeEvent;
use crate::node::{Ending, Flow, Node};
use crate::registry::Bind;
use crate::session::{Direction, SessionHandle, SessionState};

impl Node {
    /// Route one decoded message to its handler.
    ///
    /// Until the session is `Active` only the handshake messages and LEAVE are
    /// handled; anything else is refused as a recoverable error.
    pub(crate) async fn dispatch(
        &self,
        session: &SessionHandle,
        message: Message,
    ) -> Result<Flow, ProtocolError> {
        tracing::trace!(
            session = session.id(),
            kind = ?message.message_type(),
            "frame received"
        );
        let handshake = matches!(
            message,
            Message::Join(_) | Message::AckJoin { .. } | Message::Leave
        );
        if !handshake && session.state() < SessionState::Active {
            return Err(ProtocolError::BeforeHandshake(message.message_type()));
        }
        match message {
            Message::Join(info) => self.on_join(session, info).await,
            Message::AckJoin { peer_id } => self.on_ack_join(session, peer_id).await,
            Message::PeerRequest => self.on_peer_request(session).await,
            Message::PeerList(records) => self.on_peer_list(session, records).await,
            Message::Chat { text } => Ok(self.on_chat(session, text)),
            Message::Leave => Ok(self.on_leave(session).await),
        }
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    /// JOIN: the remote names itself. Record it on this session and answer
    /// with our id.
    async fn on_join(&self, session: &SessionHandle, info: PeerInfo) -> Result<Flow, ProtocolError> {
        if info.id == *self.local_id() {
            tracing::warn!(session = session.id(), "JOIN carries our own id, closing");
            return Ok(Flow::Close(Ending::SelfConnection));
        }
        if let Err(expected) = session.bind_peer(info.id.clone()) {
            return Err(ProtocolError::UnexpectedPeer {
                expected,
                actual: info.id,
            });
        }
        session.set_name(&info.name);

        let id = info.id.clone();
        let name = info.name.clone();
        let outcome = self.registry().bind(info, session).await;
        if !self.settle(outcome, &id, session) {
            return Ok(Flow::Close(Ending::Duplicate));
        }

        session.advance(SessionState::Active);
        session
            .send(&Message::AckJoin {
                peer_id: self.local_id().clone(),
            })
            .await?;

        tracing::info!(peer = %id, name = %name, session = session.id(), "peer joined");
        self.emit(NodeEvent::PeerJoined { id, name });
        Ok(Flow::Continue)
    }

    /// ACK_JOIN: the peer we dialled tells us who it is. Attach the session
    /// and ask for its membership.
    async fn on_ack_join(&self, session: &SessionHandle, peer_id: PeerId) -> Result<Flow, ProtocolError> {
        if peer_id == *self.local_id() {
            tracing::warn!(session = session.id(), "dialled ourselves, closing");
            return Ok(Flow::Close(Ending::SelfConnection));
        }
        if let Err(expected) = session.bind_peer(peer_id.clone()) {
            return Err(ProtocolError::UnexpectedPeer {
                expected,
                actual: peer_id,
            });
        }

        // Active before attaching: an acknowledged session beats an outbound
        // one still waiting for its ACK_JOIN. Unknown is fine, a manual connect
        // learns the remote's metadata from its PEER_LIST reply.
        session.advance(SessionState::Active);
        let outcome = self.registry().attach(&peer_id, session).await;
        if !self.settle(outcome, &peer_id, session) {
            return Ok(Flow::Close(Ending::Duplicate));
        }

        session.send(&Message::PeerRequest).await?;
        tracing::debug!(peer = %peer_id, session = session.id(), "handshake complete");
        Ok(Flow::Continue)
    }

    /// Act on a registry bind outcome. Returns false if `session` lost and must
    /// be closed.
    fn settle(&self, outcome: Bind, id: &PeerId, session: &SessionHandle) -> bool {
        match outcome {
            Bind::Bound | Bind::Unknown => true,
            Bind::Displaced(old) => {
                tracing::debug!(
                    peer = %id,
                    kept = session.id(),
                    dropped = old.id(),
                    "duplicate session, closing the other one"
                );
                old.close();
                true
            }
            Bind::Rejected => {
                let reason = ProtocolError::DuplicateSession(id.clone());
                tracing::debug!(session = session.id(), error = %reason, "closing this session");
                false
            }
        }
    }

    // ── Gossip ────────────────────────────────────────────────────────────────

    /// PEER_REQUEST: reply with every record we know, ourselves included.
    async fn on_peer_request(&self, session: &SessionHandle) -> Result<Flow, ProtocolError> {
        let records = self.registry().peer_infos().await;
        tracing::debug!(session = session.id(), records = records.len(), "sending peer list");
        session.send(&Message::PeerList(records)).await?;
        Ok(Flow::Continue)
    }

    /// PEER_LIST: dial every peer we have not heard of.
    ///
    /// Our own record is skipped. The record for the session's own peer binds
    /// it (that is how a manual connect learns the remote's name and address).
    /// Known peers are left alone, which makes the message idempotent. Dial
    /// failures are logged and do not affect this session.
    async fn on_peer_list(&self, session: &SessionHandle, records: Vec<PeerInfo>) -> Result<Flow, ProtocolError> {
        for info in records {
            if info.id == *self.local_id() {
                continue;
            }

            if session.peer_id() == Some(&info.id) {
                session.set_name(&info.name);
                let id = info.id.clone();
                let outcome = self.registry().bind(info, session).await;
                if !self.settle(outcome, &id, session) {
                    return Ok(Flow::Close(Ending::Duplicate));
                }
                continue;
            }

            if self.registry().contains(&info.id).await {
                tracing::trace!(peer = %info.id, "already known");
                continue;
            }
            if self.shutdown().is_stopping() {
                break;
            }

            let addr = info.dial_addr();
            if let Err(e) = self.dial_gossiped(info).await {
                tracing::warn!(addr = %addr, error = %e, "could not reach gossiped peer");
            }
        }
        Ok(Flow::Continue)
    }

    /// Dial a peer learned from gossip. Its record is bound to the new session
    /// before JOIN goes out, so a second PEER_LIST naming it is a no-op.
    async fn dial_gossiped(&self, info: PeerInfo) -> Result<(), ProtocolError> {
        let stream = self.dial(&info.dial_addr()).await?;
        let session = self.adopt(stream, Direction::Outbound);
        if let Err(expected) = session.bind_peer(info.id.clone()) {
            session.close();
            return Err(ProtocolError::UnexpectedPeer {
                expected,
                actual: info.id,
            });
        }
        session.set_name(&info.name);

        let id = info.id.clone();
        let name = info.name.clone();
        let host = info.host.clone();
        let port = info.port;
        let outcome = self.registry().bind(info, &session).await;
        if !self.settle(outcome, &id, &session) {
            session.close();
            return Ok(());
        }

        session.send(&Message::Join(self.local().clone())).await?;
        session.advance(SessionState::Handshaking);

        tracing::info!(peer = %id, name = %name, %host, port, "connected to gossiped peer");
        self.emit(NodeEvent::PeerDialed { id, name, host, port });
        Ok(())
    }

    // ── Chat and departure ────────────────────────────────────────────────────

    /// CHAT: surface the text. Never forwarded; every node sends directly to
    /// each of its peers.
    fn on_chat(&self, session: &SessionHandle, text: String) -> Flow {
        let name = session.label();
        tracing::debug!(session = session.id(), from = %name, len = text.len(), "chat received");
        self.emit(NodeEvent::Chat {
            from: session.peer_id().cloned(),
            name,
            text,
        });
        Flow::Continue
    }

    /// LEAVE: forget the sender and close the session. Other sessions are
    /// untouched.
    async fn on_leave(&self, session: &SessionHandle) -> Flow {
        if let Some(id) = session.peer_id() {
            let removed = self.registry().remove(id).await;
            let name = removed
                .map(|entry| entry.info.name)
                .unwrap_or_else(|| session.label());
            tracing::info!(peer = %id, name = %name, "peer left");
            self.emit(NodeEvent::PeerLeft {
                id: id.clone(),
                name,
            });
        } else {
            tracing::debug!(session = session.id(), "LEAVE before handshake");
        }
        Flow::Close(Ending::Left)
    }
}

//! Error taxonomy for sessions and the membership protocol.
//!
//! `ConnectionBroken` and `MalformedFrame` end the session that hit them and
//! nothing else. `UnknownMessageType` and `BeforeHandshake` are logged and the
//! session carries on.

use meshchat_core::{FrameError, MessageType, PeerId, WireError};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Peer closed or reset the socket, or a send/receive failed.
    #[error("connection broken: {0}")]
    ConnectionBroken(String),

    /// A length or field failed to decode.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Tag byte not recognised; forward-compatible, not fatal.
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Only JOIN, ACK_JOIN and LEAVE are handled until the handshake completes.
    #[error("{0:?} received before handshake, ignored")]
    BeforeHandshake(MessageType),

    /// Another live session already serves this peer and won the tie-break.
    #[error("duplicate session for peer {0}")]
    DuplicateSession(PeerId),

    /// ACK_JOIN named a different peer than the one we dialled.
    #[error("expected peer {expected}, remote claims {actual}")]
    UnexpectedPeer { expected: PeerId, actual: PeerId },

    /// Outbound dial failed or timed out.
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },
}

impl ProtocolError {
    /// Does this error leave the session usable?
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownMessageType(_) | ProtocolError::BeforeHandshake(_)
        )
    }
}

impl From<FrameError> for ProtocolError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::ConnectionBroken(io) => ProtocolError::ConnectionBroken(io.to_string()),
            FrameError::Oversized { .. } => ProtocolError::MalformedFrame(e.to_string()),
        }
    }
}

impl From<WireError> for ProtocolError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::UnknownMessageType(tag) => ProtocolError::UnknownMessageType(tag),
            other => ProtocolError::MalformedFrame(other.to_string()),
        }
    }
}

//! Node events — the human-readable status lines a node emits.
//!
//! The node pushes these onto an unbounded channel; whoever owns the receiver
//! (the daemon's printer, or a test) decides what to do with them. A dropped
//! receiver is fine: events are best-effort.

use std::fmt;

use meshchat_core::PeerId;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<NodeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<NodeEvent>;

/// Create the status-line channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Listener bound.
    Listening { addr: String },
    /// A peer completed JOIN on an inbound session.
    PeerJoined { id: PeerId, name: String },
    /// We dialled a peer learned from gossip.
    PeerDialed { id: PeerId, name: String, host: String, port: u16 },
    /// Chat text from a directly connected peer.
    Chat { from: Option<PeerId>, name: String, text: String },
    /// A peer sent LEAVE.
    PeerLeft { id: PeerId, name: String },
    /// A session ended without LEAVE.
    ConnectionLost { id: Option<PeerId>, name: String, reason: String },
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEvent::Listening { addr } => {
                write!(f, "[INFO] Listening for new peers on {addr}...")
            }
            NodeEvent::PeerJoined { name, .. } => write!(f, "[INFO] {name} has connected"),
            NodeEvent::PeerDialed { name, host, port, .. } => {
                write!(f, "[INFO] Connected to {name} at {host}:{port}")
            }
            NodeEvent::Chat { name, text, .. } => write!(f, "[CHAT] {name} says: {text}"),
            NodeEvent::PeerLeft { name, .. } => write!(f, "[CHAT] {name} has left the chat"),
            NodeEvent::ConnectionLost { name, reason, .. } => {
                write!(f, "[INFO] Lost connection to {name} ({reason})")
            }
        }
    }
}

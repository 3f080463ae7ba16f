//! meshchat-services — sessions, the peer registry, the membership protocol
//! and the node that ties them together.

pub mod error;
pub mod events;
pub mod listener;
mod membership;
pub mod node;
pub mod registry;
pub mod session;
pub mod shutdown;

pub use error::ProtocolError;
pub use events::{event_channel, EventReceiver, EventSender, NodeEvent};
pub use listener::{bind_host, bind_listener};
pub use node::{Node, NodeSettings};
pub use registry::{Bind, PeerEntry, PeerRegistry};
pub use session::{Direction, SessionHandle, SessionId, SessionState, SessionTable};
pub use shutdown::ShutdownCoordinator;

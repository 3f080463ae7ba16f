//! meshchat-core — peer identity, wire format, frame I/O and configuration.
//! All other meshchat crates depend on this one.

pub mod config;
pub mod frame;
pub mod peer;
pub mod wire;

pub use frame::{read_frame, write_frame, FrameError};
pub use peer::{PeerId, PeerInfo};
pub use wire::{Message, MessageType, WireError};

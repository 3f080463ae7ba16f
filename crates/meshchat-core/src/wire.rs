//! Meshchat wire format — message tags, payload layout, and the frame envelope.
//!
//! These types ARE the protocol. Every field and every byte order here is part
//! of the wire format; changing one is a breaking change for every peer.
//!
//! ```text
//! frame   := u32_le length | payload[length]
//! payload := u8 type | fields...
//! string  := u32_le byte_length | bytes        (no terminator)
//! port    := u16_le                            (unsigned)
//! record  := string peer_id | string host | port | string name
//! ```
//!
//! All integers are little-endian. Decoding never trusts a length field: every
//! read is checked against the bytes actually present before anything is
//! allocated.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::peer::{PeerId, PeerInfo};

// ── Message Types ─────────────────────────────────────────────────────────────

/// One-byte tag at the start of every payload.
///
/// Tags 0x02, 0x08 and 0x09 were used by earlier revisions of the protocol and
/// are never emitted; a receiver treats them like any other unknown tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Announce self to a freshly dialled peer.
    Join = 0x01,
    /// Sender is disconnecting.
    Leave = 0x03,
    /// Single-hop chat text.
    Chat = 0x04,
    /// Ask for the receiver's membership snapshot.
    PeerRequest = 0x05,
    /// Membership snapshot.
    PeerList = 0x06,
    /// Reply to JOIN carrying the responder's id.
    AckJoin = 0x07,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::Join),
            0x03 => Ok(MessageType::Leave),
            0x04 => Ok(MessageType::Chat),
            0x05 => Ok(MessageType::PeerRequest),
            0x06 => Ok(MessageType::PeerList),
            0x07 => Ok(MessageType::AckJoin),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of the frame length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default cap on a single frame's payload. Checked before the receive buffer
/// is allocated, so a hostile length prefix costs nothing.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Smallest possible encoded PEER_LIST record: three empty strings and a port.
const MIN_RECORD_LEN: usize = 4 + 4 + 2 + 4;

// ── Messages ──────────────────────────────────────────────────────────────────

/// A decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `JOIN(peer_id, host, port, name)`
    Join(PeerInfo),
    /// `ACK_JOIN(peer_id)`
    AckJoin { peer_id: PeerId },
    /// `PEER_REQUEST()`
    PeerRequest,
    /// `PEER_LIST(count, records...)`
    PeerList(Vec<PeerInfo>),
    /// `CHAT(text)`
    Chat { text: String },
    /// `LEAVE()`
    Leave,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Join(_) => MessageType::Join,
            Message::AckJoin { .. } => MessageType::AckJoin,
            Message::PeerRequest => MessageType::PeerRequest,
            Message::PeerList(_) => MessageType::PeerList,
            Message::Chat { .. } => MessageType::Chat,
            Message::Leave => MessageType::Leave,
        }
    }

    /// Serialize the payload (tag + fields) without the length prefix.
    pub fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.message_type().into());
        match self {
            Message::Join(info) => put_record(buf, info),
            Message::AckJoin { peer_id } => put_bytes(buf, peer_id.as_bytes()),
            Message::PeerRequest | Message::Leave => {}
            Message::PeerList(records) => {
                buf.put_u32_le(records.len() as u32);
                for record in records {
                    put_record(buf, record);
                }
            }
            Message::Chat { text } => put_bytes(buf, text.as_bytes()),
        }
    }

    /// Serialize a complete frame: `u32_le length` followed by the payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32_le(0);
        self.encode_payload(&mut buf);
        let len = (buf.len() - FRAME_HEADER_LEN) as u32;
        buf[..FRAME_HEADER_LEN].copy_from_slice(&len.to_le_bytes());
        buf.freeze()
    }

    /// Parse one payload (the bytes after the length prefix).
    ///
    /// The payload must be consumed exactly; leftover bytes are an error.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = FieldReader::new(payload);
        let tag = r.u8("type").map_err(|_| WireError::EmptyPayload)?;
        let message = match MessageType::try_from(tag)? {
            MessageType::Join => Message::Join(r.record()?),
            MessageType::AckJoin => Message::AckJoin {
                peer_id: PeerId::from_bytes(r.bytes("peer_id")?),
            },
            MessageType::PeerRequest => Message::PeerRequest,
            MessageType::PeerList => {
                let count = r.u32("count")? as usize;
                // The count is untrusted: size the vec from what can actually fit.
                let mut records = Vec::with_capacity(count.min(r.remaining() / MIN_RECORD_LEN));
                for _ in 0..count {
                    records.push(r.record()?);
                }
                Message::PeerList(records)
            }
            MessageType::Chat => Message::Chat {
                text: r.string("text")?,
            },
            MessageType::Leave => Message::Leave,
        };
        if r.remaining() > 0 {
            return Err(WireError::TrailingBytes(r.remaining()));
        }
        Ok(message)
    }
}

// ── Field encoding ────────────────────────────────────────────────────────────

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn put_record(buf: &mut BytesMut, info: &PeerInfo) {
    put_bytes(buf, info.id.as_bytes());
    put_bytes(buf, info.host.as_bytes());
    buf.put_u16_le(info.port);
    put_bytes(buf, info.name.as_bytes());
}

/// Bounds-checked cursor over a payload.
struct FieldReader<'a> {
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, field: &'static str, needed: usize) -> Result<(), WireError> {
        if self.buf.remaining() < needed {
            return Err(WireError::Truncated {
                field,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, WireError> {
        self.need(field, 1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, WireError> {
        self.need(field, 2)?;
        Ok(self.buf.get_u16_le())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, WireError> {
        self.need(field, 4)?;
        Ok(self.buf.get_u32_le())
    }

    fn bytes(&mut self, field: &'static str) -> Result<Bytes, WireError> {
        let len = self.u32(field)? as usize;
        self.need(field, len)?;
        Ok(self.buf.copy_to_bytes(len))
    }

    fn string(&mut self, field: &'static str) -> Result<String, WireError> {
        let raw = self.bytes(field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8(field))
    }

    fn record(&mut self) -> Result<PeerInfo, WireError> {
        let id = PeerId::from_bytes(self.bytes("peer_id")?);
        let host = self.string("host")?;
        let port = self.u16("port")?;
        let name = self.string("name")?;
        Ok(PeerInfo { id, host, port, name })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("empty payload")]
    EmptyPayload,

    #[error("truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

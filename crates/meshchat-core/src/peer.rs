//! Peer identity — who a node claims to be and where it can be dialled.

use std::fmt;

use bytes::Bytes;

/// Self-declared, globally unique peer identifier.
///
/// Opaque bytes on the wire. Locally generated ids are hyphenated UUIDv4
/// strings, but any byte string a remote announces is accepted as-is: there
/// is no authority to check it against.
///
/// Ordering is bytewise and is what the concurrent-dial tie-break uses.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Bytes);

impl PeerId {
    /// Generate a fresh random identifier for this process.
    pub fn generate() -> Self {
        Self(Bytes::from(uuid::Uuid::new_v4().hyphenated().to_string()))
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> String {
        let full = self.to_string();
        full.chars().take(8).collect()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if !s.is_empty() => f.write_str(s),
            _ => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

/// Everything a peer announces about itself in JOIN and PEER_LIST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    /// Host other peers should dial.
    pub host: String,
    pub port: u16,
    /// Human-readable display name.
    pub name: String,
}

impl PeerInfo {
    pub fn new(id: PeerId, host: impl Into<String>, port: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            name: name.into(),
        }
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn dial_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

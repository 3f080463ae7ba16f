//! Peer registry — every peer this node knows about, connected or not.
//!
//! One table, one lock. Every operation takes the lock, does its map work, and
//! releases it before returning; nothing here touches the network, so a slow
//! peer can never stall registry access. Callers that need to send (broadcast,
//! gossip replies) take a `snapshot()` or `live_sessions()` copy first and do
//! their I/O after the lock is gone.
//!
//! The local node is seeded at construction and can never be removed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use meshchat_core::{PeerId, PeerInfo};

use crate::session::{Direction, SessionHandle, SessionState};

/// Registry record for one peer.
///
/// `session == None` means known only through gossip, or the session that
/// served it is gone.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub info: PeerInfo,
    pub session: Option<SessionHandle>,
}

impl PeerEntry {
    pub fn new(info: PeerInfo, session: Option<SessionHandle>) -> Self {
        Self { info, session }
    }

    /// Has an open session right now?
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(SessionHandle::is_open)
    }
}

/// Outcome of binding a session to a peer.
#[derive(Debug)]
pub enum Bind {
    /// Session is now the peer's session.
    Bound,
    /// Session won the tie-break; the returned loser must be closed.
    Displaced(SessionHandle),
    /// An existing session won; the candidate must be closed.
    Rejected,
    /// `attach` only: peer not in the registry, nothing recorded.
    Unknown,
}

/// Concurrent-dial tie-break.
///
/// Two live sessions for one peer pair: keep the one dialled by the peer with
/// the bytewise-smaller id. Both ends evaluate this with roles swapped and
/// reach the same edge. Two sessions in the same direction (a repeated manual
/// connect, say) keep the existing one; see `keeps_acknowledged` for the
/// outbound case.
pub fn keeps_candidate(
    local: &PeerId,
    remote: &PeerId,
    existing: Direction,
    candidate: Direction,
) -> bool {
    if existing == candidate {
        return false;
    }
    let winner = if local < remote {
        Direction::Outbound
    } else {
        Direction::Inbound
    };
    candidate == winner
}

/// Two outbound sessions to one peer.
///
/// The remote keeps whichever JOIN it saw first and sends ACK_JOIN on that
/// session only, so an acknowledged candidate replaces an existing session
/// still waiting for its ACK_JOIN. Anything else keeps the existing one.
pub fn keeps_acknowledged(existing: SessionState, candidate: SessionState) -> bool {
    candidate == SessionState::Active && existing < SessionState::Active
}

/// Shared between every session task and the console.
#[derive(Clone)]
pub struct PeerRegistry {
    local: Arc<PeerInfo>,
    peers: Arc<Mutex<HashMap<PeerId, PeerEntry>>>,
}

impl PeerRegistry {
    /// Create a registry seeded with the local node (no session).
    pub fn new(local: PeerInfo) -> Self {
        let mut peers = HashMap::new();
        peers.insert(local.id.clone(), PeerEntry::new(local.clone(), None));
        Self {
            local: Arc::new(local),
            peers: Arc::new(Mutex::new(peers)),
        }
    }

    pub fn local(&self) -> &PeerInfo {
        &self.local
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local.id
    }

    /// Insert or replace a record. The local record cannot be replaced.
    /// Returns the previous entry.
    pub async fn upsert(&self, entry: PeerEntry) -> Option<PeerEntry> {
        if entry.info.id == self.local.id {
            return None;
        }
        self.peers.lock().await.insert(entry.info.id.clone(), entry)
    }

    /// Remove a peer. The local node is never removed.
    pub async fn remove(&self, id: &PeerId) -> Option<PeerEntry> {
        if *id == self.local.id {
            return None;
        }
        self.peers.lock().await.remove(id)
    }

    /// Remove a peer only if its record still points at `session`.
    ///
    /// Session teardown uses this so a losing duplicate session can never take
    /// the winner's record with it.
    pub async fn remove_if_session(&self, id: &PeerId, session: &SessionHandle) -> Option<PeerEntry> {
        if *id == self.local.id {
            return None;
        }
        let mut peers = self.peers.lock().await;
        let owned = peers
            .get(id)
            .and_then(|e| e.session.as_ref())
            .is_some_and(|s| s == session);
        if owned {
            peers.remove(id)
        } else {
            None
        }
    }

    pub async fn contains(&self, id: &PeerId) -> bool {
        self.peers.lock().await.contains_key(id)
    }

    pub async fn get(&self, id: &PeerId) -> Option<PeerEntry> {
        self.peers.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Consistent copy of every record, local node first, the rest ordered by id.
    pub async fn snapshot(&self) -> Vec<PeerEntry> {
        let mut entries: Vec<PeerEntry> = self.peers.lock().await.values().cloned().collect();
        entries.sort_by(|a, b| {
            let a_local = a.info.id == self.local.id;
            let b_local = b.info.id == self.local.id;
            b_local.cmp(&a_local).then_with(|| a.info.id.cmp(&b.info.id))
        });
        entries
    }

    /// Wire records for a PEER_LIST reply.
    pub async fn peer_infos(&self) -> Vec<PeerInfo> {
        self.snapshot().await.into_iter().map(|e| e.info).collect()
    }

    /// Every peer with an open session.
    pub async fn live_sessions(&self) -> Vec<(PeerId, SessionHandle)> {
        self.peers
            .lock()
            .await
            .iter()
            .filter_map(|(id, e)| {
                e.session
                    .as_ref()
                    .filter(|s| s.is_open())
                    .map(|s| (id.clone(), s.clone()))
            })
            .collect()
    }

    /// Record `info` with `session` attached, resolving any competing session
    /// atomically.
    ///
    /// - candidate already closing: `Rejected`, nothing recorded
    /// - no record, or a record with no open session: insert/refresh, `Bound`
    /// - record already on this session: refresh metadata, `Bound`
    /// - record on another open session: `keeps_acknowledged` (both outbound)
    ///   or `keeps_candidate` decides between `Displaced(old)` and `Rejected`
    pub async fn bind(&self, info: PeerInfo, session: &SessionHandle) -> Bind {
        if info.id == self.local.id || !session.is_open() {
            return Bind::Rejected;
        }
        let mut peers = self.peers.lock().await;
        let existing = peers
            .get(&info.id)
            .and_then(|e| e.session.clone())
            .filter(|s| s.is_open() && s != session);

        let outcome = match existing {
            None => Bind::Bound,
            Some(old) => {
                let keep = match (old.direction(), session.direction()) {
                    (Direction::Outbound, Direction::Outbound) => {
                        keeps_acknowledged(old.state(), session.state())
                    }
                    (existing, candidate) => {
                        keeps_candidate(&self.local.id, &info.id, existing, candidate)
                    }
                };
                if !keep {
                    return Bind::Rejected;
                }
                Bind::Displaced(old)
            }
        };
        peers.insert(info.id.clone(), PeerEntry::new(info, Some(session.clone())));
        outcome
    }

    /// Attach `session` to an already-known peer, keeping its metadata.
    ///
    /// Used when only the id is known (ACK_JOIN). Returns `Unknown` without
    /// inserting anything if the peer has no record yet.
    pub async fn attach(&self, id: &PeerId, session: &SessionHandle) -> Bind {
        let info = match self.peers.lock().await.get(id) {
            Some(entry) => entry.info.clone(),
            None => return Bind::Unknown,
        };
        // Re-check under bind's own lock acquisition; a concurrent remove just
        // means bind inserts a fresh record with the metadata we saw.
        self.bind(info, session).await
    }
}

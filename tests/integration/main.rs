//! meshchat integration test harness.
//!
//! Every test runs its nodes in-process on loopback TCP with OS-assigned
//! ports, so tests are independent and can run in parallel. Waits are polled
//! against a deadline, never fixed sleeps.

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;

use meshchat_core::wire::DEFAULT_MAX_FRAME_LEN;
use meshchat_core::{read_frame, write_frame, Message, PeerId, PeerInfo};
use meshchat_services::{
    bind_listener, event_channel, EventReceiver, Node, NodeEvent, NodeSettings,
};

mod chat;
mod failures;
mod gossip;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(20);

/// A running node plus its status-line receiver.
pub struct TestNode {
    pub node: Node,
    pub events: EventReceiver,
    pub addr: String,
}

impl TestNode {
    pub fn id(&self) -> &PeerId {
        self.node.local_id()
    }

    pub fn info(&self) -> PeerInfo {
        self.node.local().clone()
    }

    /// Is `other` in our registry with an open session?
    pub async fn connected_to(&self, other: &TestNode) -> bool {
        self.node
            .registry()
            .get(other.id())
            .await
            .is_some_and(|e| e.is_connected())
    }
}

pub fn test_settings() -> NodeSettings {
    NodeSettings {
        max_frame_len: DEFAULT_MAX_FRAME_LEN,
        connect_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_secs(2),
    }
}

/// Start a node with a fresh random id.
pub async fn spawn_node(name: &str) -> Result<TestNode> {
    spawn_node_with_id(name, PeerId::generate()).await
}

/// Start a node with a chosen id, for tests that depend on id ordering.
pub async fn spawn_node_with_id(name: &str, id: PeerId) -> Result<TestNode> {
    start_node(name, id, test_settings()).await
}

/// Start a node with non-default timeouts.
pub async fn spawn_node_with_settings(name: &str, settings: NodeSettings) -> Result<TestNode> {
    start_node(name, PeerId::generate(), settings).await
}

async fn start_node(name: &str, id: PeerId, settings: NodeSettings) -> Result<TestNode> {
    let listener = bind_listener("127.0.0.1:0".parse()?).context("bind test listener")?;
    let port = listener.local_addr()?.port();
    let (tx, events) = event_channel();
    let node = Node::new(PeerInfo::new(id, "127.0.0.1", port, name), settings, tx);
    node.serve(listener);
    Ok(TestNode {
        node,
        events,
        addr: format!("127.0.0.1:{port}"),
    })
}

/// Three nodes, fully meshed: b joins a, then c joins b and learns a by gossip.
pub async fn mesh3() -> Result<(TestNode, TestNode, TestNode)> {
    let a = spawn_node("alice").await?;
    let b = spawn_node("bob").await?;
    let c = spawn_node("carol").await?;

    b.node.connect(&a.addr).await?;
    wait_linked("a and b connected", &[(&a, &b), (&b, &a)]).await?;

    c.node.connect(&b.addr).await?;
    wait_linked(
        "full mesh",
        &[(&a, &c), (&c, &a), (&b, &c), (&c, &b)],
    )
    .await?;

    Ok((a, b, c))
}

/// Poll `check` until it holds or `WAIT` elapses.
pub async fn wait_for<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(POLL).await;
    }
}

/// Wait until every `(x, y)` pair has `x` holding an open session to `y`.
pub async fn wait_linked(what: &str, pairs: &[(&TestNode, &TestNode)]) -> Result<()> {
    wait_for(what, || async move {
        for (x, y) in pairs {
            if !x.connected_to(y).await {
                return false;
            }
        }
        true
    })
    .await
}

/// Next event matching `want`, skipping others.
pub async fn next_event(
    events: &mut EventReceiver,
    want: impl Fn(&NodeEvent) -> bool,
) -> Result<NodeEvent> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .context("timed out waiting for event")?
            .context("event channel closed")?;
        if want(&event) {
            return Ok(event);
        }
    }
}

/// Every chat event already queued or arriving within `window`.
pub async fn drain_chats(events: &mut EventReceiver, window: Duration) -> Vec<NodeEvent> {
    let mut chats = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(window, events.recv()).await {
        if matches!(event, NodeEvent::Chat { .. }) {
            chats.push(event);
        }
    }
    chats
}

/// A hand-driven peer speaking raw frames over TCP.
pub struct FakePeer {
    pub info: PeerInfo,
    pub stream: TcpStream,
}

impl FakePeer {
    /// Dial `addr` and complete JOIN / ACK_JOIN. Returns the fake and the id
    /// the node acknowledged with.
    pub async fn join(addr: &str, name: &str) -> Result<(Self, PeerId)> {
        let stream = TcpStream::connect(addr).await?;
        let info = PeerInfo::new(PeerId::generate(), "127.0.0.1", 1, name);
        let mut fake = Self { info, stream };
        fake.send(&Message::Join(fake.info.clone())).await?;
        match fake.recv().await? {
            Message::AckJoin { peer_id } => Ok((fake, peer_id)),
            other => bail!("expected ACK_JOIN, got {other:?}"),
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        write_frame(&mut self.stream, &message.encode()).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Message> {
        let payload = tokio::time::timeout(WAIT, read_frame(&mut self.stream, DEFAULT_MAX_FRAME_LEN))
            .await
            .context("timed out waiting for frame")??;
        Ok(Message::decode(&payload)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_node_reports_listening() -> Result<()> {
    let mut a = spawn_node("alice").await?;
    let event = next_event(&mut a.events, |e| matches!(e, NodeEvent::Listening { .. })).await?;
    assert_eq!(event, NodeEvent::Listening { addr: a.addr.clone() });
    assert_eq!(a.node.peers().await.len(), 1);
    Ok(())
}

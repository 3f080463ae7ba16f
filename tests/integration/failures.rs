use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

use crate::*;

/// Wait until the node no longer lists `id`.
async fn wait_forgotten(node: &TestNode, id: &PeerId) -> Result<()> {
    let registry = node.node.registry();
    wait_for("peer to be forgotten", || async move { !registry.contains(id).await }).await
}

/// A frame cut off mid-payload closes the session and drops the peer.
#[tokio::test]
async fn truncated_frame_drops_peer() -> Result<()> {
    let mut a = spawn_node("alice").await?;
    let (mut fake, _) = FakePeer::join(&a.addr, "mallory").await?;
    assert!(a.node.registry().contains(&fake.info.id).await);

    // Promise ten bytes, deliver three, hang up.
    fake.stream.write_all(&[10, 0, 0, 0, 0x04, 0x01, 0x00]).await?;
    fake.stream.shutdown().await?;

    wait_forgotten(&a, &fake.info.id).await?;
    let lost = next_event(&mut a.events, |e| matches!(e, NodeEvent::ConnectionLost { .. })).await?;
    match lost {
        NodeEvent::ConnectionLost { id, name, .. } => {
            assert_eq!(id, Some(fake.info.id.clone()));
            assert_eq!(name, "mallory");
        }
        other => bail!("unexpected event {other:?}"),
    }
    Ok(())
}

/// A length prefix over the cap is rejected before any allocation and the
/// session is closed.
#[tokio::test]
async fn oversized_length_closes_session() -> Result<()> {
    let a = spawn_node("alice").await?;
    let (mut fake, _) = FakePeer::join(&a.addr, "mallory").await?;

    fake.stream.write_all(&u32::MAX.to_le_bytes()).await?;
    fake.stream.flush().await?;

    wait_forgotten(&a, &fake.info.id).await?;
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(WAIT, fake.stream.read(&mut buf)).await?;
    assert!(matches!(read, Ok(0) | Err(_)), "node should hang up, got {read:?}");
    Ok(())
}

/// A payload that fails to decode is fatal to that session only.
#[tokio::test]
async fn malformed_payload_closes_only_that_session() -> Result<()> {
    let a = spawn_node("alice").await?;
    let (mut bad, _) = FakePeer::join(&a.addr, "bad").await?;
    let (mut good, _) = FakePeer::join(&a.addr, "good").await?;

    // PEER_LIST claiming two records with no bytes behind them.
    bad.stream.write_all(&[5, 0, 0, 0, 0x06, 2, 0, 0, 0]).await?;
    wait_forgotten(&a, &bad.info.id).await?;

    good.send(&Message::PeerRequest).await?;
    match good.recv().await? {
        Message::PeerList(records) => {
            assert!(records.contains(&good.info));
            assert!(!records.contains(&bad.info));
        }
        other => bail!("expected PEER_LIST, got {other:?}"),
    }
    Ok(())
}

/// An unknown message type is skipped and the session carries on.
#[tokio::test]
async fn unknown_message_type_is_ignored() -> Result<()> {
    let a = spawn_node("alice").await?;
    let (mut fake, _) = FakePeer::join(&a.addr, "mallory").await?;

    fake.stream.write_all(&[4, 0, 0, 0, 0x42, 1, 2, 3]).await?;
    fake.send(&Message::PeerRequest).await?;

    match fake.recv().await? {
        Message::PeerList(records) => assert!(records.contains(&fake.info)),
        other => bail!("expected PEER_LIST, got {other:?}"),
    }
    assert!(a.node.registry().contains(&fake.info.id).await);
    Ok(())
}

/// A peer vanishing without LEAVE is removed from the registry.
#[tokio::test]
async fn silent_disconnect_drops_peer() -> Result<()> {
    let a = spawn_node("alice").await?;
    let (fake, _) = FakePeer::join(&a.addr, "mallory").await?;
    let id = fake.info.id.clone();
    drop(fake);

    wait_forgotten(&a, &id).await?;
    let node = &a.node;
    wait_for("session table to empty", || async move { node.sessions().is_empty() }).await?;
    Ok(())
}

/// Until JOIN, a socket gets nothing: no chat line, no membership reply.
#[tokio::test]
async fn messages_before_join_are_ignored() -> Result<()> {
    let mut a = spawn_node("alice").await?;
    let stream = TcpStream::connect(&a.addr).await?;
    let info = PeerInfo::new(PeerId::generate(), "127.0.0.1", 1, "mallory");
    let mut fake = FakePeer { info, stream };

    fake.send(&Message::Chat { text: "unannounced".into() }).await?;
    fake.send(&Message::PeerRequest).await?;
    fake.send(&Message::Join(fake.info.clone())).await?;

    // The first reply is the ACK_JOIN, not a PEER_LIST.
    match fake.recv().await? {
        Message::AckJoin { peer_id } => assert_eq!(&peer_id, a.id()),
        other => bail!("expected ACK_JOIN, got {other:?}"),
    }

    fake.send(&Message::Chat { text: "announced".into() }).await?;
    match next_event(&mut a.events, |e| matches!(e, NodeEvent::Chat { .. })).await? {
        NodeEvent::Chat { from, text, .. } => {
            assert_eq!(text, "announced");
            assert_eq!(from, Some(fake.info.id.clone()));
        }
        other => bail!("unexpected event {other:?}"),
    }
    Ok(())
}

/// A peer that stopped reading cannot hold `exit` past the grace period.
#[tokio::test]
async fn exit_is_bounded_when_peer_stops_reading() -> Result<()> {
    let mut settings = test_settings();
    settings.shutdown_grace = Duration::from_millis(300);
    let a = spawn_node_with_settings("alice", settings).await?;
    let (stalled, _) = FakePeer::join(&a.addr, "stalled").await?;

    // Far more than loopback buffers hold: the write stalls with them full.
    let flood = "x".repeat(32 * 1024 * 1024);
    let sent = tokio::time::timeout(Duration::from_millis(300), a.node.say(&flood)).await;
    assert!(sent.is_err(), "send should stall on a peer that never reads");

    let started = Instant::now();
    tokio::time::timeout(WAIT, a.node.exit())
        .await
        .context("exit hung on a stalled peer")?;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(a.node.shutdown().is_stopping());

    drop(stalled);
    Ok(())
}

use crate::*;

/// c only dials b, yet ends up connected to a through b's PEER_LIST, with one
/// session per peer pair and no duplicate records.
#[tokio::test]
async fn three_nodes_converge_to_full_mesh() -> Result<()> {
    let (a, b, mut c) = mesh3().await?;

    for node in [&a, &b, &c] {
        let n = &node.node;
        wait_for("one session per peer", || async move { n.sessions().len() == 2 }).await?;
        assert_eq!(node.node.registry().len().await, 3);
    }

    let dialed = next_event(&mut c.events, |e| matches!(e, NodeEvent::PeerDialed { .. })).await?;
    assert_eq!(
        dialed,
        NodeEvent::PeerDialed {
            id: a.id().clone(),
            name: "alice".into(),
            host: "127.0.0.1".into(),
            port: a.info().port,
        }
    );
    Ok(())
}

/// Receiving the same PEER_LIST twice dials each unknown peer once.
#[tokio::test]
async fn repeated_peer_list_is_idempotent() -> Result<()> {
    let a = spawn_node("alice").await?;
    let b = spawn_node("bob").await?;
    let (mut fake, _) = FakePeer::join(&a.addr, "mallory").await?;

    let list = Message::PeerList(vec![fake.info.clone(), b.info(), a.info()]);
    fake.send(&list).await?;
    fake.send(&list).await?;

    wait_linked("a dials b", &[(&a, &b), (&b, &a)]).await?;

    // Both lists are processed in order before this request is.
    fake.send(&Message::PeerRequest).await?;
    match fake.recv().await? {
        Message::PeerList(records) => assert_eq!(records.len(), 3),
        other => bail!("expected PEER_LIST, got {other:?}"),
    }

    assert_eq!(a.node.registry().len().await, 3);
    assert_eq!(a.node.sessions().len(), 2);
    assert_eq!(b.node.sessions().len(), 1);
    Ok(())
}

/// A gossiped peer that cannot be reached is skipped; the session that
/// carried the list keeps working.
#[tokio::test]
async fn unreachable_gossip_does_not_break_session() -> Result<()> {
    let a = spawn_node("alice").await?;
    let (mut fake, _) = FakePeer::join(&a.addr, "mallory").await?;

    let dead_port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0")?;
        probe.local_addr()?.port()
    };
    let ghost = PeerInfo::new(PeerId::generate(), "127.0.0.1", dead_port, "ghost");
    fake.send(&Message::PeerList(vec![ghost.clone()])).await?;
    fake.send(&Message::PeerRequest).await?;

    match fake.recv().await? {
        Message::PeerList(records) => {
            assert!(!records.contains(&ghost));
            assert!(records.contains(&fake.info));
        }
        other => bail!("expected PEER_LIST, got {other:?}"),
    }
    assert!(!a.node.registry().contains(&ghost.id).await);
    Ok(())
}

use crate::*;

const QUIET: Duration = Duration::from_millis(200);

/// `say` reaches every directly connected peer exactly once and never loops
/// back to the sender.
#[tokio::test]
async fn say_reaches_each_peer_once() -> Result<()> {
    let (mut a, mut b, mut c) = mesh3().await?;

    assert_eq!(a.node.say("hello mesh").await, 2);

    let expected = NodeEvent::Chat {
        from: Some(a.id().clone()),
        name: "alice".into(),
        text: "hello mesh".into(),
    };
    for peer in [&mut b, &mut c] {
        let chats = drain_chats(&mut peer.events, QUIET).await;
        assert_eq!(chats, vec![expected.clone()]);
    }
    assert!(drain_chats(&mut a.events, QUIET).await.is_empty());
    Ok(())
}

/// With nobody connected, `say` sends nothing.
#[tokio::test]
async fn say_alone_sends_nothing() -> Result<()> {
    let a = spawn_node("alice").await?;
    assert_eq!(a.node.say("anyone?").await, 0);
    Ok(())
}

/// Text from a raw peer is surfaced under the name it joined with.
#[tokio::test]
async fn chat_from_raw_peer_uses_join_name() -> Result<()> {
    let mut a = spawn_node("alice").await?;
    let (mut fake, _) = FakePeer::join(&a.addr, "mallory").await?;
    fake.send(&Message::Chat { text: "psst".into() }).await?;

    let chat = next_event(&mut a.events, |e| matches!(e, NodeEvent::Chat { .. })).await?;
    assert_eq!(chat.to_string(), "[CHAT] mallory says: psst");
    Ok(())
}

/// `exit` on c sends LEAVE: a and b drop c and keep each other.
#[tokio::test]
async fn exit_removes_only_the_leaver() -> Result<()> {
    let (mut a, mut b, c) = mesh3().await?;
    let c_id = c.id().clone();

    assert!(c.node.exit().await);
    assert!(c.node.shutdown().is_stopping());
    assert!(c.node.sessions().is_empty());

    for peer in [&mut a, &mut b] {
        let left = next_event(&mut peer.events, |e| matches!(e, NodeEvent::PeerLeft { .. })).await?;
        assert_eq!(
            left,
            NodeEvent::PeerLeft {
                id: c_id.clone(),
                name: "carol".into()
            }
        );
        assert!(!peer.node.registry().contains(&c_id).await);
    }
    assert!(a.connected_to(&b).await);
    assert!(b.connected_to(&a).await);

    // The survivors still talk to each other.
    assert_eq!(a.node.say("still here").await, 1);
    let chats = drain_chats(&mut b.events, QUIET).await;
    assert_eq!(chats.len(), 1);
    Ok(())
}

/// After `exit` the listener is gone.
#[tokio::test]
async fn exit_stops_accepting() -> Result<()> {
    let a = spawn_node("alice").await?;
    assert!(a.node.exit().await);
    assert!(TcpStream::connect(&a.addr).await.is_err());
    Ok(())
}

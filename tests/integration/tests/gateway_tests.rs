//! Gateway Integration Tests
//!
//! Each test starts an in-process gateway on an ephemeral port and drives it
//! with real clients over WebSocket.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use chat_client::{ClientError, ConnectionState, Delivery};
use chat_core::PresenceStatus;
use integration_tests::{
    ada, bob, channel_named, cleo, confirmed_count, contents, wait_for, wait_until, TestGateway,
};

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_connect_loads_default_channel() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let client = gateway.connect(&ada()).await.expect("Failed to connect");

    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert!(client.with_state(|s| channel_named(s, "general")).is_some());
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let client = gateway.client();

    let result = client.connect("not-a-jwt").await;
    assert!(matches!(result, Err(ClientError::Unauthenticated)));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_token_for_other_secret_is_rejected() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let forged = chat_common::JwtService::new("some-other-secret", 900)
        .issue_access_token(&ada())
        .unwrap();

    let result = gateway.client().connect(forged).await;
    assert!(matches!(result, Err(ClientError::Unauthenticated)));
}

// ============================================================================
// Message Tests
// ============================================================================

#[tokio::test]
async fn test_send_confirms_in_place_and_delivers_once() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let b = gateway.connect(&bob()).await.unwrap();
    let general = a.with_state(|s| channel_named(s, "general")).unwrap();

    a.join(general).unwrap();
    b.join(general).unwrap();
    assert!(wait_until(&a, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);
    assert!(wait_until(&b, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);

    let local_id = a.send_message(general, "hello").unwrap();
    a.with_state(|s| {
        let entries = s.directory.pipeline(general).unwrap().entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_pending());
    });

    assert!(wait_until(&a, |s| confirmed_count(s, general) == 1).await);
    assert!(wait_until(&b, |s| confirmed_count(s, general) == 1).await);

    a.with_state(|s| {
        let entries = s.directory.pipeline(general).unwrap().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].local_id.as_deref(), Some(local_id.as_str()));
        assert_eq!(entries[0].delivery, Delivery::Confirmed);
        assert_eq!(entries[0].seq, Some(1));
    });
    b.with_state(|s| {
        assert_eq!(contents(s, general), vec!["hello".to_string()]);
        let entry = &s.directory.pipeline(general).unwrap().entries()[0];
        assert_eq!(entry.sender_id, ada().id);
    });
}

#[tokio::test]
async fn test_concurrent_sends_share_one_order() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let b = gateway.connect(&bob()).await.unwrap();
    let general = a.with_state(|s| channel_named(s, "general")).unwrap();

    a.join(general).unwrap();
    b.join(general).unwrap();
    assert!(wait_until(&a, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);
    assert!(wait_until(&b, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);

    for i in 0..10 {
        a.send_message(general, format!("a{i}")).unwrap();
        b.send_message(general, format!("b{i}")).unwrap();
    }

    assert!(wait_until(&a, |s| confirmed_count(s, general) == 20).await);
    assert!(wait_until(&b, |s| confirmed_count(s, general) == 20).await);

    let seqs = |s: &chat_client::ClientState| -> Vec<Option<u64>> {
        s.directory
            .pipeline(general)
            .unwrap()
            .entries()
            .iter()
            .map(|e| e.seq)
            .collect()
    };
    let expected: Vec<Option<u64>> = (1..=20).map(Some).collect();
    assert_eq!(a.with_state(seqs), expected);
    assert_eq!(b.with_state(seqs), expected);
    assert_eq!(a.with_state(|s| contents(s, general)), b.with_state(|s| contents(s, general)));
}

#[tokio::test]
async fn test_edit_delete_and_reactions_propagate() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let b = gateway.connect(&bob()).await.unwrap();
    let general = a.with_state(|s| channel_named(s, "general")).unwrap();

    a.join(general).unwrap();
    b.join(general).unwrap();
    assert!(wait_until(&b, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);

    a.send_message(general, "helo").unwrap();
    assert!(wait_until(&b, |s| confirmed_count(s, general) == 1).await);
    assert!(wait_until(&a, |s| confirmed_count(s, general) == 1).await);
    let message_id = a
        .with_state(|s| s.directory.pipeline(general).unwrap().entries()[0].durable_id)
        .unwrap();

    a.edit_message(general, message_id, "hello").unwrap();
    assert!(wait_until(&b, |s| contents(s, general) == ["hello"]).await);
    assert!(wait_until(&a, |s| {
        let entry = &s.directory.pipeline(general).unwrap().entries()[0];
        entry.is_edited() && entry.pending_mutation.is_none()
    })
    .await);

    b.toggle_reaction(general, message_id, "👍").unwrap();
    assert!(wait_until(&a, |s| {
        s.directory.pipeline(general).unwrap().entries()[0]
            .reactions
            .contains("👍", bob().id)
    })
    .await);

    a.delete_message(general, message_id).unwrap();
    assert!(wait_until(&b, |s| s.directory.pipeline(general).unwrap().entries()[0].is_deleted).await);
    b.with_state(|s| assert_eq!(s.directory.pipeline(general).unwrap().entries().len(), 1));
}

#[tokio::test]
async fn test_edit_by_non_author_is_rolled_back() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let b = gateway.connect(&bob()).await.unwrap();
    let general = a.with_state(|s| channel_named(s, "general")).unwrap();

    a.join(general).unwrap();
    b.join(general).unwrap();
    assert!(wait_until(&b, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);

    a.send_message(general, "mine").unwrap();
    assert!(wait_until(&b, |s| confirmed_count(s, general) == 1).await);
    let message_id = b
        .with_state(|s| s.directory.pipeline(general).unwrap().entries()[0].durable_id)
        .unwrap();

    // The server rejects the edit; the optimistic change rolls back at its deadline
    b.edit_message(general, message_id, "hijacked").unwrap();
    assert!(b.with_state(|s| contents(s, general) == ["hijacked"]));
    assert!(wait_until(&b, |s| {
        let entry = &s.directory.pipeline(general).unwrap().entries()[0];
        entry.mutation_failed && entry.content == "mine"
    })
    .await);
    assert!(wait_until(&a, |s| contents(s, general) == ["mine"]).await);
}

// ============================================================================
// Direct Thread Tests
// ============================================================================

#[tokio::test]
async fn test_rejoin_after_lost_confirmation_keeps_one_entry() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let general = a.with_state(|s| channel_named(s, "general")).unwrap();
    a.join(general).unwrap();
    assert!(wait_until(&a, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);

    // The send reaches the gateway but the socket drops before the confirmation
    a.disconnect();
    let local_id = a.send_message(general, "hello").unwrap();
    let stored = gateway
        .store_as_sent(general, &ada(), "hello", &local_id)
        .await
        .unwrap();

    a.reconnect().await.unwrap();
    assert!(
        wait_until(&a, |s| {
            s.directory.pipeline(general).is_some_and(|p| p.is_synced()) && confirmed_count(s, general) == 1
        })
        .await
    );

    a.with_state(|s| {
        let pipeline = s.directory.pipeline(general).unwrap();
        assert_eq!(pipeline.entries().len(), 1);
        let entry = &pipeline.entries()[0];
        assert_eq!(entry.durable_id, Some(stored.id));
        assert_eq!(entry.local_id.as_deref(), Some(local_id.as_str()));
        assert!(pipeline.next_deadline().is_none());
    });
    assert_eq!(gateway.stored_count(general).await.unwrap(), 1);
}

#[tokio::test]
async fn test_retry_after_lost_confirmation_is_stored_once() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let general = a.with_state(|s| channel_named(s, "general")).unwrap();
    a.join(general).unwrap();
    assert!(wait_until(&a, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);

    a.disconnect();
    let local_id = a.send_message(general, "hello").unwrap();
    a.reconnect().await.unwrap();
    assert!(wait_until(&a, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);

    // The first attempt lands after the rejoin snapshot; its confirmation is lost
    let stored = gateway
        .store_as_sent(general, &ada(), "hello", &local_id)
        .await
        .unwrap();
    assert!(
        wait_until(&a, |s| {
            s.directory
                .pipeline(general)
                .is_some_and(|p| p.entries().iter().any(|e| e.is_failed()))
        })
        .await
    );

    a.retry(general, &local_id).unwrap();
    assert!(wait_until(&a, |s| confirmed_count(s, general) == 1).await);

    a.with_state(|s| {
        let entries = s.directory.pipeline(general).unwrap().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].durable_id, Some(stored.id));
    });
    assert_eq!(gateway.stored_count(general).await.unwrap(), 1);
}

#[tokio::test]
async fn test_own_message_from_other_device_keeps_sequence() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let laptop = gateway.connect(&ada()).await.unwrap();
    let phone = gateway.connect(&ada()).await.unwrap();
    let b = gateway.connect(&bob()).await.unwrap();
    let general = laptop.with_state(|s| channel_named(s, "general")).unwrap();

    for client in [&laptop, &phone, &b] {
        client.join(general).unwrap();
        assert!(wait_until(client, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);
    }

    b.send_message(general, "one").unwrap();
    assert!(wait_until(&laptop, |s| confirmed_count(s, general) == 1).await);
    phone.send_message(general, "two").unwrap();
    assert!(wait_until(&phone, |s| confirmed_count(s, general) == 2).await);
    b.send_message(general, "three").unwrap();
    assert!(wait_until(&laptop, |s| confirmed_count(s, general) == 2).await);

    laptop.with_state(|s| {
        let pipeline = s.directory.pipeline(general).unwrap();
        assert!(pipeline.is_synced());
        assert_eq!(pipeline.last_seq(), 3);
        assert_eq!(contents(s, general), vec!["one".to_string(), "three".to_string()]);
    });
}

#[tokio::test]
async fn test_direct_thread_is_found_or_created() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let b = gateway.connect(&bob()).await.unwrap();

    assert_eq!(a.start_direct_thread(&bob()).unwrap(), None);
    assert!(wait_until(&a, |s| s.directory.direct_thread_with(bob().id).is_some()).await);
    assert!(wait_until(&b, |s| s.directory.direct_thread_with(ada().id).is_some()).await);

    let from_a = a.with_state(|s| s.directory.direct_thread_with(bob().id));
    let from_b = b.with_state(|s| s.directory.direct_thread_with(ada().id));
    assert_eq!(from_a, from_b);

    // A second request resolves locally to the same thread
    assert_eq!(b.start_direct_thread(&ada()).unwrap(), from_b);
}

#[tokio::test]
async fn test_direct_message_counts_unread_until_read() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let b = gateway.connect(&bob()).await.unwrap();

    a.start_direct_thread(&bob()).unwrap();
    assert!(wait_until(&a, |s| s.directory.direct_thread_with(bob().id).is_some()).await);
    assert!(wait_until(&b, |s| s.directory.direct_thread_with(ada().id).is_some()).await);
    let thread = a.with_state(|s| s.directory.direct_thread_with(bob().id)).unwrap();

    a.join(thread).unwrap();
    assert!(wait_until(&a, |s| s.directory.pipeline(thread).is_some_and(|p| p.is_synced())).await);
    a.send_message(thread, "psst").unwrap();
    a.send_message(thread, "still there?").unwrap();

    // Bob has not joined; the thread fan-out still reaches him
    assert!(wait_until(&b, |s| s.directory.unread_count(thread) == 2).await);

    b.mark_read(thread).unwrap();
    assert!(wait_until(&b, |s| s.directory.unread_count(thread) == 0).await);

    // A fresh session sees the server-side counter reset too
    drop(b);
    let b = gateway.connect(&bob()).await.unwrap();
    assert_eq!(b.with_state(|s| s.directory.unread_count(thread)), 0);
}

// ============================================================================
// Presence and Typing Tests
// ============================================================================

#[tokio::test]
async fn test_presence_follows_sessions() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();

    let b = gateway.connect(&bob()).await.unwrap();
    assert!(wait_until(&a, |s| s.presence.is_online(bob().id)).await);
    assert!(wait_until(&b, |s| s.presence.is_online(ada().id)).await);

    b.update_status(PresenceStatus::Away).unwrap();
    assert!(wait_until(&a, |s| s.presence.status_of(bob().id) == PresenceStatus::Away).await);
    assert!(matches!(
        b.update_status(PresenceStatus::Offline),
        Err(ClientError::Validation(_))
    ));

    // A second session keeps Bob online when the first goes away
    let b2 = gateway.connect(&bob()).await.unwrap();
    b.disconnect();
    drop(b);
    let state = gateway.state.clone();
    assert!(wait_for(|| state.connection_manager().get_user_connections(bob().id).len() == 1).await);
    assert!(a.with_state(|s| s.presence.is_online(bob().id)));

    b2.disconnect();
    assert!(wait_until(&a, |s| !s.presence.is_online(bob().id)).await);
}

#[tokio::test]
async fn test_typing_indicator_lifecycle() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let b = gateway.connect(&bob()).await.unwrap();
    let c = gateway.connect(&cleo()).await.unwrap();
    let general = a.with_state(|s| channel_named(s, "general")).unwrap();

    for client in [&a, &b, &c] {
        client.join(general).unwrap();
        assert!(wait_until(client, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);
    }

    b.notify_typing(general);
    c.notify_typing(general);
    assert!(wait_until(&a, |s| s.typing.typing_users(general).len() == 2).await);
    assert_eq!(
        a.with_state(|s| s.typing.typing_label(general)),
        Some("Bob and Cleo are typing…".to_string())
    );

    // Sending stops the indicator
    b.send_message(general, "done").unwrap();
    assert!(wait_until(&a, |s| s.typing.typing_users(general).len() == 1).await);

    // Leaving stops it too
    c.leave(general).unwrap();
    assert!(wait_until(&a, |s| s.typing.typing_users(general).is_empty()).await);
}

#[tokio::test]
async fn test_typing_expires_without_refresh() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let b = gateway.connect(&bob()).await.unwrap();
    let general = a.with_state(|s| channel_named(s, "general")).unwrap();

    a.join(general).unwrap();
    b.join(general).unwrap();
    assert!(wait_until(&b, |s| s.directory.pipeline(general).is_some_and(|p| p.is_synced())).await);

    b.notify_typing(general);
    assert!(wait_until(&a, |s| !s.typing.typing_users(general).is_empty()).await);

    let state = gateway.state.clone();
    assert!(wait_for(|| state.typing().is_empty()).await);
    assert!(wait_until(&a, |s| s.typing.typing_users(general).is_empty()).await);
}

// ============================================================================
// Channel Tests
// ============================================================================

#[tokio::test]
async fn test_private_channel_reaches_members_only() {
    let gateway = TestGateway::start().await.expect("Failed to start gateway");
    let a = gateway.connect(&ada()).await.unwrap();
    let b = gateway.connect(&bob()).await.unwrap();
    let c = gateway.connect(&cleo()).await.unwrap();

    let mut spec = chat_core::ChannelSpec::public("design");
    spec.is_private = true;
    spec.member_ids.insert(bob().id);
    a.create_channel(spec).unwrap();

    assert!(wait_until(&a, |s| channel_named(s, "design").is_some()).await);
    assert!(wait_until(&b, |s| channel_named(s, "design").is_some()).await);

    c.create_channel(chat_core::ChannelSpec::public("random")).unwrap();
    assert!(wait_until(&c, |s| channel_named(s, "random").is_some()).await);
    assert!(c.with_state(|s| channel_named(s, "design")).is_none());
}

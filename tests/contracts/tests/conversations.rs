use reelchat_client::{ChatHandle, ChatSnapshot, InboxHandle, InboxSnapshot};
use reelchat_client::backend::Table;
use reelchat_contracts::World;
use reelchat_messaging::{MediaKind, MessageContent};

#[tokio::test]
async fn get_or_create_never_duplicates_a_pair() {
    let world = World::default();
    let (alice, bob) = (world.sign_in("alice"), world.sign_in("bob"));

    let first = alice.state.conversations().get_or_create(alice.id, bob.id).await.unwrap();
    let second = bob.state.conversations().get_or_create(bob.id, alice.id).await.unwrap();
    let third = alice.state.conversations().get_or_create(alice.id, bob.id).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.id, third.id);
    assert_eq!(world.backend.rows(Table::Conversations).len(), 1);
}

#[tokio::test]
async fn send_receive_round_trip_patches_the_inbox() {
    let world = World::default();
    let (alice, bob) = (world.sign_in("alice"), world.sign_in("bob"));
    let conversation = alice
        .state
        .conversations()
        .get_or_create(alice.id, bob.id)
        .await
        .unwrap();

    let inbox = InboxHandle::open(alice.state.clone()).await.unwrap();
    let loaded = inbox.wait_for(InboxSnapshot::is_ready).await.unwrap();
    assert_eq!(loaded.full_loads, 1);

    let alice_chat = ChatHandle::open(alice.state.clone(), conversation.id).await.unwrap();
    let bob_chat = ChatHandle::open(bob.state.clone(), conversation.id).await.unwrap();
    alice_chat.wait_for(ChatSnapshot::is_ready).await.unwrap();
    bob_chat.wait_for(ChatSnapshot::is_ready).await.unwrap();

    let sent = alice_chat.send("hello").await.unwrap();
    assert!(!sent.is_pending());
    let mine = alice_chat.snapshot();
    assert_eq!(mine.messages.len(), 1);
    assert_eq!(mine.messages[0].id, sent.id);

    let theirs = bob_chat
        .wait_for(|s| s.messages.iter().any(|m| m.id == sent.id))
        .await
        .unwrap();
    assert_eq!(theirs.messages.len(), 1);

    let snapshot = inbox
        .wait_for(|s| {
            s.conversation(conversation.id)
                .is_some_and(|entry| entry.preview() == "hello")
        })
        .await
        .unwrap();
    assert_eq!(snapshot.full_loads, loaded.full_loads);
}

#[tokio::test]
async fn opening_the_chat_clears_its_unread_count() {
    let world = World::default();
    let (alice, bob) = (world.sign_in("alice"), world.sign_in("bob"));
    let conversation = alice
        .state
        .conversations()
        .get_or_create(alice.id, bob.id)
        .await
        .unwrap();
    for text in ["one", "two", "three"] {
        world.seed_message(conversation.id, alice.id, text);
    }

    let inbox = InboxHandle::open(bob.state.clone()).await.unwrap();
    let loaded = inbox
        .wait_for(|s| s.is_ready() && s.live_conversations == 1)
        .await
        .unwrap();
    assert_eq!(loaded.conversation(conversation.id).unwrap().unread, 3);

    let chat = ChatHandle::open(bob.state.clone(), conversation.id).await.unwrap();
    chat.wait_for(|s| s.is_ready() && s.messages.len() == 3).await.unwrap();

    let snapshot = inbox
        .wait_for(|s| s.conversation(conversation.id).is_some_and(|entry| entry.unread == 0))
        .await
        .unwrap();
    assert_eq!(snapshot.total_unread, 0);
}

#[tokio::test]
async fn media_messages_preview_as_labels() {
    assert_eq!(
        MessageContent::parse("__IMAGE__:https://x/y.jpg").preview(),
        "📷 Photo"
    );

    let world = World::default();
    let (alice, bob) = (world.sign_in("alice"), world.sign_in("bob"));
    let conversation = alice
        .state
        .conversations()
        .get_or_create(alice.id, bob.id)
        .await
        .unwrap();
    let inbox = InboxHandle::open(bob.state.clone()).await.unwrap();
    inbox.wait_for(InboxSnapshot::is_ready).await.unwrap();

    let chat = ChatHandle::open(alice.state.clone(), conversation.id).await.unwrap();
    chat.wait_for(ChatSnapshot::is_ready).await.unwrap();
    let sent = chat
        .send_media(MediaKind::Image, "jpg", vec![0xff, 0xd8, 0xff])
        .await
        .unwrap();
    assert!(sent.classify().is_media());

    let snapshot = inbox
        .wait_for(|s| {
            s.conversation(conversation.id)
                .is_some_and(|entry| entry.preview() == "📷 Photo")
        })
        .await
        .unwrap();
    assert!(!snapshot.conversations[0].preview().contains("memory://"));
}

use anyhow::Context;
use reelchat_client::backend::{row, Table};
use reelchat_client::counters::CounterHandle;
use reelchat_client::{
    init_tracing, ChatHandle, ClientState, InboxHandle, MemoryBackend, NotificationsHandle,
    Session, SyncConfig,
};
use reelchat_messaging::{CounterKind, EntityId, Profile, UserId};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

async fn within<T>(what: &str, step: impl Future<Output = T>) -> anyhow::Result<T> {
    tokio::time::timeout(STEP_TIMEOUT, step)
        .await
        .with_context(|| format!("timed out waiting for {what}"))
}

fn sign_in(backend: &MemoryBackend, config: &SyncConfig, username: &str) -> Arc<ClientState> {
    let profile = Profile {
        id: UserId::new(),
        username: username.into(),
        avatar_url: None,
    };
    backend.seed(
        Table::Profiles,
        row([("id", json!(profile.id)), ("username", json!(username))]),
    );
    ClientState::in_memory(config.clone(), Session::signed_in(profile), backend)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = SyncConfig::from_env()?;
    let backend = MemoryBackend::new();
    let alice = sign_in(&backend, &config, "alice");
    let bob = sign_in(&backend, &config, "bob");
    let (alice_id, bob_id) = (alice.session().user_id()?, bob.session().user_id()?);

    let alice_inbox = InboxHandle::open(Arc::clone(&alice)).await?;
    let bob_inbox = InboxHandle::open(Arc::clone(&bob)).await?;
    let conversation = alice_inbox.get_or_create(bob_id).await?;
    info!(conversation_id = %conversation.id, "conversation ready");

    let alice_chat = ChatHandle::open(Arc::clone(&alice), conversation.id).await?;
    let bob_chat = ChatHandle::open(Arc::clone(&bob), conversation.id).await?;

    let sent = alice_chat.send("hello").await?;
    info!(message_id = ?sent.id, "alice sent a message");

    within("bob to receive", bob_chat.wait_for(|s| s.messages.iter().any(|m| m.id == sent.id))).await??;
    let inbox = within("alice's preview", alice_inbox.wait_for(|s| {
        s.conversation(conversation.id)
            .is_some_and(|entry| entry.preview() == "hello")
    }))
    .await??;
    info!(full_loads = inbox.full_loads, "alice's inbox patched without a reload");

    bob_chat.send_typing();
    within("typing indicator", alice_chat.wait_for(|s| s.other_typing)).await??;
    let reply = bob_chat.send("hey alice").await?;
    let chat = within("alice to receive", alice_chat.wait_for(|s| s.messages.iter().any(|m| m.id == reply.id))).await??;
    for row in chat.timeline(alice_id, config.timeline_gap()) {
        info!(mine = row.mine, header = row.show_timestamp, "{}", row.message.content);
    }
    let unread = within("bob's unread badge", bob_inbox.wait_for(|s| s.total_unread == 0)).await??;
    info!(total_unread = unread.total_unread, "bob has read everything");

    backend.seed(Table::Posts, row([("id", json!("1")), ("user_id", json!(alice_id))]));
    let alice_likes = CounterHandle::open(Arc::clone(&alice), CounterKind::PostLikes, EntityId::new("1")).await?;
    let bob_likes = CounterHandle::open(Arc::clone(&bob), CounterKind::PostLikes, EntityId::new("1")).await?;
    within("counter load", bob_likes.wait_for(|s| s.is_ready())).await??;
    bob_likes.toggle().await?;
    let likes = within("like to propagate", alice_likes.wait_for(|s| s.count == 1)).await??;
    info!(count = likes.count, "alice sees bob's like");

    let alice_feed = NotificationsHandle::open(Arc::clone(&alice)).await?;
    let feed = within("like notification", alice_feed.wait_for(|s| s.unread > 0)).await??;
    info!(unread = feed.unread, "alice has notifications");

    alice_chat.close();
    bob_chat.close();
    alice_inbox.close();
    bob_inbox.close();
    alice_likes.close();
    bob_likes.close();
    alice_feed.close();
    info!(subscribers = backend.subscriber_count(), "demo finished");
    Ok(())
}

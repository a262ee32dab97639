use reelchat_client::{ChatHandle, ChatSnapshot};
use reelchat_contracts::World;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn typing_indicator_expires_without_new_events() {
    let world = World::default();
    let (alice, bob) = (world.sign_in("alice"), world.sign_in("bob"));
    let conversation = alice
        .state
        .conversations()
        .get_or_create(alice.id, bob.id)
        .await
        .unwrap();

    let watching = ChatHandle::open(alice.state.clone(), conversation.id).await.unwrap();
    let typing = ChatHandle::open(bob.state.clone(), conversation.id).await.unwrap();
    watching.wait_for(ChatSnapshot::is_ready).await.unwrap();

    typing.send_typing();
    watching.wait_for(|s| s.other_typing).await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(watching.snapshot().other_typing);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!watching.snapshot().other_typing);
}

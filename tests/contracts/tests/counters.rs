use reelchat_client::backend::Table;
use reelchat_client::counters::{CounterHandle, CounterSnapshot, ToggleAction};
use reelchat_client::realtime::ChannelScope;
use reelchat_contracts::World;
use reelchat_messaging::{CountChange, CounterKind, UserId};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn concurrent_likes_converge_for_a_third_viewer() {
    let world = World::default();
    let owner = world.sign_in("owner");
    let post = world.seed_post("100", owner.id);
    let (a, b, c) = (world.sign_in("a"), world.sign_in("b"), world.sign_in("c"));

    let watcher = CounterHandle::open(c.state.clone(), CounterKind::PostLikes, post.clone()).await.unwrap();
    let first = CounterHandle::open(a.state.clone(), CounterKind::PostLikes, post.clone()).await.unwrap();
    let second = CounterHandle::open(b.state.clone(), CounterKind::PostLikes, post.clone()).await.unwrap();
    for counter in [&watcher, &first, &second] {
        counter.wait_for(CounterSnapshot::is_ready).await.unwrap();
    }

    let (x, y) = tokio::join!(first.toggle(), second.toggle());
    assert_eq!((x.unwrap(), y.unwrap()), (ToggleAction::Engaged, ToggleAction::Engaged));

    let stored = world.backend.rows(Table::PostLikes).len() as i64;
    assert_eq!(stored, 2);
    watcher.wait_for(|s| s.count == stored).await.unwrap();
    first.wait_for(|s| s.is_settled() && s.count == stored).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn a_late_lower_broadcast_does_not_stick() {
    let world = World::default();
    let owner = world.sign_in("owner");
    let post = world.seed_post("150", owner.id);
    let (a, c) = (world.sign_in("a"), world.sign_in("c"));

    let watcher = CounterHandle::open(c.state.clone(), CounterKind::PostLikes, post.clone()).await.unwrap();
    let liker = CounterHandle::open(a.state.clone(), CounterKind::PostLikes, post.clone()).await.unwrap();
    for counter in [&watcher, &liker] {
        counter.wait_for(CounterSnapshot::is_ready).await.unwrap();
    }
    world.backend.drop_row_events(true);

    liker.toggle().await.unwrap();
    watcher.wait_for(|s| s.count == 1).await.unwrap();

    // A count read before the like, delivered after its broadcast.
    let outdated = CountChange {
        actor_id: Some(UserId::new()),
        delta: Some(-1),
        count: Some(0),
    };
    a.state
        .channels()
        .broadcast(
            &ChannelScope::Counter(CounterKind::PostLikes, post),
            CountChange::EVENT,
            outdated.to_payload(),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let stored = world.backend.rows(Table::PostLikes).len() as i64;
    assert_eq!(stored, 1);
    assert_eq!(watcher.snapshot().count, stored);
}

#[tokio::test(start_paused = true)]
async fn rapid_toggles_leave_no_drift() {
    let world = World::default();
    let owner = world.sign_in("owner");
    let post = world.seed_post("200", owner.id);
    let viewer = world.sign_in("fan");

    let likes = CounterHandle::open(viewer.state.clone(), CounterKind::PostLikes, post).await.unwrap();
    likes.wait_for(CounterSnapshot::is_ready).await.unwrap();

    let (one, two, three) = tokio::join!(likes.toggle(), likes.toggle(), likes.toggle());
    assert_eq!(one.unwrap(), ToggleAction::Engaged);
    assert_eq!(two.unwrap(), ToggleAction::Disengaged);
    assert_eq!(three.unwrap(), ToggleAction::Engaged);

    let settled = likes.wait_for(CounterSnapshot::is_settled).await.unwrap();
    let stored = world.backend.rows(Table::PostLikes).len() as i64;
    assert_eq!((settled.count, settled.engaged), (stored, true));
    assert_eq!(stored, 1);
}

#[tokio::test(start_paused = true)]
async fn own_likes_do_not_notify() {
    let world = World::default();
    let owner = world.sign_in("owner");
    let post = world.seed_post("300", owner.id);

    let likes = CounterHandle::open(owner.state.clone(), CounterKind::PostLikes, post).await.unwrap();
    likes.wait_for(CounterSnapshot::is_ready).await.unwrap();
    likes.toggle().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(world.backend.rows(Table::Notifications).is_empty());
}

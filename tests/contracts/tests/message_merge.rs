use chrono::{DateTime, Duration, TimeZone, Utc};
use reelchat_client::messaging::{MergeOutcome, MessageStore};
use reelchat_client::{ChatHandle, ChatSnapshot, SyncError};
use reelchat_contracts::World;
use reelchat_messaging::{ConversationId, Message, MessageId, UserId};
use uuid::Uuid;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn confirmed(conversation: ConversationId, sender: UserId, content: &str, second: i64) -> Message {
    Message {
        id: MessageId::Confirmed(Uuid::new_v4()),
        conversation_id: conversation,
        sender_id: sender,
        content: content.into(),
        created_at: base() + Duration::seconds(second),
        read_at: None,
    }
}

fn ready_store(conversation: ConversationId) -> MessageStore {
    let mut store = MessageStore::new(conversation);
    store.finish_loading(Vec::new());
    store
}

fn assert_sorted(store: &MessageStore) {
    assert!(store
        .messages()
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));
}

#[test]
fn merging_the_same_message_twice_changes_nothing() {
    let conversation = ConversationId::new();
    let mut store = ready_store(conversation);
    let message = confirmed(conversation, UserId::new(), "hi", 0);

    assert_eq!(store.merge_remote(message.clone()), MergeOutcome::Inserted);
    let once = store.messages().to_vec();
    assert_eq!(store.merge_remote(message), MergeOutcome::Duplicate);
    assert_eq!(store.messages(), once.as_slice());
}

#[test]
fn realtime_echo_replaces_the_optimistic_entry() {
    let conversation = ConversationId::new();
    let sender = UserId::new();
    let mut store = ready_store(conversation);

    let pending = store.send_optimistic(sender, "hi".into());
    let stored = Message {
        created_at: pending.created_at,
        ..confirmed(conversation, sender, "hi", 0)
    };

    // The echo lands before the send call returns.
    assert!(matches!(store.merge_remote(stored.clone()), MergeOutcome::Confirmed(_)));
    store.confirm_sent(pending.id, stored.clone());

    assert_eq!(store.len(), 1);
    assert_eq!(store.messages()[0].id, stored.id);
    assert!(!store.contains(pending.id));
}

#[test]
fn any_interleaving_stays_in_time_order() {
    let conversation = ConversationId::new();
    let (me, them) = (UserId::new(), UserId::new());
    let batch: Vec<Message> = (0..6)
        .map(|i| confirmed(conversation, them, &format!("m{i}"), i * 10))
        .collect();

    let orders: [[usize; 6]; 4] = [
        [0, 1, 2, 3, 4, 5],
        [5, 4, 3, 2, 1, 0],
        [3, 0, 5, 1, 4, 2],
        [1, 3, 5, 0, 2, 4],
    ];
    for order in orders {
        let mut store = ready_store(conversation);
        for (step, &index) in order.iter().enumerate() {
            match step % 3 {
                0 => {
                    store.merge_remote(batch[index].clone());
                }
                1 => {
                    store.merge_polled_batch(vec![batch[index].clone(), batch[order[0]].clone()]);
                }
                _ => {
                    store.merge_remote(batch[index].clone());
                    store.send_optimistic(me, format!("reply {step}"));
                }
            }
            assert_sorted(&store);
        }
        assert_eq!(store.len(), 6 + 2);
    }
}

#[tokio::test]
async fn failed_send_rolls_back_and_restores_the_draft() {
    let world = World::default();
    let (alice, bob) = (world.sign_in("alice"), world.sign_in("bob"));
    let conversation = alice
        .state
        .conversations()
        .get_or_create(alice.id, bob.id)
        .await
        .unwrap();

    let chat = ChatHandle::open(alice.state.clone(), conversation.id).await.unwrap();
    chat.wait_for(ChatSnapshot::is_ready).await.unwrap();

    world.backend.fail_next_writes(1);
    match chat.send("see you at 8").await {
        Err(SyncError::SendFailed { draft, .. }) => assert_eq!(draft, "see you at 8"),
        other => panic!("expected a failed send, got {other:?}"),
    }

    let snapshot = chat.snapshot();
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.draft.as_deref(), Some("see you at 8"));
    assert_eq!(snapshot.sending, 0);
}

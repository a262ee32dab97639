//! Sends that have been shown optimistically and are waiting on the backend.

use crate::error::SyncResult;
use reelchat_messaging::{Message, MessageId};
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// One in-flight send.
#[derive(Debug)]
pub struct PendingSend {
    pub pending_id: MessageId,
    pub draft: String,
    responder: Option<oneshot::Sender<SyncResult<Message>>>,
}

impl PendingSend {
    /// Resolve the caller waiting on this send, if it is still listening.
    pub fn resolve(mut self, result: SyncResult<Message>) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(result);
        }
    }
}

/// In-flight sends in the order they were made.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: VecDeque<PendingSend>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(
        &mut self,
        pending_id: MessageId,
        draft: String,
        responder: Option<oneshot::Sender<SyncResult<Message>>>,
    ) {
        self.pending.push_back(PendingSend {
            pending_id,
            draft,
            responder,
        });
    }

    pub fn remove(&mut self, pending_id: MessageId) -> Option<PendingSend> {
        let index = self
            .pending
            .iter()
            .position(|send| send.pending_id == pending_id)?;
        self.pending.remove(index)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[tokio::test]
    async fn resolving_a_send_reaches_the_caller() {
        let mut queue = OutboundQueue::new();
        let (tx, rx) = oneshot::channel();
        let id = MessageId::pending();
        queue.enqueue(id, "hi".into(), Some(tx));
        queue.enqueue(MessageId::pending(), "again".into(), None);
        assert_eq!(queue.len(), 2);

        let send = queue.remove(id).unwrap();
        assert_eq!(send.draft, "hi");
        send.resolve(Err(SyncError::EmptyMessage));
        assert!(matches!(rx.await, Ok(Err(SyncError::EmptyMessage))));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn removing_an_unknown_send_is_harmless() {
        let mut queue = OutboundQueue::new();
        assert!(queue.remove(MessageId::pending()).is_none());
        assert!(queue.is_empty());
    }
}

use super::feed::NotificationFeed;
use super::NotificationsSnapshot;
use crate::error::SyncResult;
use crate::messaging::LoadState;
use crate::realtime::ScreenScope;
use crate::repository::NotificationRepository;
use reelchat_messaging::{EntityId, Notification, UserId};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

type Responder = oneshot::Sender<SyncResult<()>>;

pub(super) enum FeedEvent {
    Loaded(SyncResult<Vec<Notification>>),
    Inserted(Notification),
    Updated(Notification),
    Removed(EntityId),
    MarkedRead {
        id: EntityId,
        previous: Option<bool>,
        result: SyncResult<()>,
        responder: Responder,
    },
    MarkedAllRead {
        ids: Vec<EntityId>,
        result: SyncResult<usize>,
        responder: Responder,
    },
    Deleted {
        removed: Option<Notification>,
        result: SyncResult<()>,
        responder: Responder,
    },
}

pub(super) enum FeedCommand {
    MarkRead(EntityId, Responder),
    MarkAllRead(Responder),
    Delete(EntityId, Responder),
    Refresh,
}

pub(super) struct FeedRuntime {
    pub viewer: UserId,
    pub feed: NotificationFeed,
    pub state: LoadState,
    pub realtime: bool,
    pub limit: usize,
    pub notifications: NotificationRepository,
    pub scope: ScreenScope,
    pub events_tx: mpsc::UnboundedSender<FeedEvent>,
    pub events_rx: mpsc::UnboundedReceiver<FeedEvent>,
    pub commands: mpsc::UnboundedReceiver<FeedCommand>,
    pub snapshot: watch::Sender<NotificationsSnapshot>,
}

impl FeedRuntime {
    pub async fn run(mut self) {
        self.load();

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
            }
            if !self.scope.is_active() {
                break;
            }
            self.publish();
        }
        debug!(user_id = %self.viewer, "notification runtime stopped");
    }

    fn publish(&self) {
        self.snapshot.send_replace(NotificationsSnapshot {
            state: self.state,
            notifications: self.feed.entries().to_vec(),
            unread: self.feed.unread_count(),
            realtime: self.realtime,
        });
    }

    fn spawn<F>(&self, work: F)
    where
        F: std::future::Future<Output = FeedEvent> + Send + 'static,
    {
        let events = self.events_tx.clone();
        let scope = self.scope.clone();
        tokio::spawn(async move {
            let event = work.await;
            if scope.is_active() {
                let _ = events.send(event);
            }
        });
    }

    fn load(&self) {
        let notifications = self.notifications.clone();
        let (viewer, limit) = (self.viewer, self.limit);
        self.spawn(async move { FeedEvent::Loaded(notifications.list(viewer, limit).await) });
    }

    fn handle_command(&mut self, cmd: FeedCommand) {
        let notifications = self.notifications.clone();
        match cmd {
            FeedCommand::MarkRead(id, responder) => {
                let previous = self.feed.set_read(&id, true);
                self.spawn(async move {
                    let result = notifications.mark_read(&id).await;
                    FeedEvent::MarkedRead {
                        id,
                        previous,
                        result,
                        responder,
                    }
                });
            }
            FeedCommand::MarkAllRead(responder) => {
                let ids = self.feed.mark_all_read();
                let viewer = self.viewer;
                self.spawn(async move {
                    FeedEvent::MarkedAllRead {
                        ids,
                        result: notifications.mark_all_read(viewer).await,
                        responder,
                    }
                });
            }
            FeedCommand::Delete(id, responder) => {
                let removed = self.feed.remove(&id);
                self.spawn(async move {
                    FeedEvent::Deleted {
                        removed,
                        result: notifications.delete(&id).await,
                        responder,
                    }
                });
            }
            FeedCommand::Refresh => self.load(),
        }
    }

    fn handle_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Loaded(Ok(list)) => {
                debug!(user_id = %self.viewer, count = list.len(), "notifications loaded");
                self.feed.replace_all(list);
                self.state = LoadState::Ready;
            }
            FeedEvent::Loaded(Err(err)) => {
                warn!(user_id = %self.viewer, %err, "failed to load notifications");
                self.state = LoadState::Ready;
            }
            FeedEvent::Inserted(notification) => {
                if notification.user_id == self.viewer {
                    self.feed.insert(notification);
                }
            }
            FeedEvent::Updated(notification) => {
                self.feed.update(notification);
            }
            FeedEvent::Removed(id) => {
                self.feed.remove(&id);
            }
            FeedEvent::MarkedRead {
                id,
                previous,
                result,
                responder,
            } => {
                if let Err(err) = &result {
                    warn!(notification_id = %id, %err, "mark read failed, reverting");
                    if let Some(previous) = previous {
                        self.feed.set_read(&id, previous);
                    }
                }
                let _ = responder.send(result);
            }
            FeedEvent::MarkedAllRead {
                ids,
                result,
                responder,
            } => match result {
                Ok(marked) => {
                    debug!(user_id = %self.viewer, marked, "all notifications read");
                    let _ = responder.send(Ok(()));
                }
                Err(err) => {
                    warn!(user_id = %self.viewer, %err, "mark all read failed, reverting");
                    for id in &ids {
                        self.feed.set_read(id, false);
                    }
                    let _ = responder.send(Err(err));
                }
            },
            FeedEvent::Deleted {
                removed,
                result,
                responder,
            } => {
                if let Err(err) = &result {
                    warn!(user_id = %self.viewer, %err, "delete failed, restoring notification");
                    if let Some(notification) = removed {
                        self.feed.insert(notification);
                    }
                }
                let _ = responder.send(result);
            }
        }
    }
}

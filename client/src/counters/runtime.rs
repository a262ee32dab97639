use super::state::{CounterState, Debounce, Step, ToggleAction};
use super::CounterSnapshot;
use crate::error::{SyncError, SyncResult};
use crate::messaging::LoadState;
use crate::realtime::{ChannelManager, ChannelScope, ScreenScope};
use crate::repository::{CounterRepository, NewNotification, NotificationRepository};
use reelchat_messaging::{Comment, CountChange, CounterKind, EntityId, NotificationKind, UserId};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

pub(super) struct Fetched {
    /// Issue order of the read; older reads never overwrite newer ones.
    seq: u64,
    count: i64,
    engaged: bool,
}

pub(super) struct Applied {
    /// Count read back after the write; `None` if that read failed.
    count: Option<i64>,
    comment: Option<Comment>,
}

pub(super) enum CounterEvent {
    Loaded(SyncResult<Fetched>),
    Broadcast(CountChange),
    RowChanged,
    Refetched(SyncResult<Fetched>),
    Applied(SyncResult<Applied>),
    Following(SyncResult<i64>),
}

pub(super) enum CounterCommand {
    Toggle(oneshot::Sender<SyncResult<ToggleAction>>),
    Comment {
        text: String,
        parent: Option<EntityId>,
        responder: oneshot::Sender<SyncResult<Comment>>,
    },
    Refresh,
}

/// A queued write and whoever is waiting on it.
pub(super) enum Mutation {
    Toggle {
        action: ToggleAction,
        responder: oneshot::Sender<SyncResult<ToggleAction>>,
    },
    Comment {
        text: String,
        parent: Option<EntityId>,
        responder: oneshot::Sender<SyncResult<Comment>>,
    },
}

impl Mutation {
    fn step(&self) -> Step {
        match self {
            Self::Toggle { action, .. } => Step::Toggle(*action),
            Self::Comment { .. } => Step::Comment,
        }
    }

    fn fail(self, err: SyncError) {
        match self {
            Self::Toggle { responder, .. } => {
                let _ = responder.send(Err(err));
            }
            Self::Comment { responder, .. } => {
                let _ = responder.send(Err(err));
            }
        }
    }
}

pub(super) struct CounterRuntime {
    pub kind: CounterKind,
    pub entity: EntityId,
    pub viewer: UserId,
    pub counter: CounterState,
    pub debounce: Debounce,
    pub state: LoadState,
    pub realtime: bool,
    pub following: Option<i64>,
    /// Writes waiting their turn; the front one runs once `in_flight` clears.
    pub queue: VecDeque<Mutation>,
    pub in_flight: Option<Mutation>,
    /// Remote signals were set aside while local writes were pending.
    pub stale: bool,
    /// Reads issued so far, and the newest one applied.
    pub fetches_issued: u64,
    pub fetch_applied: u64,
    pub counters: CounterRepository,
    pub notifications: NotificationRepository,
    pub channels: ChannelManager,
    pub scope: ScreenScope,
    pub events_tx: mpsc::UnboundedSender<CounterEvent>,
    pub events_rx: mpsc::UnboundedReceiver<CounterEvent>,
    pub commands: mpsc::UnboundedReceiver<CounterCommand>,
    pub snapshot: watch::Sender<CounterSnapshot>,
}

impl CounterRuntime {
    pub async fn run(mut self) {
        self.load();

        loop {
            let flush_at = self.debounce.deadline();
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
                _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    self.flush();
                }
            }
            if !self.scope.is_active() {
                break;
            }
            self.publish();
        }
        debug!(entity = %self.entity, kind = ?self.kind, "counter runtime stopped");
    }

    fn publish(&self) {
        self.snapshot.send_replace(CounterSnapshot {
            kind: self.kind,
            entity: self.entity.clone(),
            state: self.state,
            count: self.counter.count(),
            engaged: self.counter.engaged(),
            pending: self.counter.pending_len(),
            following: self.following,
            realtime: self.realtime,
        });
    }

    fn spawn<F>(&self, work: F)
    where
        F: std::future::Future<Output = CounterEvent> + Send + 'static,
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

    fn fetch(&mut self) -> impl std::future::Future<Output = SyncResult<Fetched>> + Send + 'static {
        self.fetches_issued += 1;
        let seq = self.fetches_issued;
        let counters = self.counters.clone();
        let (kind, entity, viewer) = (self.kind, self.entity.clone(), self.viewer);
        async move {
            let count = counters.count(kind, &entity).await?;
            let engaged = counters.is_engaged(kind, &entity, viewer).await?;
            Ok(Fetched { seq, count, engaged })
        }
    }

    fn load(&mut self) {
        let fetch = self.fetch();
        self.spawn(async move { CounterEvent::Loaded(fetch.await) });
        self.refresh_following();
    }

    fn refetch(&mut self) {
        let fetch = self.fetch();
        self.spawn(async move { CounterEvent::Refetched(fetch.await) });
        self.refresh_following();
    }

    /// Profile counters also show how many accounts the profile owner follows.
    fn refresh_following(&self) {
        if self.kind != CounterKind::Followers {
            return;
        }
        let Ok(target) = Uuid::parse_str(self.entity.as_str()) else {
            return;
        };
        let counters = self.counters.clone();
        self.spawn(async move {
            CounterEvent::Following(counters.following_count(UserId(target)).await)
        });
    }

    fn handle_command(&mut self, cmd: CounterCommand) {
        match cmd {
            CounterCommand::Toggle(responder) => {
                let action = self.counter.begin_toggle();
                self.queue.push_back(Mutation::Toggle { action, responder });
                self.start_next();
            }
            CounterCommand::Comment {
                text,
                parent,
                responder,
            } => {
                self.counter.begin_comment();
                self.queue.push_back(Mutation::Comment {
                    text,
                    parent,
                    responder,
                });
                self.start_next();
            }
            CounterCommand::Refresh => self.refetch(),
        }
    }

    /// Writes run one at a time, in request order.
    fn start_next(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(mutation) = self.queue.pop_front() else {
            return;
        };
        let counters = self.counters.clone();
        let (kind, entity, viewer) = (self.kind, self.entity.clone(), self.viewer);
        match &mutation {
            Mutation::Toggle { action, .. } => {
                let action = *action;
                self.spawn(async move {
                    let written = match action {
                        ToggleAction::Engaged => counters.engage(kind, &entity, viewer).await,
                        ToggleAction::Disengaged => counters.disengage(kind, &entity, viewer).await,
                    };
                    let result = match written {
                        Ok(()) => Ok(Applied {
                            count: counters.count(kind, &entity).await.ok(),
                            comment: None,
                        }),
                        Err(err) => Err(err),
                    };
                    CounterEvent::Applied(result)
                });
            }
            Mutation::Comment { text, parent, .. } => {
                let (text, parent) = (text.clone(), parent.clone());
                self.spawn(async move {
                    let result = match counters.add_comment(&entity, viewer, &text, parent.as_ref()).await {
                        Ok(comment) => Ok(Applied {
                            count: counters.count(kind, &entity).await.ok(),
                            comment: Some(comment),
                        }),
                        Err(err) => Err(err),
                    };
                    CounterEvent::Applied(result)
                });
            }
        }
        self.in_flight = Some(mutation);
    }

    fn handle_event(&mut self, event: CounterEvent) {
        match event {
            CounterEvent::Loaded(result) => {
                self.state = LoadState::Ready;
                match result {
                    Ok(fetched) => self.apply_fetched(fetched),
                    Err(err) => warn!(entity = %self.entity, kind = ?self.kind, %err, "failed to load counter"),
                }
            }
            CounterEvent::Broadcast(change) => self.debounce.broadcast(&change, Instant::now()),
            CounterEvent::RowChanged => self.debounce.row_change(Instant::now()),
            CounterEvent::Refetched(Ok(fetched)) => self.apply_fetched(fetched),
            CounterEvent::Refetched(Err(err)) => {
                debug!(entity = %self.entity, %err, "counter refetch failed");
            }
            CounterEvent::Following(Ok(count)) => self.following = Some(count),
            CounterEvent::Following(Err(err)) => {
                debug!(entity = %self.entity, %err, "following count unavailable");
            }
            CounterEvent::Applied(result) => self.finish_mutation(result),
        }
    }

    fn apply_fetched(&mut self, fetched: Fetched) {
        if fetched.seq < self.fetch_applied {
            debug!(entity = %self.entity, seq = fetched.seq, "dropping outdated counter read");
            return;
        }
        if self.counter.offer_authoritative(fetched.count, Some(fetched.engaged)) {
            self.fetch_applied = fetched.seq;
        } else {
            self.stale = true;
        }
    }

    fn flush(&mut self) {
        let Some(flush) = self.debounce.take(Instant::now()) else {
            return;
        };
        if self.counter.has_pending() {
            self.stale = true;
            return;
        }
        if let Some(count) = flush.interim_count() {
            self.counter.offer_authoritative(count, flush.own_engaged);
        }
        self.refetch();
    }

    fn finish_mutation(&mut self, result: SyncResult<Applied>) {
        let Some(mutation) = self.in_flight.take() else {
            return;
        };
        match result {
            Ok(applied) => {
                let step = mutation.step();
                let (confirmed, _) = self.counter.confirmed();
                let count = applied.count.unwrap_or(confirmed + step.delta());
                self.counter.confirm_front(count);
                self.announce(step.delta(), count);

                match mutation {
                    Mutation::Toggle { action, responder } => {
                        if action == ToggleAction::Engaged {
                            self.notify_owner(self.kind, self.entity.clone(), None);
                        }
                        let _ = responder.send(Ok(action));
                    }
                    Mutation::Comment {
                        text,
                        parent,
                        responder,
                    } => {
                        self.notify_owner(CounterKind::PostComments, self.entity.clone(), Some(text.clone()));
                        if let Some(parent) = parent {
                            self.notify_reply(parent, text);
                        }
                        let reply = applied.comment.ok_or_else(|| {
                            SyncError::InvalidAction("comment was stored but not returned".into())
                        });
                        let _ = responder.send(reply);
                    }
                }
            }
            Err(err) => {
                let dropped = self.counter.fail_all();
                warn!(entity = %self.entity, kind = ?self.kind, dropped, %err, "counter change failed, reverting");
                mutation.fail(err);
                for queued in self.queue.drain(..) {
                    queued.fail(SyncError::InvalidAction(
                        "cancelled after an earlier change failed".into(),
                    ));
                }
                self.refetch();
            }
        }

        if self.queue.is_empty() && std::mem::take(&mut self.stale) {
            self.refetch();
        }
        self.start_next();
    }

    /// Tell other viewers of this entity about a confirmed change.
    fn announce(&self, delta: i64, count: i64) {
        let channels = self.channels.clone();
        let scope = ChannelScope::Counter(self.kind, self.entity.clone());
        let payload = CountChange {
            actor_id: Some(self.viewer),
            delta: Some(delta),
            count: Some(count),
        }
        .to_payload();
        tokio::spawn(async move {
            if let Err(err) = channels.broadcast(&scope, CountChange::EVENT, payload).await {
                debug!(%err, "count change not broadcast");
            }
        });
    }

    fn notify_owner(&self, kind: CounterKind, entity: EntityId, comment: Option<String>) {
        let post_id = match kind {
            CounterKind::PostLikes | CounterKind::PostComments => Some(entity.clone()),
            CounterKind::CommentLikes | CounterKind::Followers => None,
        };
        let counters = self.counters.clone();
        let notifications = self.notifications.clone();
        let actor = self.viewer;
        tokio::spawn(async move {
            match counters.owner_of(kind, &entity).await {
                Ok(Some(recipient)) => {
                    notifications
                        .notify(NewNotification {
                            recipient,
                            actor,
                            kind: kind.notification(),
                            post_id,
                            comment,
                        })
                        .await
                }
                Ok(None) => debug!(%entity, "no owner to notify"),
                Err(err) => debug!(%entity, %err, "owner lookup failed"),
            }
        });
    }

    fn notify_reply(&self, parent: EntityId, comment: String) {
        let counters = self.counters.clone();
        let notifications = self.notifications.clone();
        let actor = self.viewer;
        let post_id = Some(self.entity.clone());
        tokio::spawn(async move {
            if let Ok(Some(recipient)) = counters.owner_of(CounterKind::CommentLikes, &parent).await {
                notifications
                    .notify(NewNotification {
                        recipient,
                        actor,
                        kind: NotificationKind::Reply,
                        post_id,
                        comment: Some(comment),
                    })
                    .await;
            }
        });
    }
}

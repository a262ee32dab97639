//! Counter state with optimistic steps, and the debounce window for remote signals.

use reelchat_messaging::{CountChange, CounterKind, UserId};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// What a toggle did from the viewer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Engaged,
    Disengaged,
}

impl ToggleAction {
    pub fn delta(self) -> i64 {
        match self {
            Self::Engaged => 1,
            Self::Disengaged => -1,
        }
    }
}

/// One optimistic change waiting for its backing mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Toggle(ToggleAction),
    Comment,
}

impl Step {
    pub fn delta(self) -> i64 {
        match self {
            Self::Toggle(action) => action.delta(),
            Self::Comment => 1,
        }
    }
}

/// Last confirmed count and viewer flag, plus optimistic steps applied on top in
/// request order.
#[derive(Debug, Clone)]
pub struct CounterState {
    kind: CounterKind,
    confirmed_count: i64,
    confirmed_engaged: bool,
    pending: VecDeque<Step>,
}

impl CounterState {
    pub fn new(kind: CounterKind) -> Self {
        Self {
            kind,
            confirmed_count: 0,
            confirmed_engaged: false,
            pending: VecDeque::new(),
        }
    }

    pub fn kind(&self) -> CounterKind {
        self.kind
    }

    pub fn count(&self) -> i64 {
        let count = self.confirmed_count + self.pending.iter().map(|step| step.delta()).sum::<i64>();
        count.max(0)
    }

    pub fn engaged(&self) -> bool {
        self.pending
            .iter()
            .rev()
            .find_map(|step| match step {
                Step::Toggle(action) => Some(*action == ToggleAction::Engaged),
                Step::Comment => None,
            })
            .unwrap_or(self.confirmed_engaged)
    }

    pub fn confirmed(&self) -> (i64, bool) {
        (self.confirmed_count, self.confirmed_engaged)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flip the displayed flag and count at once.
    pub fn begin_toggle(&mut self) -> ToggleAction {
        let action = if self.engaged() {
            ToggleAction::Disengaged
        } else {
            ToggleAction::Engaged
        };
        self.pending.push_back(Step::Toggle(action));
        action
    }

    pub fn begin_comment(&mut self) {
        self.pending.push_back(Step::Comment);
    }

    /// The oldest step's mutation succeeded and `count` was read back afterwards.
    pub fn confirm_front(&mut self, count: i64) -> Option<Step> {
        let step = self.pending.pop_front()?;
        if let Step::Toggle(action) = step {
            self.confirmed_engaged = action == ToggleAction::Engaged;
        }
        self.confirmed_count = count;
        Some(step)
    }

    /// A mutation failed: every optimistic step goes, back to the confirmed state.
    pub fn fail_all(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Install an authoritative value unless a local change is in flight, in which case
    /// the read-back after that change wins. Returns whether it was applied.
    pub fn offer_authoritative(&mut self, count: i64, engaged: Option<bool>) -> bool {
        if self.has_pending() {
            return false;
        }
        self.confirmed_count = count;
        if let Some(engaged) = engaged {
            self.confirmed_engaged = engaged;
        }
        true
    }
}

/// Remote signals collected during one debounce window. Every flush ends in a re-read
/// of the backing store; broadcasts can arrive out of order, so their counts are only
/// shown until that read lands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flush {
    /// A row-level change arrived.
    pub row_signal: bool,
    /// Latest broadcast count seen.
    pub count: Option<i64>,
    /// The viewer's own flag as implied by a broadcast from another of their devices.
    pub own_engaged: Option<bool>,
}

impl Flush {
    /// Broadcast count to display while the re-read is in flight. A row change in the
    /// same window means the broadcast may already be behind, so nothing is shown.
    pub fn interim_count(&self) -> Option<i64> {
        if self.row_signal {
            None
        } else {
            self.count
        }
    }
}

/// Coalesces broadcast and row-change signals that land within one window.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    viewer: UserId,
    deadline: Option<Instant>,
    batch: Flush,
}

impl Debounce {
    pub fn new(window: Duration, viewer: UserId) -> Self {
        Self {
            window,
            viewer,
            deadline: None,
            batch: Flush::default(),
        }
    }

    fn arm(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.window);
        }
    }

    pub fn broadcast(&mut self, change: &CountChange, now: Instant) {
        if let Some(count) = change.count {
            self.batch.count = Some(count);
        }
        if change.actor_id == Some(self.viewer) {
            if let Some(delta) = change.delta {
                self.batch.own_engaged = Some(delta > 0);
            }
        }
        self.arm(now);
    }

    pub fn row_change(&mut self, now: Instant) {
        self.batch.row_signal = true;
        self.arm(now);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Hand over the batch once the window has passed.
    pub fn take(&mut self, now: Instant) -> Option<Flush> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(std::mem::take(&mut self.batch))
            }
            _ => None,
        }
    }
}

//! Fixed-interval reconciliation timer.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Ticks every `period`, starting one period after creation (the screen's initial
/// load covers time zero). Late ticks are delayed rather than bunched up.
#[derive(Debug)]
pub struct PollTimer {
    interval: Interval,
}

impl PollTimer {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

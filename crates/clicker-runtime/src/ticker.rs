//! Periodic driver for passive income.

use crate::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Background task that ticks a session at a fixed period.
///
/// Each tick passes the time measured since the previous one, so a stalled
/// or suspended process catches up on its next tick. Dropping the ticker
/// stops it.
pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Must be called from within a Tokio runtime.
    pub fn spawn(session: Arc<Session>, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            let mut last = Instant::now();
            debug!(period_ms = period.as_millis() as u64, "ticker started");
            loop {
                interval.tick().await;
                let now = Instant::now();
                session.tick(now.duration_since(last));
                last = now;
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

//! The session clock: a ticking timer with a hard budget.

use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info};

/// Handle to a running session clock.
///
/// Dropping the handle stops the clock, so a discarded clock can never fire.
#[derive(Debug)]
pub struct ClockHandle {
    task: Option<JoinHandle<()>>,
}

impl ClockHandle {
    /// Stops ticking. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Session clock stopped.");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct SessionClock;

impl SessionClock {
    /// Starts a clock that calls `on_tick` with the elapsed tick count after
    /// every `tick`, and calls `on_expiry` exactly once when the count reaches
    /// `budget_ticks`. The clock stops itself after expiring.
    ///
    /// `on_expiry` runs inside the clock task. If it needs to stop the clock
    /// (for example by releasing the session), it must hand that work to a
    /// separate task.
    pub fn start<T, E>(tick: Duration, budget_ticks: u64, on_tick: T, on_expiry: E) -> ClockHandle
    where
        T: Fn(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut elapsed = 0u64;
            while elapsed < budget_ticks {
                interval.tick().await;
                elapsed += 1;
                on_tick(elapsed);
            }
            info!(elapsed, "Session budget exhausted.");
            on_expiry();
        });
        ClockHandle { task: Some(task) }
    }
}

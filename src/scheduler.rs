//! Daily revert scheduler.
//!
//! One background thread sleeps until the configured time of day, asks the
//! manager to revert to the baseline, and loops. Time and sleeping go through
//! [`Clock`] so tests can drive the loop without waiting a day.

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::allowlist::AllowlistManager;
use crate::error::{AllowlistError, Result};
use crate::signal::ShutdownToken;

/// Longest single sleep, bounding how long a cancelled scheduler lingers.
const SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Source of wall time and sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
    fn sleep(&self, duration: Duration);
}

/// Local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Time from `now` until the next `at`, strictly in the future.
pub fn duration_until(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    };
    (next - now).to_std().unwrap_or_default()
}

/// Start the revert loop on a named thread.
///
/// The thread exits when `token` is cancelled or the manager is dropped.
pub fn spawn(
    manager: Weak<AllowlistManager>,
    clock: Arc<dyn Clock>,
    at: NaiveTime,
    token: ShutdownToken,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("allowlist-revert".to_string())
        .spawn(move || run(&manager, clock.as_ref(), at, &token))
        .map_err(AllowlistError::Scheduler)
}

fn run(manager: &Weak<AllowlistManager>, clock: &dyn Clock, at: NaiveTime, token: &ShutdownToken) {
    loop {
        let now = clock.now();
        let wait = duration_until(now, at);
        info!("Reverting allowlist in ~{} minutes", wait.as_secs().div_ceil(60));

        let due = now + TimeDelta::from_std(wait).unwrap_or(TimeDelta::days(1));
        if !sleep_until(clock, due, manager, token) {
            break;
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };
        info!("Reverting allowlist to baseline subnets");
        if let Err(e) = manager.reset_and_reseed() {
            error!(error = %e, "Daily revert failed");
        }
    }
    debug!("Revert scheduler stopped");
}

/// Sleep until `due`. Returns false when the loop should stop instead.
fn sleep_until(
    clock: &dyn Clock,
    due: NaiveDateTime,
    manager: &Weak<AllowlistManager>,
    token: &ShutdownToken,
) -> bool {
    loop {
        if token.is_cancelled() || manager.strong_count() == 0 {
            return false;
        }
        match (due - clock.now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => clock.sleep(remaining.min(SLEEP_SLICE)),
            _ => return true,
        }
    }
}

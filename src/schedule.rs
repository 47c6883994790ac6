/* src/schedule.rs */

use std::time::Duration;

use rand::Rng;

use crate::cache::{CdnRangeCache, SyncOutcome};
use crate::settings::{SettingsProvider, SharedSettings};

/// Name of the recurring CDN refresh job.
pub const REFRESH_JOB: &str = "real_ip_cdn_refresh";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const MIN_INITIAL_DELAY_SECS: u64 = 5 * 60;
const MAX_INITIAL_DELAY_SECS: u64 = 30 * 60;

/// When a recurring job first fires and how often it repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl RefreshSchedule {
    /// Daily, first run 5 to 30 minutes from now so installations don't all hit upstream at once.
    pub fn daily() -> Self {
        let delay = rand::thread_rng().gen_range(MIN_INITIAL_DELAY_SECS..=MAX_INITIAL_DELAY_SECS);
        Self {
            initial_delay: Duration::from_secs(delay),
            interval: DAY,
        }
    }
}

/// External recurring-job facility. The crate has no timer of its own.
pub trait Scheduler {
    fn is_scheduled(&self, job: &str) -> bool;
    fn schedule(&self, job: &str, schedule: RefreshSchedule);
    fn clear(&self, job: &str);
}

/// Register the daily refresh unless it is already registered.
pub fn activate(scheduler: &dyn Scheduler) {
    if scheduler.is_scheduled(REFRESH_JOB) {
        return;
    }
    let schedule = RefreshSchedule::daily();
    tracing::info!(initial_delay = ?schedule.initial_delay, "scheduling daily CDN refresh");
    scheduler.schedule(REFRESH_JOB, schedule);
}

pub fn deactivate(scheduler: &dyn Scheduler) {
    scheduler.clear(REFRESH_JOB);
}

/// Remove every trace: the job, stored settings and the cached ranges.
pub fn uninstall(scheduler: &dyn Scheduler, settings: &SharedSettings, cdn: &CdnRangeCache) {
    deactivate(scheduler);
    settings.reset();
    cdn.invalidate();
}

/// Body of the scheduled job.
pub fn run_scheduled_refresh(settings: &dyn SettingsProvider, cdn: &CdnRangeCache) -> SyncOutcome {
    let outcome = cdn.force_refresh(&settings.settings());
    tracing::debug!(%outcome, "scheduled CDN refresh finished");
    outcome
}

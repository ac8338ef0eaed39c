//! Periodic driver for refresh cycles.
//!
//! A job is anything implementing [`Refresh`]. Failures come back as
//! [`UpdateFailed`] and are logged; they never stop the loop.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::error::UpdateFailed;

#[async_trait]
pub trait Refresh: Send + Sync {
    fn name(&self) -> &str;

    async fn refresh_cycle(&self) -> Result<(), UpdateFailed>;
}

/// "Run every interval, call this, route failures to `UpdateFailed`."
pub trait Scheduler {
    fn schedule(&self, every: Duration, job: Arc<dyn Refresh>) -> ScheduledJob;
}

/// Handle on a running job. Dropping it stops the job.
pub struct ScheduledJob {
    handle: JoinHandle<()>,
}

impl ScheduledJob {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledJob {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Tokio interval. First cycle runs immediately; late ticks are skipped, never bunched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntervalScheduler;

impl Scheduler for IntervalScheduler {
    fn schedule(&self, every: Duration, job: Arc<dyn Refresh>) -> ScheduledJob {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut outcomes = OutcomeLog::default();
            info!(job = job.name(), interval_secs = every.as_secs(), "scheduler started");

            loop {
                ticker.tick().await;
                let outcome = job.refresh_cycle().await;
                outcomes.record(job.name(), &outcome);
            }
        });
        ScheduledJob { handle }
    }
}

/// Logs the first failure of a streak and the recovery, not every failed tick.
#[derive(Debug, Default)]
pub struct OutcomeLog {
    failing: bool,
    consecutive_failures: u32,
}

impl OutcomeLog {
    /// Returns true when the outcome was worth logging.
    pub fn record(&mut self, job: &str, outcome: &Result<(), UpdateFailed>) -> bool {
        match outcome {
            Ok(()) if self.failing => {
                info!(
                    job,
                    failed_cycles = self.consecutive_failures,
                    "data source is available again"
                );
                self.failing = false;
                self.consecutive_failures = 0;
                true
            }
            Ok(()) => false,
            Err(err) => {
                self.consecutive_failures += 1;
                if self.failing {
                    return false;
                }
                self.failing = true;
                error!(job, "update failed: {}", err);
                true
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter {
        runs: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Refresh for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn refresh_cycle(&self) -> Result<(), UpdateFailed> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(UpdateFailed::new("boom"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_outcome_log_reports_streak_edges_only() {
        let mut log = OutcomeLog::default();
        assert!(!log.record("job", &Ok(())));
        assert!(log.record("job", &Err(UpdateFailed::new("down"))));
        assert!(!log.record("job", &Err(UpdateFailed::new("down"))));
        assert_eq!(log.consecutive_failures(), 2);
        assert!(log.record("job", &Ok(())));
        assert_eq!(log.consecutive_failures(), 0);
        assert!(!log.record("job", &Ok(())));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_loop() {
        let job = Arc::new(Counter {
            runs: AtomicU32::new(0),
            fail: true,
        });
        let scheduled = IntervalScheduler.schedule(Duration::from_millis(10), job.clone());
        tokio::time::sleep(Duration::from_millis(75)).await;
        assert!(job.runs.load(Ordering::SeqCst) >= 3);
        assert!(!scheduled.is_finished());
        scheduled.cancel();
    }

    #[tokio::test]
    async fn test_dropping_the_job_stops_it() {
        let job = Arc::new(Counter {
            runs: AtomicU32::new(0),
            fail: false,
        });
        let scheduled = IntervalScheduler.schedule(Duration::from_millis(10), job.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(scheduled);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = job.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), after_drop);
    }
}

/**
 * REFRESH COORDINATOR - Cycle fetch → normalize → publish
 *
 * ROLE:
 * Owns the single cached snapshot of pool data. Each cycle fetches the user
 * profile (gating), then the supplementary endpoints concurrently (best
 * effort), builds a brand new record and swaps it in as a whole.
 *
 * CYCLE:
 *   Idle → Fetching → Normalizing → {Published | FailedCycle} → Idle
 *
 * INVARIANTS:
 * - at most one cycle runs at a time (async mutex, callers queue)
 * - the snapshot is only replaced by the last synchronous step of a cycle,
 *   so a cancelled cycle leaves it untouched
 * - a failed cycle keeps the previous data `Arc` and only flips the status
 */

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::api::{DateRange, Endpoint, PoolApi, DEFAULT_COIN, DEFAULT_HASH_RATE_GROUP, DEFAULT_HISTORY_DAYS};
use crate::error::{ApiResult, UpdateFailed};
use crate::normalize::{Normalizer, PoolData, PoolDetails};
use crate::publisher::Publisher;
use crate::scheduler::Refresh;
use crate::state::{new_state, Shared};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub coin: String,
    pub hash_rate_group: String,
    pub history_days: u16,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            coin: DEFAULT_COIN.to_string(),
            hash_rate_group: DEFAULT_HASH_RATE_GROUP.to_string(),
            history_days: DEFAULT_HISTORY_DAYS,
        }
    }
}

/// Last-known-good data plus the outcome of the most recent cycle.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub data: Option<Arc<PoolData>>,
    pub last_update_success: bool,
    pub last_attempt: Option<OffsetDateTime>,
    pub last_success: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Fetching,
    Normalizing,
    Published,
    FailedCycle,
}

/// Puts the phase back to `Idle` when a cycle ends, including on cancellation.
struct IdleOnDrop<'a>(&'a Shared<CyclePhase>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock() = CyclePhase::Idle;
    }
}

pub struct RefreshCoordinator {
    api: Arc<dyn PoolApi>,
    publisher: Arc<dyn Publisher>,
    settings: CoordinatorSettings,
    snapshot: Shared<Arc<CacheSnapshot>>,
    phase: Shared<CyclePhase>,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl RefreshCoordinator {
    pub fn new(
        api: Arc<dyn PoolApi>,
        publisher: Arc<dyn Publisher>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            api,
            publisher,
            settings,
            snapshot: new_state(Arc::new(CacheSnapshot::default())),
            phase: new_state(CyclePhase::Idle),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        Arc::clone(&self.snapshot.lock())
    }

    pub fn data(&self) -> Option<Arc<PoolData>> {
        self.snapshot.lock().data.clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.snapshot.lock().last_update_success
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: CyclePhase) {
        debug!(?phase, "refresh cycle phase");
        *self.phase.lock() = phase;
    }

    /// Runs one cycle. Concurrent callers wait for the running cycle, then run their own.
    pub async fn refresh(&self) -> Result<Arc<PoolData>, UpdateFailed> {
        let _single_flight = self.cycle_lock.lock().await;
        let _idle = IdleOnDrop(&self.phase);
        let attempted_at = OffsetDateTime::now_utc();

        match self.run_cycle().await {
            Ok(data) => {
                let data = Arc::new(data);
                let snapshot = Arc::new(CacheSnapshot {
                    data: Some(Arc::clone(&data)),
                    last_update_success: true,
                    last_attempt: Some(attempted_at),
                    last_success: Some(attempted_at),
                    last_error: None,
                });
                self.commit(Arc::clone(&snapshot), CyclePhase::Published);
                debug!(
                    defaulted = data.details.defaulted.len(),
                    "published fresh pool data"
                );
                self.publisher.publish(snapshot).await;
                Ok(data)
            }
            Err(err) => {
                let failed = UpdateFailed::from(err);
                let previous = self.snapshot();
                let snapshot = Arc::new(CacheSnapshot {
                    data: previous.data.clone(),
                    last_update_success: false,
                    last_attempt: Some(attempted_at),
                    last_success: previous.last_success,
                    last_error: Some(failed.message.clone()),
                });
                self.commit(Arc::clone(&snapshot), CyclePhase::FailedCycle);
                if failed.auth_failed {
                    warn!("Braiins Pool rejected the API key, check the configured credential");
                }
                self.publisher.publish(snapshot).await;
                Err(failed)
            }
        }
    }

    fn commit(&self, snapshot: Arc<CacheSnapshot>, phase: CyclePhase) {
        *self.snapshot.lock() = snapshot;
        self.set_phase(phase);
    }

    async fn run_cycle(&self) -> ApiResult<PoolData> {
        let coin = self.settings.coin.as_str();
        let group = self.settings.hash_rate_group.as_str();

        self.set_phase(CyclePhase::Fetching);
        let profile = self.api.user_profile(coin).await?;

        let range = DateRange::last_days(self.settings.history_days);
        let (stats, rewards, hash_rate, blocks, workers, payouts) = tokio::join!(
            best_effort(Endpoint::PoolStats, self.api.pool_stats(coin)),
            best_effort(Endpoint::DailyRewards, self.api.daily_rewards(coin)),
            best_effort(Endpoint::DailyHashRate, self.api.daily_hash_rate(coin, group)),
            best_effort(Endpoint::BlockRewards, self.api.block_rewards(coin, &range)),
            best_effort(Endpoint::Workers, self.api.workers(coin)),
            best_effort(Endpoint::Payouts, self.api.payouts(coin, &range)),
        );

        self.set_phase(CyclePhase::Normalizing);
        let mut normalizer = Normalizer::new(coin);
        let figures = normalizer.profile(&profile);
        let pool_5m_hash_rate = normalizer.pool_hash_rate(&profile, stats.as_ref());
        let mut details = PoolDetails {
            latest_daily_reward: normalizer.latest_daily_reward(rewards.as_ref()),
            daily_hash_rate: normalizer.daily_hash_rate(hash_rate.as_ref()),
            block_rewards: normalizer.block_rewards(blocks.as_ref()),
            workers: normalizer.workers(workers.as_ref()),
            payouts: normalizer.payouts(payouts.as_ref()),
            defaulted: Vec::new(),
        };
        let record = normalizer.record(&figures, pool_5m_hash_rate);
        details.defaulted = normalizer.into_defaulted();

        Ok(PoolData { record, details })
    }
}

/// Supplementary fetches never fail the cycle.
async fn best_effort<F>(endpoint: Endpoint, fetch: F) -> Option<Value>
where
    F: Future<Output = ApiResult<Value>>,
{
    match fetch.await {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(
                endpoint = endpoint.name(),
                "Supplementary fetch failed, using defaults: {}", err
            );
            None
        }
    }
}

#[async_trait]
impl Refresh for RefreshCoordinator {
    fn name(&self) -> &str {
        "braiins_pool"
    }

    async fn refresh_cycle(&self) -> Result<(), UpdateFailed> {
        let data = self.refresh().await?;
        info!(
            balance = %data.record.current_balance,
            ok_workers = data.record.ok_workers,
            "Braiins Pool data refreshed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolApiError;
    use crate::publisher::SnapshotSubscribers;
    use serde_json::json;

    struct ProfileOnly(Result<Value, u16>);

    #[async_trait]
    impl PoolApi for ProfileOnly {
        async fn fetch(&self, endpoint: Endpoint, _params: &[&str]) -> ApiResult<Value> {
            match (endpoint, &self.0) {
                (Endpoint::UserProfile, Ok(v)) => Ok(v.clone()),
                (Endpoint::UserProfile, Err(status)) => Err(PoolApiError::Api {
                    endpoint: endpoint.name().into(),
                    status: *status,
                    body: "boom".into(),
                }),
                _ => Ok(json!({})),
            }
        }
    }

    fn coordinator(api: ProfileOnly) -> RefreshCoordinator {
        RefreshCoordinator::new(
            Arc::new(api),
            Arc::new(SnapshotSubscribers::new()),
            CoordinatorSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_snapshot_starts_empty() {
        let c = coordinator(ProfileOnly(Ok(json!({}))));
        let snapshot = c.snapshot();
        assert!(snapshot.data.is_none());
        assert!(!snapshot.last_update_success);
        assert!(snapshot.last_attempt.is_none());
        assert_eq!(c.phase(), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_phase_returns_to_idle_after_cycle() {
        let c = coordinator(ProfileOnly(Ok(json!({"btc": {"ok_workers": 2}}))));
        let data = c.refresh().await.unwrap();
        assert_eq!(data.record.ok_workers, 2);
        assert_eq!(c.phase(), CyclePhase::Idle);
        assert!(c.last_update_success());
    }

    #[tokio::test]
    async fn test_failed_cycle_records_error() {
        let c = coordinator(ProfileOnly(Err(500)));
        let err = c.refresh().await.unwrap_err();
        assert!(err.message.contains("HTTP 500"));
        let snapshot = c.snapshot();
        assert!(!snapshot.last_update_success);
        assert_eq!(snapshot.last_error.as_deref(), Some(err.message.as_str()));
        assert!(snapshot.last_attempt.is_some());
        assert!(snapshot.last_success.is_none());
    }
}

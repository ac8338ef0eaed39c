use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

use crate::coordinator::{CacheSnapshot, CyclePhase};
use crate::publisher::Publisher;
use crate::state::{new_state, Shared};

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub consecutive_failures: u32,
    pub last_update_success: bool,
    pub last_success_unix: Option<i64>,
    pub last_error: Option<String>,
    pub cycle_phase: String,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub mqtt_dropped_messages: u64,
}

/// Cloneable counters fed by the coordinator (as a publisher) and the MQTT loop.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    cycles_completed: Arc<AtomicU64>,
    cycles_failed: Arc<AtomicU64>,
    consecutive_failures: Arc<AtomicU32>,
    last_outcome: Shared<Outcome>,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_dropped: Arc<AtomicU64>,
    mqtt_status: Shared<String>,
}

#[derive(Default)]
struct Outcome {
    success: bool,
    last_success: Option<OffsetDateTime>,
    last_error: Option<String>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            cycles_completed: Arc::new(AtomicU64::new(0)),
            cycles_failed: Arc::new(AtomicU64::new(0)),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            last_outcome: new_state(Outcome::default()),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_dropped: Arc::new(AtomicU64::new(0)),
            mqtt_status: new_state("disabled".to_string()),
        }
    }

    pub fn record_cycle(&self, snapshot: &CacheSnapshot) {
        let mut outcome = self.last_outcome.lock();
        outcome.success = snapshot.last_update_success;
        outcome.last_success = snapshot.last_success;
        outcome.last_error = snapshot.last_error.clone();
        if snapshot.last_update_success {
            self.cycles_completed.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            self.cycles_failed.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    /// Messages the MQTT client refused (queue full or client gone).
    pub fn record_mqtt_dropped(&self, count: u64) {
        self.mqtt_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn get_health(&self, phase: CyclePhase) -> KernelHealth {
        let outcome = self.last_outcome.lock();
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures(),
            last_update_success: outcome.success,
            last_success_unix: outcome.last_success.map(OffsetDateTime::unix_timestamp),
            last_error: outcome.last_error.clone(),
            cycle_phase: phase_label(phase).to_string(),
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            mqtt_dropped_messages: self.mqtt_dropped.load(Ordering::Relaxed),
        }
    }
}

fn phase_label(phase: CyclePhase) -> &'static str {
    match phase {
        CyclePhase::Idle => "idle",
        CyclePhase::Fetching => "fetching",
        CyclePhase::Normalizing => "normalizing",
        CyclePhase::Published => "published",
        CyclePhase::FailedCycle => "failed_cycle",
    }
}

#[async_trait]
impl Publisher for HealthTracker {
    async fn publish(&self, snapshot: Arc<CacheSnapshot>) {
        self.record_cycle(&snapshot);
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return (kb as f32) / 1024.0;
            }
        }
    }

    0.0
}

/*!
Test Harness pour le kernel PoolSense

Wires a scripted pool API, a recording publisher and the MQTT mock around a
real `RefreshCoordinator`, so integration tests only script payloads and
assert on outcomes.
*/

use crate::mqtt_stub::MockMqttClient;
use crate::scripted_api::ScriptedPoolApi;
use anyhow::Result;
use async_trait::async_trait;
use poolsense_kernel::config::MqttConf;
use poolsense_kernel::coordinator::{CacheSnapshot, CoordinatorSettings, RefreshCoordinator};
use poolsense_kernel::mqtt::MqttPublisher;
use poolsense_kernel::publisher::{FanoutPublisher, Publisher};
use poolsense_kernel::sensors::{SensorEntry, SensorRegistry};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Keeps every snapshot it is handed, in order.
#[derive(Default)]
pub struct RecordingPublisher {
    snapshots: Mutex<Vec<Arc<CacheSnapshot>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<Arc<CacheSnapshot>> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Arc<CacheSnapshot>> {
        self.snapshots.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, snapshot: Arc<CacheSnapshot>) {
        self.snapshots.lock().unwrap().push(snapshot);
    }
}

pub struct TestHarness {
    pub api: ScriptedPoolApi,
    pub publisher: Arc<RecordingPublisher>,
    pub mqtt_client: MockMqttClient,
    pub mqtt_conf: MqttConf,
    pub entry: SensorEntry,
    pub settings: CoordinatorSettings,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();

        Self {
            api: ScriptedPoolApi::new(),
            publisher: Arc::new(RecordingPublisher::new()),
            mqtt_client: MockMqttClient::new(),
            mqtt_conf: MqttConf::default(),
            entry: SensorEntry {
                entry_id: "sensor_entry_1".into(),
                title: "My Miner Sensors".into(),
                coin: "btc".into(),
            },
            settings: CoordinatorSettings::default(),
        }
    }

    pub fn mqtt_publisher(&self) -> MqttPublisher<MockMqttClient> {
        MqttPublisher::new(self.mqtt_client.clone(), &self.mqtt_conf, self.entry.clone())
    }

    /// Coordinator publishing to the recorder and the MQTT mock.
    pub fn coordinator(&self) -> Arc<RefreshCoordinator> {
        let mut fanout = FanoutPublisher::default();
        fanout.push(self.publisher.clone());
        fanout.push(Arc::new(self.mqtt_publisher()));
        Arc::new(RefreshCoordinator::new(
            Arc::new(self.api.clone()),
            Arc::new(fanout),
            self.settings.clone(),
        ))
    }

    pub fn registry(&self, coordinator: &Arc<RefreshCoordinator>) -> SensorRegistry {
        SensorRegistry::new(coordinator.clone(), self.entry.clone())
    }

    /// Polls the recorder until `count` snapshots arrived.
    pub async fn wait_for_publications(&self, count: usize, timeout_ms: u64) -> Result<()> {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.publisher.count() >= count {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        log::warn!("timeout waiting for {} publications", count);
        anyhow::bail!(
            "expected {} publications, got {}",
            count,
            self.publisher.count()
        );
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use poolsense_kernel::api::Endpoint;

    #[tokio::test]
    async fn test_harness_runs_a_cycle() {
        let harness = TestHarness::new();
        harness.api.reply(Endpoint::UserProfile, fixtures::scenario_profile());
        let coordinator = harness.coordinator();

        coordinator.refresh().await.unwrap();
        harness.wait_for_publications(1, 500).await.unwrap();

        assert!(harness.publisher.last().unwrap().last_update_success);
        assert_eq!(
            harness
                .mqtt_client
                .last_payload("poolsense/sensor_entry_1/availability")
                .as_deref(),
            Some("online")
        );
    }
}

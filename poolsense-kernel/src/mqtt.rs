/**
 * MQTT SURFACE - Discovery + états des capteurs
 *
 * ROLE:
 * Exposes the sensors to a Home Assistant style broker setup:
 * - one retained discovery config per sensor at startup
 * - availability, status and one retained state per sensor after each cycle
 *
 * TOPICS:
 *   <discovery_prefix>/sensor/<unique_id>/config
 *   <base_topic>/<entry_id>/availability       online | offline
 *   <base_topic>/<entry_id>/status             {last_update_success, last_error, ...}
 *   <base_topic>/<entry_id>/<key>/state
 *
 * Availability stays "online" while a snapshot exists, even after a failed
 * cycle; the status topic carries the failure.
 *
 * Publishing never waits on the broker: messages are queued with
 * `try_publish` and dropped (and counted) when the request queue is full.
 */

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MqttConf;
use crate::coordinator::CacheSnapshot;
use crate::health::HealthTracker;
use crate::publisher::Publisher;
use crate::sensors::{DeviceInfo, SensorEntry, SensorUnit, DOMAIN, SENSOR_TYPES};

#[derive(Debug, thiserror::Error)]
#[error("MQTT publish to {topic} failed: {message}")]
pub struct MqttSinkError {
    pub topic: String,
    pub message: String,
}

#[async_trait]
pub trait MqttSink: Send + Sync {
    async fn publish(
        &self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttSinkError>;
}

#[async_trait]
impl MqttSink for AsyncClient {
    async fn publish(
        &self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttSinkError> {
        // a disconnected broker leaves the queue undrained; never await it
        self.try_publish(topic.clone(), qos, retain, payload)
            .map_err(|e| MqttSinkError {
                topic,
                message: e.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl MqttMessage {
    fn retained(topic: String, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
            retain: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    root: String,
    discovery_prefix: String,
}

impl Topics {
    pub fn new(conf: &MqttConf, entry_id: &str) -> Self {
        Self {
            root: format!("{}/{}", conf.base_topic.trim_end_matches('/'), entry_id),
            discovery_prefix: conf.discovery_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn availability(&self) -> String {
        format!("{}/availability", self.root)
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.root)
    }

    pub fn state(&self, key: &str) -> String {
        format!("{}/{}/state", self.root, key)
    }

    pub fn discovery(&self, unique_id: &str) -> String {
        format!("{}/sensor/{}/config", self.discovery_prefix, unique_id)
    }
}

pub fn discovery_messages(topics: &Topics, entry: &SensorEntry) -> Vec<MqttMessage> {
    let device = DeviceInfo::for_entry(entry);
    let identifiers: Vec<String> = device
        .identifiers
        .iter()
        .map(|(domain, id)| format!("{domain}_{id}"))
        .collect();

    SENSOR_TYPES
        .iter()
        .map(|description| {
            let unique_id = format!("{}_{}", entry.entry_id, description.key);
            let mut config = json!({
                "name": description.name,
                "unique_id": unique_id,
                "state_topic": topics.state(description.key),
                "availability_topic": topics.availability(),
                "json_attributes_topic": topics.status(),
                "icon": description.icon,
                "state_class": description.state_class,
                "device": {
                    "identifiers": identifiers,
                    "name": device.name,
                    "manufacturer": device.manufacturer,
                },
            });
            if let Some(unit) = description.unit {
                config["unit_of_measurement"] = json!(SensorUnit::symbol(unit));
            }
            if let Some(class) = description.device_class {
                config["device_class"] = json!(class);
            }
            MqttMessage::retained(topics.discovery(&unique_id), config.to_string())
        })
        .collect()
}

pub fn state_messages(topics: &Topics, snapshot: &CacheSnapshot) -> Vec<MqttMessage> {
    let mut out = Vec::with_capacity(SENSOR_TYPES.len() + 2);
    let availability = if snapshot.data.is_some() { "online" } else { "offline" };
    out.push(MqttMessage::retained(topics.availability(), availability));

    let status = json!({
        "source": DOMAIN,
        "last_update_success": snapshot.last_update_success,
        "last_error": snapshot.last_error,
        "last_success": snapshot.last_success.map(|t| t.unix_timestamp()),
    });
    out.push(MqttMessage::retained(topics.status(), status.to_string()));

    if let Some(data) = &snapshot.data {
        for (key, value) in data.record.entries() {
            out.push(MqttMessage::retained(topics.state(key), value.to_string()));
        }
    }
    out
}

pub struct MqttPublisher<S> {
    sink: S,
    topics: Topics,
    entry: SensorEntry,
    health: Option<HealthTracker>,
}

impl<S: MqttSink> MqttPublisher<S> {
    pub fn new(sink: S, conf: &MqttConf, entry: SensorEntry) -> Self {
        Self {
            topics: Topics::new(conf, &entry.entry_id),
            sink,
            entry,
            health: None,
        }
    }

    /// Counts dropped messages in `health`.
    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = Some(health);
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Attempts every message; returns the first failure once all were tried.
    async fn send_all(&self, messages: Vec<MqttMessage>) -> Result<usize, MqttSinkError> {
        let count = messages.len();
        let mut dropped = 0u64;
        let mut first_error = None;
        for message in messages {
            let sent = self
                .sink
                .publish(
                    message.topic,
                    QoS::AtLeastOnce,
                    message.retain,
                    message.payload.into_bytes(),
                )
                .await;
            if let Err(e) = sent {
                dropped += 1;
                first_error.get_or_insert(e);
            }
        }
        if dropped > 0 {
            if let Some(health) = &self.health {
                health.record_mqtt_dropped(dropped);
            }
        }
        match first_error {
            Some(e) => {
                warn!(dropped, total = count, "MQTT messages dropped");
                Err(e)
            }
            None => Ok(count),
        }
    }

    /// Publishes the discovery config of every sensor.
    pub async fn announce(&self) -> Result<(), MqttSinkError> {
        let count = self
            .send_all(discovery_messages(&self.topics, &self.entry))
            .await?;
        info!(entry_id = %self.entry.entry_id, sensors = count, "MQTT discovery published");
        Ok(())
    }

    pub async fn mark_offline(&self) -> Result<(), MqttSinkError> {
        self.send_all(vec![MqttMessage::retained(
            self.topics.availability(),
            "offline",
        )])
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl<S: MqttSink> Publisher for MqttPublisher<S> {
    async fn publish(&self, snapshot: Arc<CacheSnapshot>) {
        match self.send_all(state_messages(&self.topics, &snapshot)).await {
            Ok(count) => debug!(messages = count, "MQTT state published"),
            Err(e) => warn!("{}", e),
        }
    }
}

/// Connects to the broker and drives its event loop in the background.
pub fn connect(
    conf: &MqttConf,
    entry: SensorEntry,
    health: HealthTracker,
) -> (MqttPublisher<AsyncClient>, JoinHandle<()>) {
    let topics = Topics::new(conf, &entry.entry_id);
    let mut opts = MqttOptions::new(conf.client_id.clone(), conf.host.clone(), conf.port);
    opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs.max(5)));
    opts.set_last_will(LastWill::new(
        topics.availability(),
        "offline",
        QoS::AtLeastOnce,
        true,
    ));

    let (client, mut eventloop) = AsyncClient::new(opts, 32);
    health.mark_mqtt_connecting();
    let host = conf.host.clone();
    let publisher = MqttPublisher::new(client, conf, entry).with_health(health.clone());

    let handle = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!(%host, "MQTT connected");
                    health.mark_mqtt_connected();
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    health.mark_mqtt_disconnected();
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%host, "MQTT error: {}", e);
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    (publisher, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{NormalizedRecord, PoolData, PoolDetails};
    use rust_decimal::Decimal;
    use serde_json::Value;

    fn entry() -> SensorEntry {
        SensorEntry {
            entry_id: "main".into(),
            title: "Main".into(),
            coin: "btc".into(),
        }
    }

    fn topics() -> Topics {
        Topics::new(&MqttConf::default(), "main")
    }

    #[test]
    fn test_topic_layout() {
        let t = topics();
        assert_eq!(t.availability(), "poolsense/main/availability");
        assert_eq!(t.state("ok_workers"), "poolsense/main/ok_workers/state");
        assert_eq!(
            t.discovery("main_ok_workers"),
            "homeassistant/sensor/main_ok_workers/config"
        );
    }

    #[test]
    fn test_discovery_payloads() {
        let messages = discovery_messages(&topics(), &entry());
        assert_eq!(messages.len(), SENSOR_TYPES.len());
        assert!(messages.iter().all(|m| m.retain));

        let hash = messages
            .iter()
            .find(|m| m.topic.contains("main_pool_5m_hash_rate"))
            .unwrap();
        let config: Value = serde_json::from_str(&hash.payload).unwrap();
        assert_eq!(config["unit_of_measurement"], "Gh/s");
        assert_eq!(config["device_class"], "data_rate");
        assert_eq!(config["state_class"], "measurement");
        assert_eq!(config["device"]["manufacturer"], "Braiins");
        assert_eq!(config["device"]["identifiers"][0], "braiins_pool_main");

        let workers = messages.iter().find(|m| m.topic.contains("main_ok_workers")).unwrap();
        let config: Value = serde_json::from_str(&workers.payload).unwrap();
        assert!(config.get("unit_of_measurement").is_none());
    }

    #[test]
    fn test_state_messages_before_and_after_data() {
        let empty = state_messages(&topics(), &CacheSnapshot::default());
        assert_eq!(empty.len(), 2);
        assert_eq!(empty[0].payload, "offline");

        let record = NormalizedRecord {
            current_balance: Decimal::new(123, 2),
            current_balance_satoshi: 123_000_000,
            ..NormalizedRecord::default()
        };
        let snapshot = CacheSnapshot {
            data: Some(Arc::new(PoolData {
                record,
                details: PoolDetails::default(),
            })),
            last_update_success: false,
            last_error: Some("Error communicating with API: down".into()),
            ..CacheSnapshot::default()
        };
        let messages = state_messages(&topics(), &snapshot);
        assert_eq!(messages.len(), 2 + SENSOR_TYPES.len());
        assert_eq!(messages[0].payload, "online");
        let status: Value = serde_json::from_str(&messages[1].payload).unwrap();
        assert_eq!(status["last_update_success"], false);

        let balance = messages
            .iter()
            .find(|m| m.topic == "poolsense/main/current_balance_satoshi/state")
            .unwrap();
        assert_eq!(balance.payload, "123000000");
    }

    #[tokio::test]
    async fn test_connect_handle_stops_the_event_loop() {
        let conf = MqttConf {
            host: "127.0.0.1".into(),
            port: 1,
            ..MqttConf::default()
        };
        let (publisher, handle) = connect(&conf, entry(), HealthTracker::new());
        publisher.mark_offline().await.unwrap();

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_full_queue_fails_fast_and_counts_drops() {
        // the event loop is never polled, so nothing drains the queue
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("t", "127.0.0.1", 1), 2);
        let health = HealthTracker::new();
        let publisher = MqttPublisher::new(client, &MqttConf::default(), entry()).with_health(health.clone());

        let sent = tokio::time::timeout(Duration::from_secs(1), publisher.announce()).await;
        assert!(sent.expect("publishing must not wait for the broker").is_err());
        let report = health.get_health(crate::coordinator::CyclePhase::Idle);
        assert_eq!(report.mqtt_dropped_messages, (SENSOR_TYPES.len() - 2) as u64);
    }
}

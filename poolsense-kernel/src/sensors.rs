/**
 * SENSOR REGISTRY - Vue "capteurs" du cache coordinator
 *
 * ROLE:
 * One sensor per metric of the normalized record. Sensors read the
 * coordinator's cached snapshot and never call the pool API themselves.
 *
 * IDENTITY:
 * - unique id  = `<entry_id>_<key>`
 * - device     = identifiers {(braiins_pool, entry_id)}, name = account label
 *
 * A failed cycle keeps the last values visible; `stale` tells consumers the
 * source is currently failing.
 */

use serde::Serialize;
use std::sync::Arc;

use crate::coordinator::RefreshCoordinator;
use crate::normalize::MetricValue;

pub const DOMAIN: &str = "braiins_pool";
pub const MANUFACTURER: &str = "Braiins";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Monetary,
    DataRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensorUnit {
    #[serde(rename = "BTC")]
    Coin,
    #[serde(rename = "sat")]
    Satoshi,
    #[serde(rename = "Gh/s")]
    GigahashPerSecond,
}

impl SensorUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            SensorUnit::Coin => "BTC",
            SensorUnit::Satoshi => "sat",
            SensorUnit::GigahashPerSecond => "Gh/s",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub unit: Option<SensorUnit>,
    pub device_class: Option<DeviceClass>,
    pub state_class: StateClass,
}

pub static SENSOR_TYPES: [SensorDescription; 8] = [
    SensorDescription {
        key: "today_reward",
        name: "Braiins Pool Today's Reward",
        icon: "mdi:bitcoin",
        unit: Some(SensorUnit::Coin),
        device_class: Some(DeviceClass::Monetary),
        state_class: StateClass::TotalIncreasing,
    },
    SensorDescription {
        key: "today_reward_satoshi",
        name: "Braiins Pool Today's Reward (Satoshi)",
        icon: "mdi:bitcoin",
        unit: Some(SensorUnit::Satoshi),
        device_class: None,
        state_class: StateClass::TotalIncreasing,
    },
    SensorDescription {
        key: "current_balance",
        name: "Braiins Pool Current Balance",
        icon: "mdi:wallet-outline",
        unit: Some(SensorUnit::Coin),
        device_class: Some(DeviceClass::Monetary),
        state_class: StateClass::Measurement,
    },
    SensorDescription {
        key: "current_balance_satoshi",
        name: "Braiins Pool Current Balance (Satoshi)",
        icon: "mdi:wallet-outline",
        unit: Some(SensorUnit::Satoshi),
        device_class: None,
        state_class: StateClass::Measurement,
    },
    SensorDescription {
        key: "all_time_reward",
        name: "Braiins Pool All Time Reward",
        icon: "mdi:medal-outline",
        unit: Some(SensorUnit::Coin),
        device_class: Some(DeviceClass::Monetary),
        state_class: StateClass::TotalIncreasing,
    },
    SensorDescription {
        key: "all_time_reward_satoshi",
        name: "Braiins Pool All Time Reward (Satoshi)",
        icon: "mdi:medal-outline",
        unit: Some(SensorUnit::Satoshi),
        device_class: None,
        state_class: StateClass::TotalIncreasing,
    },
    SensorDescription {
        key: "ok_workers",
        name: "Braiins Pool Active Workers",
        icon: "mdi:worker",
        unit: None,
        device_class: None,
        state_class: StateClass::Measurement,
    },
    SensorDescription {
        key: "pool_5m_hash_rate",
        name: "Braiins Pool 5m Hash Rate",
        icon: "mdi:gauge",
        unit: Some(SensorUnit::GigahashPerSecond),
        device_class: Some(DeviceClass::DataRate),
        state_class: StateClass::Measurement,
    },
];

pub fn description(key: &str) -> Option<&'static SensorDescription> {
    SENSOR_TYPES.iter().find(|d| d.key == key)
}

/// The configured account a set of sensors belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorEntry {
    pub entry_id: String,
    pub title: String,
    pub coin: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: String,
}

impl DeviceInfo {
    pub fn for_entry(entry: &SensorEntry) -> Self {
        Self {
            identifiers: vec![(DOMAIN.to_string(), entry.entry_id.clone())],
            name: entry.title.clone(),
            manufacturer: MANUFACTURER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorState {
    pub unique_id: String,
    pub key: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub state_class: StateClass,
    pub value: Option<MetricValue>,
    pub available: bool,
    pub stale: bool,
}

pub struct PoolSensor {
    coordinator: Arc<RefreshCoordinator>,
    description: &'static SensorDescription,
    unique_id: String,
    device: DeviceInfo,
}

impl PoolSensor {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        description: &'static SensorDescription,
        entry: &SensorEntry,
    ) -> Self {
        Self {
            coordinator,
            description,
            unique_id: format!("{}_{}", entry.entry_id, description.key),
            device: DeviceInfo::for_entry(entry),
        }
    }

    pub fn key(&self) -> &'static str {
        self.description.key
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn description(&self) -> &'static SensorDescription {
        self.description
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    /// Current value from the cached record; `None` before the first successful cycle.
    pub fn native_value(&self) -> Option<MetricValue> {
        self.coordinator
            .data()
            .and_then(|data| data.record.get(self.description.key))
    }

    pub fn available(&self) -> bool {
        self.coordinator.data().is_some()
    }

    pub fn state(&self) -> SensorState {
        let snapshot = self.coordinator.snapshot();
        let value = snapshot
            .data
            .as_ref()
            .and_then(|data| data.record.get(self.description.key));
        SensorState {
            unique_id: self.unique_id.clone(),
            key: self.description.key,
            name: self.description.name,
            icon: self.description.icon,
            unit: self.description.unit.map(SensorUnit::symbol),
            device_class: self.description.device_class,
            state_class: self.description.state_class,
            value,
            available: snapshot.data.is_some(),
            stale: snapshot.data.is_some() && !snapshot.last_update_success,
        }
    }
}

/// All sensors of one account, built around a single coordinator.
pub struct SensorRegistry {
    entry: SensorEntry,
    sensors: Vec<PoolSensor>,
}

impl SensorRegistry {
    pub fn new(coordinator: Arc<RefreshCoordinator>, entry: SensorEntry) -> Self {
        let sensors = SENSOR_TYPES
            .iter()
            .map(|description| PoolSensor::new(Arc::clone(&coordinator), description, &entry))
            .collect();
        Self { entry, sensors }
    }

    pub fn entry(&self) -> &SensorEntry {
        &self.entry
    }

    pub fn sensors(&self) -> &[PoolSensor] {
        &self.sensors
    }

    pub fn get(&self, key: &str) -> Option<&PoolSensor> {
        self.sensors.iter().find(|s| s.key() == key)
    }

    pub fn states(&self) -> Vec<SensorState> {
        self.sensors.iter().map(PoolSensor::state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::METRIC_KEYS;

    #[test]
    fn test_one_sensor_per_metric() {
        let keys: Vec<&str> = SENSOR_TYPES.iter().map(|d| d.key).collect();
        assert_eq!(keys.len(), METRIC_KEYS.len());
        for key in METRIC_KEYS {
            assert!(keys.contains(&key), "no sensor for {key}");
        }
    }

    #[test]
    fn test_units_and_classes() {
        let hash = description("pool_5m_hash_rate").unwrap();
        assert_eq!(hash.unit.map(SensorUnit::symbol), Some("Gh/s"));
        assert_eq!(hash.device_class, Some(DeviceClass::DataRate));

        let balance = description("current_balance").unwrap();
        assert_eq!(balance.state_class, StateClass::Measurement);
        assert_eq!(balance.device_class, Some(DeviceClass::Monetary));

        assert_eq!(description("ok_workers").unwrap().unit, None);
        assert!(description("nope").is_none());
    }

    #[test]
    fn test_device_info_for_entry() {
        let entry = SensorEntry {
            entry_id: "sensor_entry_1".into(),
            title: "My Miner Sensors".into(),
            coin: "btc".into(),
        };
        let device = DeviceInfo::for_entry(&entry);
        assert_eq!(
            device.identifiers,
            vec![("braiins_pool".to_string(), "sensor_entry_1".to_string())]
        );
        assert_eq!(device.name, "My Miner Sensors");
        assert_eq!(device.manufacturer, "Braiins");
    }
}

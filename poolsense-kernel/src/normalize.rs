//! Normalization of raw pool payloads into the flat record published as sensors.
//!
//! Extraction never fails: a missing key, a wrong type or a non-numeric string
//! falls back to the field's zero value and is logged at warning level.
//! Monetary values are parsed as decimals, never as binary floats.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::api::Endpoint;

pub const SATOSHIS_PER_COIN: i64 = 100_000_000;

/// Keys of the normalized record, in publication order.
pub const METRIC_KEYS: [&str; 8] = [
    "today_reward",
    "today_reward_satoshi",
    "current_balance",
    "current_balance_satoshi",
    "all_time_reward",
    "all_time_reward_satoshi",
    "ok_workers",
    "pool_5m_hash_rate",
];

/// Documented default for decimal metrics (`0.0`).
pub fn decimal_zero() -> Decimal {
    Decimal::new(0, 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Decimal(Decimal),
    Integer(i64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Decimal(d) => write!(f, "{d}"),
            MetricValue::Integer(i) => write!(f, "{i}"),
        }
    }
}

/// One complete cycle output. Every metric is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    pub today_reward: Decimal,
    pub today_reward_satoshi: i64,
    pub current_balance: Decimal,
    pub current_balance_satoshi: i64,
    pub all_time_reward: Decimal,
    pub all_time_reward_satoshi: i64,
    pub ok_workers: i64,
    pub pool_5m_hash_rate: Decimal,
}

impl Default for NormalizedRecord {
    fn default() -> Self {
        Self {
            today_reward: decimal_zero(),
            today_reward_satoshi: 0,
            current_balance: decimal_zero(),
            current_balance_satoshi: 0,
            all_time_reward: decimal_zero(),
            all_time_reward_satoshi: 0,
            ok_workers: 0,
            pool_5m_hash_rate: decimal_zero(),
        }
    }
}

impl NormalizedRecord {
    pub fn get(&self, key: &str) -> Option<MetricValue> {
        let value = match key {
            "today_reward" => MetricValue::Decimal(self.today_reward),
            "today_reward_satoshi" => MetricValue::Integer(self.today_reward_satoshi),
            "current_balance" => MetricValue::Decimal(self.current_balance),
            "current_balance_satoshi" => MetricValue::Integer(self.current_balance_satoshi),
            "all_time_reward" => MetricValue::Decimal(self.all_time_reward),
            "all_time_reward_satoshi" => MetricValue::Integer(self.all_time_reward_satoshi),
            "ok_workers" => MetricValue::Integer(self.ok_workers),
            "pool_5m_hash_rate" => MetricValue::Decimal(self.pool_5m_hash_rate),
            _ => return None,
        };
        Some(value)
    }

    pub fn entries(&self) -> Vec<(&'static str, MetricValue)> {
        METRIC_KEYS
            .iter()
            .filter_map(|key| self.get(key).map(|value| (*key, value)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashRateSample {
    pub date: i64,
    pub hash_rate_24h: Decimal,
    pub hash_rate_unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockReward {
    pub block_found_at: i64,
    pub block_value: Decimal,
    pub user_reward: Decimal,
    pub confirmations_left: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub state: String,
    pub last_share: i64,
    pub hash_rate_5m: Decimal,
    pub hash_rate_24h: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub requested_at: i64,
    pub amount: Decimal,
    pub tx_id: String,
    pub status: String,
}

/// Best-effort data from the supplementary endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolDetails {
    pub latest_daily_reward: Decimal,
    pub daily_hash_rate: Vec<HashRateSample>,
    pub block_rewards: Vec<BlockReward>,
    pub workers: Vec<WorkerStatus>,
    pub payouts: Vec<Payout>,
    /// `endpoint.field` paths that fell back to their default this cycle.
    pub defaulted: Vec<String>,
}

impl Default for PoolDetails {
    fn default() -> Self {
        Self {
            latest_daily_reward: decimal_zero(),
            daily_hash_rate: Vec::new(),
            block_rewards: Vec::new(),
            workers: Vec::new(),
            payouts: Vec::new(),
            defaulted: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolData {
    pub record: NormalizedRecord,
    pub details: PoolDetails,
}

/// Parses a JSON number or numeric string without going through `f64`.
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => decimal_from_str(&n.to_string()),
        Value::String(s) => decimal_from_str(s.trim()),
        _ => None,
    }
}

fn decimal_from_str(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

pub fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| decimal_from_str(&n.to_string()).and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| decimal_from_str(s).and_then(integral))
        }
        _ => None,
    }
}

fn integral(d: Decimal) -> Option<i64> {
    if d.fract().is_zero() {
        d.to_i64()
    } else {
        None
    }
}

/// `round(value * 10^8)`, half away from zero. `None` on overflow.
pub fn to_satoshi(value: Decimal) -> Option<i64> {
    value
        .checked_mul(Decimal::from(SATOSHIS_PER_COIN))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Figures read from the primary (profile) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFigures {
    pub current_balance: Decimal,
    pub today_reward: Decimal,
    pub all_time_reward: Decimal,
    pub ok_workers: i64,
}

/// Builds one cycle's `PoolData` from scratch, tracking every defaulted field.
pub struct Normalizer<'c> {
    coin: &'c str,
    defaulted: Vec<String>,
}

impl<'c> Normalizer<'c> {
    pub fn new(coin: &'c str) -> Self {
        Self {
            coin,
            defaulted: Vec::new(),
        }
    }

    /// The coin-keyed section (`{"btc": {...}}`) when present, otherwise the root.
    fn section<'v>(&self, payload: &'v Value) -> &'v Value {
        match payload.get(self.coin) {
            Some(section) if section.is_object() || section.is_array() => section,
            _ => payload,
        }
    }

    fn note_default(&mut self, endpoint: Endpoint, field: &str, reason: &str) {
        let path = format!("{}.{}", endpoint.name(), field);
        if !self.defaulted.contains(&path) {
            warn!(field = %path, "{}, using default", reason);
            self.defaulted.push(path);
        }
    }

    /// Marks a whole supplementary endpoint as defaulted after a failed fetch.
    fn note_missing(&mut self, endpoint: Endpoint) {
        let path = endpoint.name().to_string();
        if !self.defaulted.contains(&path) {
            self.defaulted.push(path);
        }
    }

    fn decimal(&mut self, endpoint: Endpoint, object: &Value, key: &str) -> Decimal {
        match object.get(key) {
            None | Some(Value::Null) => {
                self.note_default(endpoint, key, "missing field");
                decimal_zero()
            }
            Some(raw) => parse_decimal(raw).unwrap_or_else(|| {
                self.note_default(endpoint, key, "non-numeric value");
                decimal_zero()
            }),
        }
    }

    fn integer(&mut self, endpoint: Endpoint, object: &Value, key: &str) -> i64 {
        match object.get(key) {
            None | Some(Value::Null) => {
                self.note_default(endpoint, key, "missing field");
                0
            }
            Some(raw) => parse_integer(raw).unwrap_or_else(|| {
                self.note_default(endpoint, key, "non-integer value");
                0
            }),
        }
    }

    fn text(&mut self, endpoint: Endpoint, object: &Value, key: &str) -> String {
        match object.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                self.note_default(endpoint, key, "missing text field");
                String::new()
            }
        }
    }

    fn list<'v>(&mut self, endpoint: Endpoint, payload: &'v Value, key: &str) -> &'v [Value] {
        let section = self.section(payload);
        let list = match section {
            Value::Array(items) => Some(items),
            other => other.get(key).and_then(Value::as_array),
        };
        match list {
            Some(items) => items.as_slice(),
            None => {
                self.note_default(endpoint, key, "missing list");
                &[]
            }
        }
    }

    pub fn profile(&mut self, payload: &Value) -> ProfileFigures {
        let ep = Endpoint::UserProfile;
        let section = self.section(payload);
        ProfileFigures {
            current_balance: self.decimal(ep, section, "current_balance"),
            today_reward: self.decimal(ep, section, "today_reward"),
            all_time_reward: self.decimal(ep, section, "all_time_reward"),
            ok_workers: self.integer(ep, section, "ok_workers"),
        }
    }

    /// Read from the profile section first; `pool_stats` only fills in when the
    /// profile does not carry a usable value.
    pub fn pool_hash_rate(&mut self, profile: &Value, stats: Option<&Value>) -> Decimal {
        if let Some(rate) = self
            .section(profile)
            .get("pool_5m_hash_rate")
            .and_then(parse_decimal)
        {
            return rate;
        }
        let ep = Endpoint::PoolStats;
        match stats {
            Some(payload) => {
                let section = self.section(payload);
                self.decimal(ep, section, "pool_5m_hash_rate")
            }
            None => {
                self.note_missing(ep);
                decimal_zero()
            }
        }
    }

    /// `total_reward` of the most recent daily entry.
    pub fn latest_daily_reward(&mut self, payload: Option<&Value>) -> Decimal {
        let ep = Endpoint::DailyRewards;
        let Some(payload) = payload else {
            self.note_missing(ep);
            return decimal_zero();
        };
        match self.list(ep, payload, "daily_rewards").first() {
            Some(latest) => self.decimal(ep, latest, "total_reward"),
            None => {
                self.note_default(ep, "total_reward", "no daily reward entry");
                decimal_zero()
            }
        }
    }

    pub fn daily_hash_rate(&mut self, payload: Option<&Value>) -> Vec<HashRateSample> {
        let ep = Endpoint::DailyHashRate;
        let Some(payload) = payload else {
            self.note_missing(ep);
            return Vec::new();
        };
        self.list(ep, payload, "daily_hash_rate")
            .iter()
            .map(|item| HashRateSample {
                date: self.integer(ep, item, "date"),
                hash_rate_24h: self.decimal(ep, item, "hash_rate_24h"),
                hash_rate_unit: self.text(ep, item, "hash_rate_unit"),
            })
            .collect()
    }

    pub fn block_rewards(&mut self, payload: Option<&Value>) -> Vec<BlockReward> {
        let ep = Endpoint::BlockRewards;
        let Some(payload) = payload else {
            self.note_missing(ep);
            return Vec::new();
        };
        self.list(ep, payload, "block_rewards")
            .iter()
            .map(|item| BlockReward {
                block_found_at: self.integer(ep, item, "block_found_at"),
                block_value: self.decimal(ep, item, "block_value"),
                user_reward: self.decimal(ep, item, "user_reward"),
                confirmations_left: self.integer(ep, item, "confirmations_left"),
            })
            .collect()
    }

    pub fn workers(&mut self, payload: Option<&Value>) -> Vec<WorkerStatus> {
        let ep = Endpoint::Workers;
        let Some(payload) = payload else {
            self.note_missing(ep);
            return Vec::new();
        };
        let section = self.section(payload);
        let Some(workers) = section.get("workers").and_then(Value::as_object) else {
            self.note_default(ep, "workers", "missing worker map");
            return Vec::new();
        };
        let mut out: Vec<WorkerStatus> = workers
            .iter()
            .map(|(name, item)| WorkerStatus {
                name: name.clone(),
                state: self.text(ep, item, "state"),
                last_share: self.integer(ep, item, "last_share"),
                hash_rate_5m: self.decimal(ep, item, "hash_rate_5m"),
                hash_rate_24h: self.decimal(ep, item, "hash_rate_24h"),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn payouts(&mut self, payload: Option<&Value>) -> Vec<Payout> {
        let ep = Endpoint::Payouts;
        let Some(payload) = payload else {
            self.note_missing(ep);
            return Vec::new();
        };
        self.list(ep, payload, "payouts")
            .iter()
            .map(|item| Payout {
                requested_at: self.integer(ep, item, "requested_at"),
                amount: self.decimal(ep, item, "amount"),
                tx_id: self.text(ep, item, "tx_id"),
                status: self.text(ep, item, "status"),
            })
            .collect()
    }

    fn satoshi(&mut self, field: &str, value: Decimal) -> i64 {
        to_satoshi(value).unwrap_or_else(|| {
            self.note_default(Endpoint::UserProfile, field, "satoshi value out of range");
            0
        })
    }

    pub fn record(&mut self, profile: &ProfileFigures, pool_5m_hash_rate: Decimal) -> NormalizedRecord {
        NormalizedRecord {
            today_reward: profile.today_reward,
            today_reward_satoshi: self.satoshi("today_reward_satoshi", profile.today_reward),
            current_balance: profile.current_balance,
            current_balance_satoshi: self.satoshi("current_balance_satoshi", profile.current_balance),
            all_time_reward: profile.all_time_reward,
            all_time_reward_satoshi: self.satoshi("all_time_reward_satoshi", profile.all_time_reward),
            ok_workers: profile.ok_workers,
            pool_5m_hash_rate,
        }
    }

    pub fn into_defaulted(self) -> Vec<String> {
        self.defaulted
    }
}

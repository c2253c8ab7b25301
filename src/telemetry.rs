use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Data point carrying the relay state.
pub const POWER_ON_DP: &str = "1";
/// Data point carrying current in milliamps.
pub const CURRENT_DP: &str = "18";
/// Data point carrying active power in deciwatts.
pub const POWER_DP: &str = "19";
/// Data point carrying voltage in decivolts.
pub const VOLTAGE_DP: &str = "20";

/// A single raw value as reported by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl DpValue {
    fn as_f64(&self) -> f64 {
        match self {
            DpValue::Int(v) => *v as f64,
            DpValue::Float(v) => *v,
            DpValue::Text(s) => s.trim().parse().unwrap_or_default(),
            DpValue::Bool(_) => 0.0,
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            DpValue::Bool(b) => *b,
            DpValue::Int(v) => *v != 0,
            _ => false,
        }
    }
}

/// Cumulative view of every data point the device has reported so far.
///
/// Updates are last-write-wins per key and keys are never removed, so the
/// merged map only depends on the order of writes to the same key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDataPoints(BTreeMap<String, DpValue>);

impl RawDataPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: DpValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&DpValue> {
        self.0.get(key)
    }

    /// Merges a (possibly partial) update into this map.
    pub fn merge(&mut self, update: &RawDataPoints) {
        for (key, value) in &update.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn number(&self, key: &str) -> f64 {
        self.get(key).map(DpValue::as_f64).unwrap_or_default()
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).map(DpValue::as_bool).unwrap_or_default()
    }
}

impl<K: Into<String>> FromIterator<(K, DpValue)> for RawDataPoints {
    fn from_iter<I: IntoIterator<Item = (K, DpValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// A normalized sample in physical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub watt: f64,
    pub current: f64,
    pub voltage: f64,
    pub power_on: bool,
    pub connected: bool,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// The reading held before the device has reported anything.
    pub fn zeroed(timestamp: DateTime<Utc>) -> Self {
        Self {
            watt: 0.0,
            current: 0.0,
            voltage: 0.0,
            power_on: false,
            connected: false,
            timestamp,
        }
    }
}

/// Converts the merged data points into a reading. Missing keys read as zero/off.
pub fn normalize(points: &RawDataPoints, connected: bool, timestamp: DateTime<Utc>) -> Reading {
    Reading {
        watt: points.number(POWER_DP) / 10.0,
        current: points.number(CURRENT_DP) / 1000.0,
        voltage: points.number(VOLTAGE_DP) / 10.0,
        power_on: points.flag(POWER_ON_DP),
        connected,
        timestamp,
    }
}

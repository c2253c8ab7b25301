//! The device as seen by the rest of the monitor: a configuration, a
//! transport that can be driven, and the events it reports back.

pub mod bridge;

use crate::error::MonitorError;
use crate::telemetry::{DpValue, RawDataPoints};
use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Sender;

/// Identity and credentials of the monitored device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub key: String,
    pub ip: String,
    #[serde(rename = "version")]
    pub protocol_version: String,
}

/// Provisioning payload. Every field is optional so that missing fields can be
/// reported as a configuration error rather than a body rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceRequest {
    pub id: Option<String>,
    pub key: Option<String>,
    pub ip: Option<String>,
    pub version: Option<serde_json::Value>,
}

impl TryFrom<DeviceRequest> for DeviceConfig {
    type Error = MonitorError;

    fn try_from(req: DeviceRequest) -> Result<Self, Self::Error> {
        let version = match req.version {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Ok(DeviceConfig {
            id: required("id", req.id)?,
            key: required("key", req.key)?,
            ip: required("ip", req.ip)?,
            protocol_version: required("version", version)?,
        })
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String, MonitorError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(MonitorError::InvalidConfig(field)),
    }
}

/// Everything a transport reports asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Connected,
    Disconnected,
    Error(String),
    /// Full status report.
    Data(RawDataPoints),
    /// Partial report answering a refresh.
    DpRefresh(RawDataPoints),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Device rejected request with status {0}")]
    Rejected(u16),
}

/// The operations the monitor needs from a device link. Results report
/// whether the request went through; lifecycle and telemetry changes are
/// delivered separately as [`DeviceEvent`]s.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Locates the device on the network.
    async fn discover(&self) -> Result<(), DeviceError>;

    async fn connect(&self) -> Result<(), DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;

    async fn set_data_point(&self, key: &str, value: DpValue) -> Result<(), DeviceError>;

    /// Asks the device to report fresh values.
    async fn refresh(&self) -> Result<(), DeviceError>;
}

/// Builds a fresh transport for a configuration, wired to an event channel.
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &DeviceConfig, events: Sender<DeviceEvent>) -> Arc<dyn DeviceTransport>;
}

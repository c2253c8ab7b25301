use super::{DeviceConfig, DeviceError, DeviceEvent, DeviceTransport, TransportFactory};
use crate::telemetry::{DpValue, RawDataPoints};
use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tracing::debug;

/// Talks to the device through a LAN bridge that exposes its data points
/// over HTTP. The device key is passed as a bearer token.
pub struct BridgeTransport {
    base_url: String,
    config: DeviceConfig,
    client: reqwest::Client,
    events: Sender<DeviceEvent>,
}

#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    ip: &'a str,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct SetRequest {
    value: DpValue,
}

#[derive(Debug, Deserialize)]
struct DpsResponse {
    #[serde(default)]
    dps: RawDataPoints,
}

impl From<reqwest::Error> for DeviceError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => DeviceError::Rejected(status.as_u16()),
            None => DeviceError::Transport(e.to_string()),
        }
    }
}

impl BridgeTransport {
    pub fn new(
        base_url: impl Into<String>,
        config: DeviceConfig,
        client: reqwest::Client,
        events: Sender<DeviceEvent>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            config,
            client,
            events,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/device/{}{}", self.base_url, self.config.id, path)
    }

    async fn emit(&self, event: DeviceEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Dropping event for discarded device handle");
        }
    }

    async fn read_dps(&self) -> Result<RawDataPoints, DeviceError> {
        let response: DpsResponse = self
            .client
            .get(self.url("/dps"))
            .bearer_auth(&self.config.key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.dps)
    }
}

#[async_trait]
impl DeviceTransport for BridgeTransport {
    async fn discover(&self) -> Result<(), DeviceError> {
        self.client
            .get(self.url(""))
            .bearer_auth(&self.config.key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        self.client
            .post(self.url("/connect"))
            .bearer_auth(&self.config.key)
            .json(&ConnectRequest {
                ip: &self.config.ip,
                version: &self.config.protocol_version,
            })
            .send()
            .await?
            .error_for_status()?;

        let points = self.read_dps().await?;
        self.emit(DeviceEvent::Connected).await;
        self.emit(DeviceEvent::Data(points)).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.client
            .post(self.url("/disconnect"))
            .bearer_auth(&self.config.key)
            .send()
            .await?
            .error_for_status()?;
        self.emit(DeviceEvent::Disconnected).await;
        Ok(())
    }

    async fn set_data_point(&self, key: &str, value: DpValue) -> Result<(), DeviceError> {
        self.client
            .put(self.url(&format!("/dps/{key}")))
            .bearer_auth(&self.config.key)
            .json(&SetRequest { value })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn refresh(&self) -> Result<(), DeviceError> {
        match self.read_dps().await {
            Ok(points) => {
                self.emit(DeviceEvent::DpRefresh(points)).await;
                Ok(())
            }
            Err(e) => {
                self.emit(DeviceEvent::Error(e.to_string())).await;
                self.emit(DeviceEvent::Disconnected).await;
                Err(e)
            }
        }
    }
}

/// Creates [`BridgeTransport`]s sharing one HTTP client.
#[derive(Clone, Default)]
pub struct BridgeFactory {
    bridge_url: Option<String>,
    client: reqwest::Client,
}

impl BridgeFactory {
    /// `bridge_url` of `None` addresses the device ip directly.
    pub fn new(bridge_url: Option<String>) -> Self {
        Self {
            bridge_url,
            client: reqwest::Client::new(),
        }
    }

    fn base_url(&self, config: &DeviceConfig) -> String {
        self.bridge_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", config.ip))
    }
}

impl TransportFactory for BridgeFactory {
    fn create(&self, config: &DeviceConfig, events: Sender<DeviceEvent>) -> Arc<dyn DeviceTransport> {
        Arc::new(BridgeTransport::new(
            self.base_url(config),
            config.clone(),
            self.client.clone(),
            events,
        ))
    }
}

#[cfg(test)]
mod test_bridge {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn config() -> DeviceConfig {
        DeviceConfig {
            id: "bf42".into(),
            key: "local_key".into(),
            ip: "192.168.1.50".into(),
            protocol_version: "3.3".into(),
        }
    }

    fn transport(server: &mockito::Server) -> (Arc<dyn DeviceTransport>, mpsc::Receiver<DeviceEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let factory = BridgeFactory::new(Some(server.url()));
        (factory.create(&config(), tx), rx)
    }

    #[tokio::test]
    async fn test_discover() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/device/bf42")
            .match_header("Authorization", "Bearer local_key")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let (device, _rx) = transport(&server);
        device.discover().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_discover_unknown_device() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/device/bf42")
            .with_status(404)
            .create_async()
            .await;

        let (device, _rx) = transport(&server);
        let err = device.discover().await.unwrap_err();
        assert!(matches!(err, DeviceError::Rejected(404)));
    }

    #[tokio::test]
    async fn test_connect_reports_connected_then_data() {
        let mut server = mockito::Server::new_async().await;
        let connect = server
            .mock("POST", "/device/bf42/connect")
            .match_body(Matcher::Json(json!({"ip": "192.168.1.50", "version": "3.3"})))
            .with_status(200)
            .create_async()
            .await;
        let _dps = server
            .mock("GET", "/device/bf42/dps")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"dps": {"1": true, "19": 1200, "20": 2310}}"#)
            .create_async()
            .await;

        let (device, mut rx) = transport(&server);
        device.connect().await.unwrap();
        connect.assert_async().await;

        assert_eq!(rx.recv().await, Some(DeviceEvent::Connected));
        match rx.recv().await {
            Some(DeviceEvent::Data(points)) => {
                assert_eq!(points.get("1"), Some(&DpValue::Bool(true)));
                assert_eq!(points.get("19"), Some(&DpValue::Int(1200)));
            }
            other => panic!("Expected Data event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_emits_partial_update() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/device/bf42/dps")
            .with_status(200)
            .with_body(r#"{"dps": {"19": 55}}"#)
            .create_async()
            .await;

        let (device, mut rx) = transport(&server);
        device.refresh().await.unwrap();

        let expected: RawDataPoints = [("19", DpValue::Int(55))].into_iter().collect();
        assert_eq!(rx.recv().await, Some(DeviceEvent::DpRefresh(expected)));
    }

    #[tokio::test]
    async fn test_refresh_failure_reports_error_and_disconnect() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/device/bf42/dps")
            .with_status(502)
            .create_async()
            .await;

        let (device, mut rx) = transport(&server);
        assert!(device.refresh().await.is_err());

        assert!(matches!(rx.recv().await, Some(DeviceEvent::Error(_))));
        assert_eq!(rx.recv().await, Some(DeviceEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_set_data_point() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/device/bf42/dps/1")
            .match_header("Authorization", "Bearer local_key")
            .match_body(Matcher::Json(json!({"value": false})))
            .with_status(200)
            .create_async()
            .await;

        let (device, _rx) = transport(&server);
        device.set_data_point("1", DpValue::Bool(false)).await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_factory_defaults_to_device_ip() {
        let direct = BridgeFactory::new(None);
        assert_eq!(direct.base_url(&config()), "http://192.168.1.50");

        let bridged = BridgeFactory::new(Some("http://bridge:9000".into()));
        assert_eq!(bridged.base_url(&config()), "http://bridge:9000");
    }
}

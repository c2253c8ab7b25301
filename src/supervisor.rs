use crate::device::{
    DeviceConfig, DeviceError, DeviceEvent, DeviceRequest, DeviceTransport, TransportFactory,
};
use crate::error::{MonitorError, Result};
use crate::persistence::JsonStore;
use crate::settings::Settings;
use crate::telemetry::{normalize, DpValue, RawDataPoints, Reading, POWER_ON_DP};
use chrono::Utc;
use serde_derive::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Disconnected,
    Connected,
}

impl Connectivity {
    pub fn is_connected(&self) -> bool {
        *self == Connectivity::Connected
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub discovery: Duration,
    /// Bound for connect, set, refresh and disconnect.
    pub command: Duration,
    /// Delay before the refresh that follows a toggle.
    pub settle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            discovery: Duration::from_secs(10),
            command: Duration::from_secs(10),
            settle: Duration::from_secs(1),
        }
    }
}

impl From<&Settings> for Timeouts {
    fn from(settings: &Settings) -> Self {
        Self {
            discovery: settings.discovery_timeout,
            command: settings.command_timeout,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
struct Handle {
    generation: u64,
    transport: Arc<dyn DeviceTransport>,
}

/// Everything fed by device events, guarded by a single lock.
struct Link {
    config: Option<DeviceConfig>,
    handle: Option<Handle>,
    generation: u64,
    connectivity: Connectivity,
    connecting: bool,
    data_points: RawDataPoints,
    latest: Reading,
}

impl Link {
    fn mark_disconnected(&mut self) {
        self.connectivity = Connectivity::Disconnected;
        self.latest.connected = false;
    }
}

struct Inner {
    factory: Arc<dyn TransportFactory>,
    persistence: JsonStore,
    timeouts: Timeouts,
    link: Mutex<Link>,
}

/// Owns the device handle and keeps the connection alive.
///
/// The lock is never held across an await, so status readers are never
/// blocked by an in-flight discovery or connect.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        persistence: JsonStore,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                persistence,
                timeouts,
                link: Mutex::new(Link {
                    config: None,
                    handle: None,
                    generation: 0,
                    connectivity: Connectivity::Disconnected,
                    connecting: false,
                    data_points: RawDataPoints::new(),
                    latest: Reading::zeroed(Utc::now()),
                }),
            }),
        }
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.inner
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adopts a previously persisted config without writing it back.
    pub fn resume(&self, config: DeviceConfig) {
        let mut link = self.link();
        info!("Resuming device {} at {}", config.id, config.ip);
        link.config = Some(config.clone());
        self.install_handle(&mut link, &config);
    }

    pub async fn configure(&self, request: DeviceRequest) -> Result<DeviceConfig> {
        if self.link().config.is_some() {
            return Err(MonitorError::AlreadyConfigured);
        }
        let config = DeviceConfig::try_from(request)?;

        let writer = self.inner.persistence.config_writer().await;
        let previous = {
            let mut link = self.link();
            if link.config.is_some() {
                return Err(MonitorError::AlreadyConfigured);
            }
            link.config = Some(config.clone());
            link.data_points = RawDataPoints::new();
            link.latest = Reading::zeroed(Utc::now());
            self.install_handle(&mut link, &config)
        };
        info!("Device {} configured at {}", config.id, config.ip);

        writer.save(Some(&config)).await;
        drop(writer);
        if let Some(previous) = previous {
            self.teardown(previous).await;
        }

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.connect_cycle().await;
        });

        Ok(config)
    }

    /// Drops the device. The reading log is left alone.
    pub async fn deconfigure(&self) -> Result<()> {
        let writer = self.inner.persistence.config_writer().await;
        let previous = {
            let mut link = self.link();
            let config = link.config.take().ok_or(MonitorError::NotConfigured)?;
            info!("Removing device {}", config.id);
            link.connecting = false;
            link.mark_disconnected();
            link.handle.take()
        };
        writer.remove().await;
        drop(writer);

        if let Some(previous) = previous {
            self.teardown(previous.transport).await;
        }
        Ok(())
    }

    pub fn config(&self) -> Option<DeviceConfig> {
        self.link().config.clone()
    }

    pub fn is_configured(&self) -> bool {
        self.link().config.is_some()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.link().connectivity
    }

    pub fn latest(&self) -> Reading {
        self.link().latest.clone()
    }

    /// Latest reading, but only while the device is connected.
    pub fn capture(&self) -> Option<Reading> {
        let link = self.link();
        link.connectivity
            .is_connected()
            .then(|| link.latest.clone())
    }

    /// One discovery + connect attempt. Failures leave the link disconnected
    /// and are retried by the next poll.
    pub async fn connect_cycle(&self) {
        let handle = {
            let mut link = self.link();
            let Some(config) = link.config.clone() else {
                debug!("No device configured, skipping connect");
                return;
            };
            if link.handle.is_none() {
                self.install_handle(&mut link, &config);
            }
            let Some(handle) = link.handle.clone() else {
                return;
            };
            if link.connecting {
                debug!("Connect attempt already in flight");
                return;
            }
            link.connecting = true;
            handle
        };

        let outcome = self.attempt_connect(&handle.transport).await;

        let mut link = self.link();
        if link.handle.as_ref().map(|h| h.generation) != Some(handle.generation) {
            debug!("Discarding outcome of superseded connect attempt");
            return;
        }
        link.connecting = false;
        match outcome {
            Ok(()) => debug!("Connect attempt finished"),
            Err(e) => {
                warn!("Device connect failed: {}", e);
                link.mark_disconnected();
            }
        }
    }

    async fn attempt_connect(&self, transport: &Arc<dyn DeviceTransport>) -> std::result::Result<(), DeviceError> {
        let timeouts = self.inner.timeouts;
        bounded(timeouts.discovery, "Discovery", transport.discover()).await?;
        bounded(timeouts.command, "Connect", transport.connect()).await
    }

    /// Asks a connected device for fresh values. Failures arrive as events.
    pub async fn refresh(&self) {
        let handle = {
            let link = self.link();
            match (&link.handle, link.connectivity) {
                (Some(handle), Connectivity::Connected) => handle.clone(),
                _ => return,
            }
        };

        if let Err(DeviceError::Timeout(op)) =
            bounded(self.inner.timeouts.command, "Refresh", handle.transport.refresh()).await
        {
            self.apply_event(handle.generation, DeviceEvent::Error(format!("{op} timed out")));
        }
    }

    /// Flips the relay and returns the intended state without waiting for
    /// the device to confirm it. A refresh shortly after reconciles the
    /// latest reading.
    pub async fn toggle(&self) -> Result<bool> {
        let (handle, target) = {
            let link = self.link();
            match (&link.handle, link.connectivity) {
                (Some(handle), Connectivity::Connected) => (handle.clone(), !link.latest.power_on),
                _ => return Err(MonitorError::NotConnected),
            }
        };

        info!("Switching device {}", if target { "on" } else { "off" });
        bounded(
            self.inner.timeouts.command,
            "Set",
            handle
                .transport
                .set_data_point(POWER_ON_DP, DpValue::Bool(target)),
        )
        .await
        .map_err(|e| MonitorError::Command(e.to_string()))?;

        let supervisor = self.clone();
        let settle = self.inner.timeouts.settle;
        tokio::spawn(async move {
            sleep(settle).await;
            supervisor.refresh().await;
        });

        Ok(target)
    }

    /// Disconnects the device but keeps its config.
    pub async fn shutdown(&self) {
        let handle = {
            let mut link = self.link();
            link.connecting = false;
            link.mark_disconnected();
            link.handle.take()
        };
        if let Some(handle) = handle {
            self.teardown(handle.transport).await;
        }
    }

    /// Replaces the handle with a fresh transport and returns the old one.
    fn install_handle(
        &self,
        link: &mut Link,
        config: &DeviceConfig,
    ) -> Option<Arc<dyn DeviceTransport>> {
        link.generation += 1;
        let generation = link.generation;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let transport = self.inner.factory.create(config, tx);

        link.connecting = false;
        link.mark_disconnected();
        let previous = link.handle.replace(Handle {
            generation,
            transport,
        });

        Self::spawn_event_loop(Arc::downgrade(&self.inner), generation, rx);
        previous.map(|h| h.transport)
    }

    fn spawn_event_loop(inner: Weak<Inner>, generation: u64, mut events: Receiver<DeviceEvent>) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                Supervisor { inner }.apply_event(generation, event);
            }
            debug!("Event loop for handle {} finished", generation);
        });
    }

    async fn teardown(&self, transport: Arc<dyn DeviceTransport>) {
        // A handle that never connected may refuse to disconnect.
        if let Err(e) = bounded(self.inner.timeouts.command, "Disconnect", transport.disconnect()).await
        {
            debug!("Ignoring teardown error: {}", e);
        }
    }

    fn apply_event(&self, generation: u64, event: DeviceEvent) {
        let mut link = self.link();
        if link.handle.as_ref().map(|h| h.generation) != Some(generation) {
            debug!("Ignoring {:?} from discarded handle {}", event, generation);
            return;
        }

        match event {
            DeviceEvent::Connected => {
                if !link.connectivity.is_connected() {
                    info!("Device connected");
                }
                link.connectivity = Connectivity::Connected;
                link.latest.connected = true;
            }
            DeviceEvent::Disconnected => {
                if link.connectivity.is_connected() {
                    info!("Device disconnected");
                }
                link.mark_disconnected();
            }
            DeviceEvent::Error(message) => {
                warn!("Device error: {}", message);
                link.mark_disconnected();
            }
            DeviceEvent::Data(points) | DeviceEvent::DpRefresh(points) => {
                link.data_points.merge(&points);
                let reading = normalize(
                    &link.data_points,
                    link.connectivity.is_connected(),
                    Utc::now(),
                );
                debug!(
                    "Reading {}W {}A {}V on={}",
                    reading.watt, reading.current, reading.voltage, reading.power_on
                );
                link.latest = reading;
            }
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    op: &'static str,
    fut: impl Future<Output = std::result::Result<T, DeviceError>>,
) -> std::result::Result<T, DeviceError> {
    timeout(limit, fut)
        .await
        .map_err(|_| DeviceError::Timeout(op))?
}

use crate::device::TransportFactory;
use crate::energy::integrate;
use crate::persistence::JsonStore;
use crate::settings::Settings;
use crate::store::{RangeQuery, ReadingStore};
use crate::supervisor::{Supervisor, Timeouts};
use crate::telemetry::Reading;
use chrono::Utc;
use serde_derive::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Integrated energy over a query window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergySummary {
    pub energy_kwh: f64,
    pub readings_count: usize,
}

/// Shared application state handed to the scheduler and the HTTP layer.
#[derive(Clone)]
pub struct App {
    pub supervisor: Supervisor,
    readings: Arc<Mutex<ReadingStore>>,
    persistence: JsonStore,
}

impl App {
    pub fn new(supervisor: Supervisor, readings: ReadingStore, persistence: JsonStore) -> Self {
        Self {
            supervisor,
            readings: Arc::new(Mutex::new(readings)),
            persistence,
        }
    }

    /// Restores persisted state and builds the app around `factory`.
    pub async fn load(settings: &Settings, factory: Arc<dyn TransportFactory>) -> Self {
        let persistence = JsonStore::new(&settings.data_dir);
        let supervisor = Supervisor::new(factory, persistence.clone(), Timeouts::from(settings));

        if let Some(config) = persistence.load_config().await {
            supervisor.resume(config);
        }
        let readings = persistence.load_readings().await;
        info!("Loaded {} stored readings", readings.len());

        Self::new(supervisor, ReadingStore::from_readings(readings), persistence)
    }

    fn readings(&self) -> MutexGuard<'_, ReadingStore> {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends the latest reading if the device is connected. Returns whether
    /// anything was stored.
    pub fn capture(&self) -> bool {
        match self.supervisor.capture() {
            Some(reading) => {
                debug!("Captured {}W", reading.watt);
                self.readings().append(reading);
                true
            }
            None => {
                debug!("Device disconnected, nothing captured");
                false
            }
        }
    }

    /// Rewrites both persisted documents. The config is read while holding
    /// the config writer so a concurrent configure or deconfigure cannot be
    /// undone by a stale copy.
    pub async fn flush(&self) {
        let snapshot = self.readings().readings().to_vec();
        self.persistence.save_readings(&snapshot).await;

        let writer = self.persistence.config_writer().await;
        writer.save(self.supervisor.config().as_ref()).await;
        drop(writer);
        debug!("Flushed {} readings", snapshot.len());
    }

    pub fn stored_count(&self) -> usize {
        self.readings().len()
    }

    pub fn history(&self, query: &RangeQuery) -> Vec<Reading> {
        self.readings().query(query, Utc::now())
    }

    pub fn energy(&self, query: &RangeQuery) -> EnergySummary {
        let readings = self.history(query);
        EnergySummary {
            energy_kwh: integrate(&readings),
            readings_count: readings.len(),
        }
    }
}

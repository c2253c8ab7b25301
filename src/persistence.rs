use crate::device::DeviceConfig;
use crate::telemetry::Reading;
use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const CONFIG_FILE: &str = "device.json";
const READINGS_FILE: &str = "readings.json";

/// Whole-document JSON storage for the device config and the reading log.
///
/// Failures are logged and never propagated: a failed load yields the empty
/// default and a failed save leaves the previous document in place.
///
/// The config document is only written through a [`ConfigWriter`], which
/// serializes writers so that the config a caller read is the one on disk
/// when it lets go.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
    config_lock: Arc<Mutex<()>>,
}

/// Exclusive access to the config document for as long as it is held.
pub struct ConfigWriter<'a> {
    store: &'a JsonStore,
    _guard: MutexGuard<'a, ()>,
}

impl ConfigWriter<'_> {
    /// Writes the config, or removes the document when there is none.
    pub async fn save(&self, config: Option<&DeviceConfig>) {
        match config {
            Some(config) => self.store.save(CONFIG_FILE, config).await,
            None => self.remove().await,
        }
    }

    pub async fn remove(&self) {
        let path = self.store.dir.join(CONFIG_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            config_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn load_config(&self) -> Option<DeviceConfig> {
        self.load(CONFIG_FILE).await
    }

    /// Waits for every other config writer to finish.
    pub async fn config_writer(&self) -> ConfigWriter<'_> {
        ConfigWriter {
            store: self,
            _guard: self.config_lock.lock().await,
        }
    }

    pub async fn load_readings(&self) -> Vec<Reading> {
        self.load(READINGS_FILE).await.unwrap_or_default()
    }

    pub async fn save_readings(&self, readings: &[Reading]) {
        self.save(READINGS_FILE, &readings).await
    }

    async fn load<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.dir.join(name);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn save<T: Serialize + ?Sized>(&self, name: &str, value: &T) {
        if let Err(e) = self.write_json(name, value).await {
            warn!("Failed to persist {}: {:#}", name, e);
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let body = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;

        debug!("Persisted {}", path.display());
        Ok(())
    }
}

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: String,
    pub data_dir: PathBuf,
    /// Base URL of the device bridge. Falls back to `http://{device ip}` when unset.
    pub bridge_url: Option<String>,
    pub poll_interval: Duration,
    pub capture_interval: Duration,
    pub flush_interval: Duration,
    pub discovery_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            data_dir: PathBuf::from("data"),
            bridge_url: None,
            poll_interval: Duration::from_secs(5),
            capture_interval: Duration::from_secs(60),
            flush_interval: Duration::from_secs(60),
            discovery_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let settings = Self {
            listen_addr: env::var("MONITOR_LISTEN").unwrap_or(defaults.listen_addr),
            data_dir: env::var("MONITOR_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            bridge_url: env::var("DEVICE_BRIDGE_URL")
                .ok()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            poll_interval: secs_or("MONITOR_POLL_SECS", defaults.poll_interval),
            capture_interval: secs_or("MONITOR_CAPTURE_SECS", defaults.capture_interval),
            flush_interval: secs_or("MONITOR_FLUSH_SECS", defaults.flush_interval),
            discovery_timeout: secs_or("DEVICE_DISCOVERY_TIMEOUT_SECS", defaults.discovery_timeout),
            command_timeout: secs_or("DEVICE_COMMAND_TIMEOUT_SECS", defaults.command_timeout),
        };

        info!("Monitor config:");
        info!("  Listen: {}", settings.listen_addr);
        info!("  Data dir: {}", settings.data_dir.display());
        info!(
            "  Bridge: {}",
            settings.bridge_url.as_deref().unwrap_or("device ip")
        );
        info!(
            "  Poll/capture/flush: {:?}/{:?}/{:?}",
            settings.poll_interval, settings.capture_interval, settings.flush_interval
        );

        settings
    }
}

fn secs_or(var: &str, default: Duration) -> Duration {
    match parse_secs(env::var(var).ok()) {
        Some(secs) => Duration::from_secs(secs),
        None => {
            if env::var(var).is_ok() {
                warn!("Ignoring invalid {}, using {:?}", var, default);
            }
            default
        }
    }
}

/// Parses a positive whole number of seconds.
fn parse_secs(val: Option<String>) -> Option<u64> {
    val?.trim().parse().ok().filter(|secs| *secs > 0)
}

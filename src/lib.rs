//! Plug Energy Monitor Library
//!
//! Keeps a live link to a single smart plug, normalizes its telemetry into
//! physical units, stores periodic readings and integrates them into energy
//! consumption over arbitrary time windows.

pub mod api;
pub mod app;
pub mod device;
pub mod energy;
pub mod error;
pub mod persistence;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod supervisor;
pub mod telemetry;

// Re-export commonly used types for easier access
pub use app::App;
pub use device::{DeviceConfig, DeviceEvent, DeviceTransport, TransportFactory};
pub use error::MonitorError;
pub use scheduler::Scheduler;
pub use settings::Settings;
pub use supervisor::{Connectivity, Supervisor};
pub use telemetry::Reading;

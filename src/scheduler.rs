use crate::app::App;
use crate::settings::Settings;
use crate::supervisor::{Connectivity, Supervisor};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Runs the periodic activities: connection upkeep, capture and flush.
/// Capture and flush are independent timers with no ordering between them.
pub struct Scheduler {
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(app: App, settings: &Settings) -> Self {
        info!("Starting scheduler");

        let supervisor = app.supervisor.clone();
        let poll = spawn_periodic("poll", settings.poll_interval, true, move || {
            let supervisor = supervisor.clone();
            async move { poll_once(&supervisor).await }
        });

        let capture_app = app.clone();
        let capture = spawn_periodic("capture", settings.capture_interval, false, move || {
            let app = capture_app.clone();
            async move {
                app.capture();
            }
        });

        let flush = spawn_periodic("flush", settings.flush_interval, false, move || {
            let app = app.clone();
            async move { app.flush().await }
        });

        Self {
            tasks: vec![poll, capture, flush],
        }
    }

    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
        info!("Scheduler stopped");
    }
}

/// Reconnects a disconnected device, or asks a connected one for fresh values.
pub async fn poll_once(supervisor: &Supervisor) {
    if !supervisor.is_configured() {
        return;
    }
    match supervisor.connectivity() {
        Connectivity::Disconnected => supervisor.connect_cycle().await,
        Connectivity::Connected => {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                supervisor.refresh().await;
            });
        }
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    immediate: bool,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = if immediate {
            interval(period)
        } else {
            interval_at(Instant::now() + period, period)
        };
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            debug!("Running {} tick", name);
            job().await;
        }
    })
}

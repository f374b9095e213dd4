//! Periodic backup poll loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use super::tracker::OrderTracker;
use crate::application::stream::StreamLifecycleManager;

/// Runs [`OrderTracker::backup_poll`] on an adaptive interval: short while
/// the private stream is down or silent, long while it is healthy.
pub struct BackupPoller {
    tracker: Arc<OrderTracker>,
    stream: Option<Arc<StreamLifecycleManager>>,
}

impl BackupPoller {
    pub fn new(tracker: Arc<OrderTracker>, stream: Option<Arc<StreamLifecycleManager>>) -> Self {
        Self { tracker, stream }
    }

    /// True when the private stream is up and has delivered data recently.
    #[must_use]
    pub fn stream_healthy(&self) -> bool {
        let Some(stream) = &self.stream else {
            return false;
        };
        let silence = self.tracker.settings().stream_silence_threshold;
        stream.is_ready()
            && stream
                .last_received_at()
                .is_some_and(|at| Instant::now().saturating_duration_since(at) < silence)
    }

    #[must_use]
    pub fn next_interval(&self) -> Duration {
        self.tracker.poll_interval(self.stream_healthy())
    }

    /// Poll immediately, then on every interval until shutdown. A pass still
    /// waiting on the rate limiter is abandoned on shutdown; it has consumed
    /// nothing.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("backup poll started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let report = tokio::select! {
                report = self.tracker.backup_poll() => report,
                _ = shutdown.changed() => break,
            };
            let interval = self.next_interval();
            debug!(polled = report.polled, next_ms = interval.as_millis() as u64, "backup poll tick");
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("backup poll stopped");
    }
}

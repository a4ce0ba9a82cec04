use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stockwatch_inventory::Alert;

use super::sink::{AlertError, AlertSink};

pub const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers alerts with a bounded timeout and logs every failure.
///
/// Callers never see a delivery failure as a failure of their own operation:
/// `deliver` returns the outcome for reporting only, `dispatch` detaches it.
#[derive(Clone)]
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub fn with_default_timeout(sink: Arc<dyn AlertSink>) -> Self {
        Self::new(sink, DEFAULT_ALERT_TIMEOUT)
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_enabled()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deliver and wait, at most `timeout`.
    pub async fn deliver(&self, alert: Alert) -> Result<(), AlertError> {
        if !self.sink.is_enabled() {
            debug!(subject = %alert.subject, "no alert channel configured; skipping");
            return Ok(());
        }

        let result = match tokio::time::timeout(
            self.timeout,
            self.sink.notify(&alert.subject, &alert.body),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AlertError::Timeout(self.timeout)),
        };

        if let Err(e) = &result {
            warn!(subject = %alert.subject, error = %e, "failed to deliver alert");
        }
        result
    }

    /// Deliver on a background task; the caller does not wait.
    pub fn dispatch(&self, alert: Alert) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.deliver(alert).await;
        })
    }
}

impl core::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("enabled", &self.sink.is_enabled())
            .field("timeout", &self.timeout)
            .finish()
    }
}

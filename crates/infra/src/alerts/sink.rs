use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

use stockwatch_inventory::Alert;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    Delivery(String),

    #[error("alert delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers a textual alert to an operator channel.
#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError>;

    /// Whether this sink delivers anywhere. Dispatchers skip disabled sinks entirely.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Sink used when no delivery channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAlertSink;

#[async_trait]
impl AlertSink for NullAlertSink {
    async fn notify(&self, _subject: &str, _body: &str) -> Result<(), AlertError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Console channel: alerts become `warn` level log records.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError> {
        warn!(subject, "{body}");
        Ok(())
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    inner: Mutex<Vec<Alert>>,
    recorded: Notify,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.inner.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Wait until at least `n` alerts were recorded. Returns `false` on timeout.
    pub async fn wait_for(&self, n: usize, within: Duration) -> bool {
        let wait = async {
            loop {
                let recorded = self.recorded.notified();
                if self.count() >= n {
                    return;
                }
                recorded.await;
            }
        };
        tokio::time::timeout(within, wait).await.is_ok()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError> {
        self.inner
            .lock()
            .map_err(|_| AlertError::Delivery("lock poisoned".to_string()))?
            .push(Alert::new(subject, body));
        self.recorded.notify_waiters();
        Ok(())
    }
}

/// Delivers to every inner sink; reports the first failure after trying all.
#[derive(Default)]
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for FanoutAlertSink {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError> {
        let mut first_error = None;
        for sink in self.sinks.iter().filter(|s| s.is_enabled()) {
            if let Err(e) = sink.notify(subject, body).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_enabled(&self) -> bool {
        self.sinks.iter().any(|s| s.is_enabled())
    }
}

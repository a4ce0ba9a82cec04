//! Periodic low-stock sweeper.
//!
//! - Schedule: once at start, then every `interval` (missed ticks are skipped)
//! - Event-trigger: `handle.trigger()` requests an extra sweep; triggers coalesce
//! - Failures: logged and never propagated; the next tick runs regardless
//!
//! The sweeper only reads items. It never touches stock or the transaction log.

use std::sync::Arc;

use futures::TryStreamExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use stockwatch_inventory::{Alert, Item};

use crate::alerts::AlertDispatcher;
use crate::config::SweeperConfig;
use crate::store::{ItemStore, StoreError};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Items found at or below their reorder point.
    pub low_items: usize,
    /// An alert was raised and its delivery did not fail.
    pub alerted: bool,
}

pub struct LowStockSweeper<I: ?Sized> {
    store: Arc<I>,
    alerts: AlertDispatcher,
    config: SweeperConfig,
}

impl<I> LowStockSweeper<I>
where
    I: ItemStore + ?Sized,
{
    pub fn new(store: Arc<I>, alerts: AlertDispatcher, config: SweeperConfig) -> Self {
        Self {
            store,
            alerts,
            config,
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Scan once and send at most one consolidated alert.
    ///
    /// A failed scan is returned; a failed delivery is only logged and reported
    /// through `alerted`.
    pub async fn run_once(&self) -> Result<SweepReport, StoreError> {
        let low: Vec<Item> = self.store.list_at_or_below_threshold().try_collect().await?;

        let Some(alert) = Alert::low_stock_summary(&low) else {
            debug!("low-stock sweep found nothing");
            return Ok(SweepReport {
                low_items: 0,
                alerted: false,
            });
        };

        info!(low_items = low.len(), "low-stock sweep found items to reorder");
        let alerted = self.alerts.deliver(alert).await.is_ok();

        Ok(SweepReport {
            low_items: low.len(),
            alerted,
        })
    }

    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// Returns `None` when the sweeper is disabled. Dropping the handle leaves the
    /// loop running; call [`SweeperHandle::stop`] to end it.
    pub fn start(self) -> Option<SweeperHandle> {
        if !self.config.enabled {
            info!("low-stock sweeper disabled");
            return None;
        }

        let shutdown = Arc::new(Notify::new());
        let trigger = Arc::new(Notify::new());
        let join = tokio::spawn(self.run(shutdown.clone(), trigger.clone()));

        Some(SweeperHandle {
            shutdown,
            trigger,
            join,
        })
    }

    async fn run(self, shutdown: Arc<Notify>, trigger: Arc<Notify>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "low-stock sweeper started"
        );

        // The first tick completes immediately.
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                _ = ticker.tick() => {}
                _ = trigger.notified() => debug!("low-stock sweep triggered"),
            }

            if let Err(e) = self.run_once().await {
                warn!(error = %e, "low-stock sweep failed; will retry next tick");
            }
        }

        info!("low-stock sweeper stopped");
    }
}

/// Handle for a running sweeper (shutdown + trigger hook).
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Arc<Notify>,
    trigger: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Request an out-of-band sweep. Several requests before the loop wakes count once.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop the loop and wait for it to exit. A sweep in progress finishes first.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            error!(error = %e, "low-stock sweeper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use futures::stream::{self, BoxStream, StreamExt};

    use super::*;
    use crate::alerts::{AlertError, AlertSink, RecordingAlertSink};
    use crate::store::InMemoryInventoryStore;
    use stockwatch_core::{ExpectedVersion, ItemId};
    use stockwatch_inventory::{ItemQuery, NewItem, Page};

    async fn seed(store: &InMemoryInventoryStore, name: &str, stock: i64, reorder: i64) -> Item {
        let item = NewItem::new(name)
            .with_stock_level(stock)
            .with_reorder_point(reorder)
            .into_item(ItemId::new(), Utc::now())
            .unwrap();
        store.insert(item).await.unwrap()
    }

    fn sweeper(
        store: Arc<InMemoryInventoryStore>,
        sink: Arc<RecordingAlertSink>,
        interval: Duration,
    ) -> LowStockSweeper<InMemoryInventoryStore> {
        LowStockSweeper::new(
            store,
            AlertDispatcher::with_default_timeout(sink),
            SweeperConfig::default().with_interval(interval),
        )
    }

    #[tokio::test]
    async fn sweep_alerts_once_for_low_items_only() {
        let store = Arc::new(InMemoryInventoryStore::new());
        seed(&store, "Gasket", 2, 5).await;
        seed(&store, "Flange", 20, 5).await;
        let sink = Arc::new(RecordingAlertSink::new());

        let report = sweeper(store, sink.clone(), Duration::from_secs(3600))
            .run_once()
            .await
            .unwrap();

        assert_eq!(
            report,
            SweepReport {
                low_items: 1,
                alerted: true
            }
        );
        let alerts = sink.all();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].subject, "Low Stock Alert");
        assert_eq!(
            alerts[0].body,
            "LOW STOCK ALERT:\nGasket (stock: 2, reorderPoint: 5)"
        );
    }

    #[tokio::test]
    async fn sweep_without_low_items_is_silent() {
        let store = Arc::new(InMemoryInventoryStore::new());
        seed(&store, "Flange", 20, 5).await;
        let sink = Arc::new(RecordingAlertSink::new());

        let report = sweeper(store, sink.clone(), Duration::from_secs(3600))
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.low_items, 0);
        assert!(!report.alerted);
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn sweep_does_not_mutate_items() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let item = seed(&store, "Gasket", 0, 5).await;
        let sink = Arc::new(RecordingAlertSink::new());

        sweeper(store.clone(), sink, Duration::from_secs(3600))
            .run_once()
            .await
            .unwrap();

        assert_eq!(store.get(item.id).await.unwrap(), item);
    }

    #[tokio::test]
    async fn disabled_sweeper_does_not_start() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let sweeper = LowStockSweeper::new(
            store,
            AlertDispatcher::with_default_timeout(Arc::new(RecordingAlertSink::new())),
            SweeperConfig::default().with_enabled(false),
        );
        assert!(sweeper.start().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_at_start_then_every_interval() {
        let store = Arc::new(InMemoryInventoryStore::new());
        seed(&store, "Gasket", 1, 5).await;
        let sink = Arc::new(RecordingAlertSink::new());
        let handle = sweeper(store, sink.clone(), Duration::from_secs(60))
            .start()
            .unwrap();

        assert!(sink.wait_for(1, Duration::from_secs(1)).await);
        assert_eq!(sink.count(), 1);

        assert!(sink.wait_for(3, Duration::from_secs(125)).await);

        handle.stop().await;
        let after_stop = sink.count();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(sink.count(), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_requests_an_extra_sweep() {
        let store = Arc::new(InMemoryInventoryStore::new());
        seed(&store, "Gasket", 1, 5).await;
        let sink = Arc::new(RecordingAlertSink::new());
        let handle = sweeper(store, sink.clone(), Duration::from_secs(3600))
            .start()
            .unwrap();
        assert!(sink.wait_for(1, Duration::from_secs(1)).await);

        handle.trigger();

        assert!(sink.wait_for(2, Duration::from_secs(1)).await);
        handle.stop().await;
    }

    struct BrokenSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for BrokenSink {
        async fn notify(&self, _subject: &str, _body: &str) -> Result<(), AlertError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AlertError::Delivery("smtp relay refused".to_string()))
        }
    }

    #[derive(Default)]
    struct HangingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for HangingSink {
        async fn notify(&self, _subject: &str, _body: &str) -> Result<(), AlertError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_delivery_is_reported_not_raised() {
        let store = Arc::new(InMemoryInventoryStore::new());
        seed(&store, "Gasket", 2, 5).await;
        let sink = Arc::new(BrokenSink {
            attempts: AtomicUsize::new(0),
        });

        let report = LowStockSweeper::new(
            store,
            AlertDispatcher::with_default_timeout(sink.clone()),
            SweeperConfig::default(),
        )
        .run_once()
        .await
        .unwrap();

        assert_eq!(
            report,
            SweepReport {
                low_items: 1,
                alerted: false
            }
        );
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_delivery_times_out() {
        let store = Arc::new(InMemoryInventoryStore::new());
        seed(&store, "Gasket", 2, 5).await;

        let report = LowStockSweeper::new(
            store,
            AlertDispatcher::new(Arc::new(HangingSink::default()), Duration::from_secs(5)),
            SweeperConfig::default(),
        )
        .run_once()
        .await
        .unwrap();

        assert_eq!(
            report,
            SweepReport {
                low_items: 1,
                alerted: false
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_does_not_stop_the_schedule() {
        let store = Arc::new(InMemoryInventoryStore::new());
        seed(&store, "Gasket", 2, 5).await;
        let sink = Arc::new(BrokenSink {
            attempts: AtomicUsize::new(0),
        });
        let handle = LowStockSweeper::new(
            store,
            AlertDispatcher::with_default_timeout(sink.clone()),
            SweeperConfig::default().with_interval(Duration::from_secs(60)),
        )
        .start()
        .unwrap();

        tokio::time::sleep(Duration::from_secs(150)).await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert!(!handle.is_finished());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hung_delivery_does_not_block_the_next_tick() {
        let store = Arc::new(InMemoryInventoryStore::new());
        seed(&store, "Gasket", 2, 5).await;
        let sink = Arc::new(HangingSink::default());
        let handle = LowStockSweeper::new(
            store,
            AlertDispatcher::new(sink.clone(), Duration::from_secs(5)),
            SweeperConfig::default().with_interval(Duration::from_secs(60)),
        )
        .start()
        .unwrap();

        // Start, 60s and 120s ticks each time out after 5s.
        tokio::time::sleep(Duration::from_secs(130)).await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert!(!handle.is_finished());
        handle.stop().await;
    }

    /// Fails the first scan, then delegates.
    struct FlakyStore {
        inner: InMemoryInventoryStore,
        scans: AtomicUsize,
    }

    #[async_trait]
    impl ItemStore for FlakyStore {
        async fn insert(&self, item: Item) -> Result<Item, StoreError> {
            self.inner.insert(item).await
        }
        async fn get(&self, id: ItemId) -> Result<Item, StoreError> {
            self.inner.get(id).await
        }
        async fn compare_and_set(&self, id: ItemId, e: i64, n: i64) -> Result<Item, StoreError> {
            self.inner.compare_and_set(id, e, n).await
        }
        async fn replace(&self, item: Item, expected: ExpectedVersion) -> Result<Item, StoreError> {
            self.inner.replace(item, expected).await
        }
        async fn delete(&self, id: ItemId, expected: ExpectedVersion) -> Result<(), StoreError> {
            self.inner.delete(id, expected).await
        }
        async fn list(&self, query: &ItemQuery) -> Result<Page<Item>, StoreError> {
            ItemStore::list(&self.inner, query).await
        }
        fn list_at_or_below_threshold(&self) -> BoxStream<'_, Result<Item, StoreError>> {
            if self.scans.fetch_add(1, Ordering::SeqCst) == 0 {
                return stream::iter(vec![Err(StoreError::Unavailable(
                    "connection reset".to_string(),
                ))])
                .boxed();
            }
            self.inner.list_at_or_below_threshold()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_scan_does_not_stop_the_schedule() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryInventoryStore::new(),
            scans: AtomicUsize::new(0),
        });
        seed(&store.inner, "Gasket", 1, 5).await;
        let sink = Arc::new(RecordingAlertSink::new());
        let handle = LowStockSweeper::new(
            store.clone(),
            AlertDispatcher::with_default_timeout(sink.clone()),
            SweeperConfig::default().with_interval(Duration::from_secs(60)),
        )
        .start()
        .unwrap();

        assert!(sink.wait_for(1, Duration::from_secs(90)).await);
        assert!(store.scans.load(Ordering::SeqCst) >= 2);
        handle.stop().await;
    }
}

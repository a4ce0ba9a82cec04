//! Integration tests for the full stock pipeline.
//!
//! Tests: Catalog → Engine → InventoryStore → Alerts, and the Sweeper
//!
//! Verifies:
//! - Movements update stock and the log together, or not at all
//! - Concurrent movements on one item never lose updates
//! - Reorder and sweep alerts fire exactly when stock is at or below the reorder point

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use stockwatch_inventory::{MovementType, NewItem};

    use crate::alerts::{AlertDispatcher, RecordingAlertSink};
    use crate::catalog::{CatalogError, ItemCatalog};
    use crate::config::{AlertConfig, EngineConfig, SweeperConfig};
    use crate::engine::{MovementError, StockTransactionEngine};
    use crate::store::{InMemoryInventoryStore, ItemStore, TransactionLog};
    use crate::sweeper::{LowStockSweeper, SweepReport};

    struct Harness {
        store: Arc<InMemoryInventoryStore>,
        alerts: Arc<RecordingAlertSink>,
        catalog: ItemCatalog<InMemoryInventoryStore>,
        engine: StockTransactionEngine<InMemoryInventoryStore>,
    }

    fn setup(config: EngineConfig) -> Harness {
        let store = Arc::new(InMemoryInventoryStore::new());
        let alerts = Arc::new(RecordingAlertSink::new());
        let dispatcher = AlertDispatcher::new(alerts.clone(), AlertConfig::default().timeout);

        Harness {
            catalog: ItemCatalog::new(store.clone()),
            engine: StockTransactionEngine::new(store.clone(), dispatcher, config),
            store,
            alerts,
        }
    }

    fn sweeper(h: &Harness) -> LowStockSweeper<InMemoryInventoryStore> {
        LowStockSweeper::new(
            h.store.clone(),
            AlertDispatcher::with_default_timeout(h.alerts.clone()),
            SweeperConfig::default(),
        )
    }

    fn awaited() -> EngineConfig {
        EngineConfig::default().with_detach_alerts(false)
    }

    #[tokio::test]
    async fn out_movement_crossing_reorder_point_alerts_and_records() {
        let h = setup(awaited());
        let item = h
            .catalog
            .create_item(NewItem::new("Hex key").with_stock_level(10).with_reorder_point(5))
            .await
            .unwrap();

        let receipt = h.engine.stock_out(item.id, 6).await.unwrap();

        assert_eq!(receipt.item.stock_level, 4);
        assert_eq!(h.store.get(item.id).await.unwrap().stock_level, 4);

        let history = h.store.history(item.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, MovementType::Out);
        assert_eq!(history[0].quantity.get(), 6);

        let alerts = h.alerts.all();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].body.contains("Hex key"));
        assert!(alerts[0].body.contains('4'));
        assert!(alerts[0].body.contains('5'));
    }

    #[tokio::test]
    async fn oversized_out_movement_leaves_everything_untouched() {
        let h = setup(awaited());
        let item = h
            .catalog
            .create_item(NewItem::new("Hex key").with_stock_level(4).with_reorder_point(5))
            .await
            .unwrap();

        let err = h.engine.stock_out(item.id, 10).await.unwrap_err();

        assert!(matches!(err, MovementError::InsufficientStock { .. }));
        assert_eq!(h.store.get(item.id).await.unwrap().stock_level, 4);
        assert!(h.store.history(item.id).await.unwrap().is_empty());
        assert_eq!(h.alerts.count(), 0);
    }

    #[tokio::test]
    async fn sweep_alerts_once_naming_only_low_items() {
        let h = setup(awaited());
        h.catalog
            .create_item(NewItem::new("Drill bit").with_stock_level(2).with_reorder_point(5))
            .await
            .unwrap();
        h.catalog
            .create_item(NewItem::new("Sandpaper").with_stock_level(20).with_reorder_point(5))
            .await
            .unwrap();

        let report = sweeper(&h).run_once().await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                low_items: 1,
                alerted: true
            }
        );
        let alerts = h.alerts.all();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].body.contains("Drill bit"));
        assert!(!alerts[0].body.contains("Sandpaper"));
    }

    #[tokio::test]
    async fn sweep_with_nothing_low_sends_no_alert() {
        let h = setup(awaited());
        h.catalog
            .create_item(NewItem::new("Sandpaper").with_stock_level(20).with_reorder_point(5))
            .await
            .unwrap();

        let report = sweeper(&h).run_once().await.unwrap();

        assert!(!report.alerted);
        assert_eq!(h.alerts.count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_in_movements_lose_no_updates() {
        const N: usize = 64;
        let h = setup(
            EngineConfig::default()
                .with_detach_alerts(false)
                .with_max_conflict_retries(10_000),
        );
        let item = h
            .catalog
            .create_item(NewItem::new("Rivet").with_stock_level(0).with_reorder_point(0))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..N)
            .map(|_| {
                let engine = h.engine.clone();
                tokio::spawn(async move { engine.stock_in(item.id, 1).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let after = h.store.get(item.id).await.unwrap();
        assert_eq!(after.stock_level, N as i64);
        assert_eq!(after.version, 1 + N as u64);

        let history = h.store.history(item.id).await.unwrap();
        assert_eq!(history.len(), N);
        let mut ids: Vec<_> = history.iter().map(|t| t.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), N);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_out_movements_never_oversell() {
        let h = setup(
            EngineConfig::default()
                .with_detach_alerts(false)
                .with_max_conflict_retries(10_000),
        );
        let item = h
            .catalog
            .create_item(NewItem::new("Rivet").with_stock_level(10).with_reorder_point(0))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..25)
            .map(|_| {
                let engine = h.engine.clone();
                tokio::spawn(async move { engine.stock_out(item.id, 1).await })
            })
            .collect();

        let mut committed = 0;
        let mut refused = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => committed += 1,
                Err(MovementError::InsufficientStock { .. }) => refused += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(committed, 10);
        assert_eq!(refused, 15);
        assert_eq!(h.store.get(item.id).await.unwrap().stock_level, 0);
        assert_eq!(h.store.history(item.id).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn stock_equals_initial_plus_ins_minus_outs() {
        let h = setup(awaited());
        let item = h
            .catalog
            .create_item(NewItem::new("Cable tie").with_stock_level(7).with_reorder_point(2))
            .await
            .unwrap();

        let moves = [
            (MovementType::In, 5),
            (MovementType::Out, 3),
            (MovementType::Out, 20),
            (MovementType::In, 1),
            (MovementType::Out, 10),
        ];
        for (kind, qty) in moves {
            let _ = h.engine.apply_movement(item.id, kind, qty, None).await;
        }

        let history = h.store.history(item.id).await.unwrap();
        let net: i64 = history.iter().map(|t| t.delta()).sum();
        let after = h.store.get(item.id).await.unwrap();
        assert_eq!(after.stock_level, 7 + net);
        assert_eq!(after.stock_level, 0);
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn moved_items_cannot_be_deleted() {
        let h = setup(awaited());
        let moved = h
            .catalog
            .create_item(NewItem::new("Hinge").with_stock_level(1))
            .await
            .unwrap();
        let idle = h
            .catalog
            .create_item(NewItem::new("Latch").with_stock_level(1))
            .await
            .unwrap();
        h.engine.stock_in(moved.id, 2).await.unwrap();

        assert!(matches!(
            h.catalog.delete_item(moved.id).await,
            Err(CatalogError::ItemReferenced(_))
        ));
        h.catalog.delete_item(idle.id).await.unwrap();

        assert_eq!(h.catalog.transactions().await.unwrap().len(), 1);
        assert!(h.engine.stock_in(idle.id, 1).await.is_err());
    }

    #[tokio::test]
    async fn admin_edit_racing_a_movement_is_rejected_not_lost() {
        let h = setup(awaited());
        let item = h
            .catalog
            .create_item(NewItem::new("Hinge").with_stock_level(5).with_reorder_point(1))
            .await
            .unwrap();

        // Edit computed from the revision read before the movement.
        let stale = stockwatch_inventory::ItemPatch {
            stock_level: Some(100),
            ..Default::default()
        }
        .apply(&item, chrono::Utc::now())
        .unwrap();

        h.engine.stock_out(item.id, 2).await.unwrap();

        let result = h
            .store
            .replace(stale, stockwatch_core::ExpectedVersion::Exact(item.version))
            .await;
        assert!(result.is_err_and(|e| e.is_conflict()));
        assert_eq!(h.store.get(item.id).await.unwrap().stock_level, 3);
    }

    #[tokio::test]
    async fn detached_reorder_alert_arrives() {
        let h = setup(EngineConfig::default());
        let item = h
            .catalog
            .create_item(NewItem::new("Fuse").with_stock_level(2).with_reorder_point(1))
            .await
            .unwrap();

        h.engine.stock_out(item.id, 1).await.unwrap();

        assert!(h.alerts.wait_for(1, Duration::from_secs(1)).await);
    }
}

#[cfg(test)]
mod properties {
    use std::sync::Arc;

    use proptest::prelude::*;
    use stockwatch_inventory::{MovementType, NewItem};

    use crate::alerts::{AlertDispatcher, NullAlertSink};
    use crate::catalog::ItemCatalog;
    use crate::config::EngineConfig;
    use crate::engine::{MovementError, StockTransactionEngine};
    use crate::store::{InMemoryInventoryStore, ItemStore, TransactionLog};

    fn movement_strategy() -> impl Strategy<Value = (MovementType, i64)> {
        (
            prop_oneof![Just(MovementType::In), Just(MovementType::Out)],
            1i64..20,
        )
    }

    struct Outcome {
        initial: i64,
        stock: i64,
        net: i64,
        logged: usize,
        committed: usize,
    }

    /// Race every movement against the others on one item.
    fn run_interleaved(initial: i64, moves: Vec<(MovementType, i64)>) -> Outcome {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let store = Arc::new(InMemoryInventoryStore::new());
            let catalog = ItemCatalog::new(store.clone());
            let engine = StockTransactionEngine::new(
                store.clone(),
                AlertDispatcher::with_default_timeout(Arc::new(NullAlertSink)),
                EngineConfig::default()
                    .with_detach_alerts(false)
                    .with_max_conflict_retries(10_000),
            );
            let item = catalog
                .create_item(NewItem::new("Washer").with_stock_level(initial))
                .await
                .unwrap();

            let tasks: Vec<_> = moves
                .into_iter()
                .map(|(kind, qty)| {
                    let engine = engine.clone();
                    tokio::spawn(
                        async move { engine.apply_movement(item.id, kind, qty, None).await },
                    )
                })
                .collect();

            let mut committed = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => committed += 1,
                    Err(MovementError::InsufficientStock { .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }

            let history = store.history(item.id).await.unwrap();
            Outcome {
                initial,
                stock: store.get(item.id).await.unwrap().stock_level,
                net: history.iter().map(|t| t.delta()).sum(),
                logged: history.len(),
                committed,
            }
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn stock_always_equals_initial_plus_logged_deltas(
            initial in 0i64..50,
            moves in prop::collection::vec(movement_strategy(), 1..24),
        ) {
            let outcome = run_interleaved(initial, moves);

            prop_assert_eq!(outcome.stock, outcome.initial + outcome.net);
            prop_assert!(outcome.stock >= 0);
            prop_assert_eq!(outcome.logged, outcome.committed);
        }
    }
}

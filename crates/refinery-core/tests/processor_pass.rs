//! Pass behavior over real stores: claim discipline per target, adapter
//! call plumbing, race loss between concurrent processors, and persistence
//! through the sqlite backend.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;

use common::{seed_mr, ScriptedAdapter, SubmitCall};
use refinery_core::ticket::{NewTicket, TicketStore};
use refinery_core::{
    MemoryTicketStore, MergeQueueProcessor, RawStatus, SourceControlAdapter, SqliteTicketStore,
    TicketId,
};

fn processor_over(
    store: Arc<dyn TicketStore>,
    adapter: &Arc<ScriptedAdapter>,
) -> MergeQueueProcessor {
    let adapter_dyn: Arc<dyn SourceControlAdapter> = adapter.clone();
    MergeQueueProcessor::new(store, adapter_dyn)
}

#[tokio::test]
async fn one_claim_per_target_per_pass() {
    let store = Arc::new(MemoryTicketStore::new());
    let adapter = ScriptedAdapter::new();
    seed_mr(store.as_ref(), "mr-a0", "integration/auth", "nux", 0).await;
    seed_mr(store.as_ref(), "mr-a1", "integration/auth", "dag", 1).await;
    seed_mr(store.as_ref(), "mr-b0", "main", "capable", 2).await;

    let store_dyn: Arc<dyn TicketStore> = store.clone();
    let processor = processor_over(store_dyn, &adapter);

    let pass = processor.run_pass().await.unwrap();
    assert_eq!(pass.targets, 2);
    assert_eq!(pass.claimed, 2);
    assert_eq!(pass.merged, 2);
    assert_eq!(pass.skipped, 0);

    let mut calls = adapter.submit_calls();
    calls.sort_by(|a, b| a.branch.cmp(&b.branch));
    assert_eq!(
        calls,
        vec![
            SubmitCall {
                worker: "nux".into(),
                branch: "work/mr-a0".into(),
                target: "integration/auth".into(),
            },
            SubmitCall {
                worker: "capable".into(),
                branch: "work/mr-b0".into(),
                target: "main".into(),
            },
        ]
    );

    // The runner-up on the busy target is untouched and merges next pass.
    let runner_up = store.get(&TicketId::from("mr-a1")).await.unwrap();
    assert_eq!(runner_up.status, RawStatus::Open);

    let pass = processor.run_pass().await.unwrap();
    assert_eq!(pass.targets, 1);
    assert_eq!(pass.merged, 1);
    assert_eq!(adapter.submit_calls().len(), 3);
}

#[tokio::test]
async fn concurrent_passes_merge_exactly_once() {
    let store = Arc::new(MemoryTicketStore::new());
    let adapter = ScriptedAdapter::new();
    seed_mr(store.as_ref(), "mr-solo", "main", "nux", 1).await;

    let first: Arc<dyn TicketStore> = store.clone();
    let second: Arc<dyn TicketStore> = store.clone();
    let p1 = processor_over(first, &adapter);
    let p2 = processor_over(second, &adapter);

    let (s1, s2) = tokio::join!(p1.run_pass(), p2.run_pass());
    let (s1, s2) = (s1.unwrap(), s2.unwrap());

    assert_eq!(s1.merged + s2.merged, 1);
    assert_eq!(adapter.submit_calls().len(), 1);

    let ticket = store.get(&TicketId::from("mr-solo")).await.unwrap();
    assert_eq!(ticket.status, RawStatus::Closed);
    assert_eq!(ticket.close_outcome.as_deref(), Some("merged"));
}

#[tokio::test]
async fn sync_failure_is_recorded_and_the_worker_released() {
    let store = Arc::new(MemoryTicketStore::new());
    let adapter = ScriptedAdapter::new();
    seed_mr(store.as_ref(), "mr-5", "main", "nux", 2).await;
    adapter.fail_sync("fetch timed out");

    let store_dyn: Arc<dyn TicketStore> = store.clone();
    let pass = processor_over(store_dyn, &adapter).run_pass().await.unwrap();
    assert_eq!(pass.failed, 1);

    let ticket = store.get(&TicketId::from("mr-5")).await.unwrap();
    assert_eq!(ticket.status, RawStatus::Open);
    let error = ticket.error.unwrap();
    assert!(error.contains("sync failed for worker nux"));
    assert!(error.contains("fetch timed out"));

    // The attempt never reached submit, and the checkout was released
    // despite the failure.
    assert!(adapter.submit_calls().is_empty());
    assert_eq!(adapter.deactivate_calls(), vec!["nux".to_string()]);
}

#[tokio::test]
async fn sqlite_backed_pass_survives_a_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tickets.db");

    let store = Arc::new(SqliteTicketStore::connect(&db_path).await.unwrap());
    seed_mr(store.as_ref(), "mr-db1", "main", "nux", 1).await;
    store
        .create(
            NewTicket::merge_request("held work", "work/mr-db2", "main", "dag")
                .with_id("mr-db2")
                .with_priority(0)
                .blocked_by("gt-far-away"),
        )
        .await
        .unwrap();

    let adapter = ScriptedAdapter::new();
    let store_dyn: Arc<dyn TicketStore> = store.clone();
    let pass = processor_over(store_dyn, &adapter).run_pass().await.unwrap();
    assert_eq!(pass.merged, 1);
    assert_eq!(adapter.submit_calls()[0].branch, "work/mr-db1");

    drop(store);
    let reopened = SqliteTicketStore::connect(&db_path).await.unwrap();
    let merged = reopened.get(&TicketId::from("mr-db1")).await.unwrap();
    assert_eq!(merged.status, RawStatus::Closed);
    assert_eq!(merged.close_outcome.as_deref(), Some("merged"));

    let held = reopened.get(&TicketId::from("mr-db2")).await.unwrap();
    assert_eq!(held.status, RawStatus::Open);
    let blockers = reopened.blockers(&held.id).await.unwrap();
    assert_eq!(blockers.len(), 1);
    assert!(blockers[0].is_blocking());
}

//! Failure handling: bad samples, graceful stop, hard cancellation

use std::sync::Arc;
use std::time::Duration;

use fleetwatch::alert::AlertLevel;

use crate::helpers::*;

#[tokio::test]
async fn test_sampling_failures_alert_but_never_kill_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let (_hub, tree, registry) = test_stack(dir.path());

    let probe = Arc::new(StubProbe::new("stub:flaky"));
    let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();
    let leaf = tree.add_leaf(tree.root(), "flaky", Arc::clone(&worker)).unwrap();

    probe.fail_with("connection reset");
    let event = worker.sample_now().await.unwrap();
    assert_eq!(event.error.as_deref(), Some("connection reset"));
    assert_eq!(tree.alert_level(leaf), Some(AlertLevel::Unknown));

    probe.recover();
    let event = worker.sample_now().await.unwrap();
    assert!(event.error.is_none());
    assert_eq!(tree.alert_level(leaf), Some(AlertLevel::None));
}

#[tokio::test]
async fn test_graceful_stop_keeps_the_final_sample() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (_hub, _tree, registry) = test_stack(dir.path());
        let probe = Arc::new(StubProbe::new("stub:retiring"));
        let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();

        probe.set_value(7);
        worker.sample_now().await.unwrap();
        worker.stop().await;
        worker.stop().await; // idempotent

        tokio::task::yield_now().await;
        assert!(worker.sample_now().await.is_err());
    }

    // the sample taken before the stop survived to disk
    let (_hub, _tree, registry) = test_stack(dir.path());
    let worker = registry
        .acquire(Arc::new(StubProbe::new("stub:retiring")))
        .await
        .unwrap();
    let history = worker.snapshot().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].metrics.as_ref().unwrap()["value"], 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_during_a_sample_still_records_it() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (_hub, _tree, registry) = test_stack(dir.path());
        let probe = Arc::new(StubProbe::new("stub:landing"));
        probe.set_value(7);
        probe.set_sample_delay(Duration::from_millis(200));
        let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();

        let pending = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.sample_now().await }
        });

        // stop arrives while the sample is still outstanding; the cycle
        // must finish and be recorded before the worker exits
        while probe.sample_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        worker.stop().await;

        let event = pending.await.unwrap().unwrap();
        assert_eq!(event.metrics.as_ref().unwrap()["value"], 7);

        while worker.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(worker.sample_now().await.is_err(), "worker must be stopped");
    }

    let (_hub, _tree, registry) = test_stack(dir.path());
    let worker = registry
        .acquire(Arc::new(StubProbe::new("stub:landing")))
        .await
        .unwrap();
    let history = worker.snapshot().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].metrics.as_ref().unwrap()["value"], 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropping_the_last_handle_discards_the_inflight_sample() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (_hub, _tree, registry) = test_stack(dir.path());
        let probe = Arc::new(StubProbe::new("stub:doomed"));
        probe.set_sample_delay(Duration::from_secs(30));
        let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();

        let pending = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.sample_now().await }
        });

        // let the sample start, then drop every handle; aborting the caller
        // releases the last reference and tears the worker down mid-sample
        while probe.sample_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(worker);
        pending.abort();
        let _ = pending.await;

        assert_eq!(registry.active_workers(), 0);
    }

    // nothing was recorded for the aborted cycle
    let (_hub, _tree, registry) = test_stack(dir.path());
    let worker = registry
        .acquire(Arc::new(StubProbe::new("stub:doomed")))
        .await
        .unwrap();
    assert!(worker.snapshot().await.unwrap().is_empty());
}

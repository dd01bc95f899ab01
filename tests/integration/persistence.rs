//! Durable history across restarts and around corruption

use std::sync::Arc;

use fleetwatch::alert::AlertLevel;
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_history_and_alert_state_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (_hub, _tree, registry) = test_stack(dir.path());
        let probe = Arc::new(StubProbe::new("stub:durable"));
        let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();

        probe.set_value(10);
        worker.sample_now().await.unwrap();
        probe.set_value(5000); // critical
        worker.sample_now().await.unwrap();
        worker.stop().await;
    }

    let (_hub, _tree, registry) = test_stack(dir.path());
    let worker = registry
        .acquire(Arc::new(StubProbe::new("stub:durable")))
        .await
        .unwrap();

    // seeded from the newest persisted record before any new sample
    assert_eq!(worker.alert_state().level, AlertLevel::Critical);

    let history = worker.snapshot().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].level, AlertLevel::None);
    assert_eq!(history[0].metrics.as_ref().unwrap()["value"], 10);
    assert_eq!(history[1].level, AlertLevel::Critical);
    assert_eq!(history[1].metrics.as_ref().unwrap()["value"], 5000);
}

#[tokio::test]
async fn test_reload_keeps_only_the_newest_capacity_records() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (_hub, _tree, registry) = test_stack_with_capacity(dir.path(), 3);
        let probe = Arc::new(StubProbe::new("stub:bounded"));
        let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();

        for value in 1..=5u64 {
            probe.set_value(value);
            worker.sample_now().await.unwrap();
        }
    }

    let (_hub, _tree, registry) = test_stack_with_capacity(dir.path(), 3);
    let worker = registry
        .acquire(Arc::new(StubProbe::new("stub:bounded")))
        .await
        .unwrap();

    let history = worker.snapshot().await.unwrap();
    let values: Vec<u64> = history
        .iter()
        .map(|event| event.metrics.as_ref().unwrap()["value"].as_u64().unwrap())
        .collect();
    assert_eq!(values, vec![3, 4, 5]);
}

#[tokio::test]
async fn test_truncated_tail_loses_only_the_torn_record() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (_hub, _tree, registry) = test_stack(dir.path());
        let probe = Arc::new(StubProbe::new("stub:torn"));
        let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();
        probe.set_value(42);
        worker.sample_now().await.unwrap();
        worker.sample_now().await.unwrap();
    }

    // simulate a torn final write: a length prefix promising more bytes
    // than the file holds
    let log_path = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .find(|path| path.extension().is_some_and(|ext| ext == "hist"))
        .expect("history log file exists");
    let mut bytes = std::fs::read(&log_path).unwrap();
    bytes.extend_from_slice(&64u32.to_le_bytes());
    bytes.extend_from_slice(&[0xde, 0xad]);
    std::fs::write(&log_path, &bytes).unwrap();

    let (_hub, _tree, registry) = test_stack(dir.path());
    let worker = registry
        .acquire(Arc::new(StubProbe::new("stub:torn")))
        .await
        .unwrap();

    let history = worker.snapshot().await.unwrap();
    assert_eq!(history.len(), 2, "intact records must survive the torn tail");

    // and the log keeps accepting appends afterwards
    worker.sample_now().await.unwrap();
    assert_eq!(worker.snapshot().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_error_records_round_trip_through_the_log() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (_hub, _tree, registry) = test_stack(dir.path());
        let probe = Arc::new(StubProbe::new("stub:err"));
        let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();
        probe.fail_with("dns lookup failed");
        worker.sample_now().await.unwrap();
    }

    let (_hub, _tree, registry) = test_stack(dir.path());
    let worker = registry
        .acquire(Arc::new(StubProbe::new("stub:err")))
        .await
        .unwrap();

    let history = worker.snapshot().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].error.as_deref(), Some("dns lookup failed"));
    assert_eq!(history[0].level, AlertLevel::Unknown);
    assert!(history[0].metrics.is_none());
}

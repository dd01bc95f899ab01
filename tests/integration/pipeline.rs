//! End-to-end flow: sample → classify → history → tree → observers

use std::sync::Arc;

use assert_matches::assert_matches;
use fleetwatch::alert::AlertLevel;
use fleetwatch::hub::MonitorEvent;

use crate::helpers::*;

#[tokio::test]
async fn test_sample_flows_through_tree_to_observers() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (hub, tree, registry) = test_stack(dir.path());

    let root = tree.root();
    let group = tree.add_group(root, "databases").unwrap();

    let probe = Arc::new(StubProbe::new("stub:pg-1"));
    let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();
    let leaf = tree.add_leaf(group, "pg-1", Arc::clone(&worker)).unwrap();

    let mut rx = hub.subscribe();

    probe.set_value(500); // over the high threshold of 100
    let event = worker.sample_now().await.unwrap();
    assert_eq!(event.level, AlertLevel::High);
    assert_eq!(event.metrics.as_ref().unwrap()["value"], 500);

    // every ancestor escalated
    for node in [leaf, group, root] {
        assert_eq!(tree.alert_level(node), Some(AlertLevel::High));
    }
    assert_eq!(
        tree.alert_state(root).unwrap().message,
        "value 500 too high"
    );

    // observers saw the sample first, then the alert walk leaf → root
    let events = drain_events(&mut rx);
    assert_matches!(events[0], MonitorEvent::SampleRecorded { .. });
    let changed: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            MonitorEvent::AlertChanged { node, .. } => Some(*node),
            _ => None,
        })
        .collect();
    assert_eq!(changed, vec![leaf, group, root]);
}

#[tokio::test]
async fn test_recovery_de_escalates_the_whole_branch() {
    let dir = tempfile::tempdir().unwrap();
    let (hub, tree, registry) = test_stack(dir.path());

    let probe = Arc::new(StubProbe::new("stub:api"));
    let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();
    let leaf = tree.add_leaf(tree.root(), "api", Arc::clone(&worker)).unwrap();

    probe.set_value(200);
    worker.sample_now().await.unwrap();
    assert_eq!(tree.alert_level(leaf), Some(AlertLevel::High));

    let mut rx = hub.subscribe();
    probe.set_value(10);
    worker.sample_now().await.unwrap();

    assert_eq!(tree.alert_level(leaf), Some(AlertLevel::None));
    assert_eq!(tree.alert_level(tree.root()), Some(AlertLevel::None));

    let recovery = drain_events(&mut rx)
        .into_iter()
        .find_map(|event| match event {
            MonitorEvent::AlertChanged { previous, current, .. } => Some((previous, current)),
            _ => None,
        })
        .unwrap();
    assert_eq!(recovery.0.level, AlertLevel::High);
    assert_eq!(recovery.1.level, AlertLevel::None);
}

#[tokio::test]
async fn test_unchanged_alert_publishes_no_alert_events() {
    let dir = tempfile::tempdir().unwrap();
    let (hub, tree, registry) = test_stack(dir.path());

    let probe = Arc::new(StubProbe::new("stub:quiet"));
    let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();
    tree.add_leaf(tree.root(), "quiet", Arc::clone(&worker)).unwrap();

    let mut rx = hub.subscribe();
    worker.sample_now().await.unwrap();
    worker.sample_now().await.unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|event| matches!(event, MonitorEvent::SampleRecorded { .. })));
}

#[tokio::test]
async fn test_threshold_edits_apply_to_the_running_worker() {
    let dir = tempfile::tempdir().unwrap();
    let (_hub, tree, registry) = test_stack(dir.path());

    let probe = Arc::new(StubProbe::new("stub:tunable"));
    let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();
    let leaf = tree.add_leaf(tree.root(), "tunable", Arc::clone(&worker)).unwrap();

    probe.set_value(150);
    worker.sample_now().await.unwrap();
    assert_eq!(tree.alert_level(leaf), Some(AlertLevel::High));

    // raise the threshold above the measured value; same worker, next cycle
    probe.set_high_threshold(200);
    worker.sample_now().await.unwrap();
    assert_eq!(tree.alert_level(leaf), Some(AlertLevel::None));
}

#[tokio::test]
async fn test_samples_only_subscription_sees_raw_measurements() {
    let dir = tempfile::tempdir().unwrap();
    let (hub, tree, registry) = test_stack(dir.path());

    let probe = Arc::new(StubProbe::new("stub:chart"));
    let worker = registry.acquire(Arc::clone(&probe)).await.unwrap();
    tree.add_leaf(tree.root(), "chart", Arc::clone(&worker)).unwrap();

    let mut rx = hub.subscribe_samples();
    probe.set_value(9999); // triggers alert changes too
    worker.sample_now().await.unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        MonitorEvent::SampleRecorded { sample } => {
            assert_eq!(sample.kind, "stub");
            assert_eq!(sample.level, AlertLevel::Critical);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

mod common;

use common::{heartbeat, node_info, position, telemetry, text};
use meshfold::ports::StateStore;
use meshfold::{
    DraftEvent, EventBody, EventLog, MemoryStateStore, Projector, apply,
};
use serde_json::json;
use tempfile::tempdir;

fn committed(log: &mut EventLog, draft: DraftEvent) -> meshfold::Event {
    log.append(draft).unwrap()
}

#[test]
fn test_first_event_creates_state() {
    let dir = tempdir().unwrap();
    let mut log = EventLog::open(dir.path()).unwrap();
    let event = committed(&mut log, heartbeat("node-7", 1000));

    let state = apply(None, &event);

    assert_eq!(state.node_id, "node-7");
    assert_eq!(state.first_seen_at, 1000);
    assert_eq!(state.last_seen_at, 1000);
    assert_eq!(state.last_seen_sequence, 1);
    assert_eq!(state.seen_event_count, 1);
    assert!(state.position.is_none());
    assert!(state.metrics.is_empty());
}

#[test]
fn test_telemetry_merges_metrics_independently() {
    let dir = tempdir().unwrap();
    let mut log = EventLog::open(dir.path()).unwrap();

    let first = committed(
        &mut log,
        telemetry("node-1", 1000, &[("battery_level", 90.0), ("voltage", 4.1)]),
    );
    let second = committed(
        &mut log,
        telemetry("node-1", 1001, &[("battery_level", 85.0)]),
    );

    let state = apply(None, &first);
    let state = apply(Some(&state), &second);

    assert_eq!(state.metrics["battery_level"].value, 85.0);
    assert_eq!(state.metrics["battery_level"].sequence, 2);
    // voltage was not in the second event: still at its first value.
    assert_eq!(state.metrics["voltage"].value, 4.1);
    assert_eq!(state.metrics["voltage"].sequence, 1);
    assert_eq!(state.battery_level, Some(85.0));
}

#[test]
fn test_stale_telemetry_does_not_regress() {
    let dir = tempdir().unwrap();
    let mut log = EventLog::open(dir.path()).unwrap();

    let older = committed(&mut log, telemetry("node-3", 900, &[("battery_level", 95.0)]));
    let newer = committed(&mut log, telemetry("node-3", 901, &[("battery_level", 60.0)]));

    // Apply out of order, without the caller's sequence guard.
    let state = apply(None, &newer);
    let state = apply(Some(&state), &older);

    assert_eq!(
        state.metrics["battery_level"].value, 60.0,
        "older event must not overwrite a newer metric"
    );
    assert_eq!(state.battery_level, Some(60.0));
}

#[test]
fn test_stale_position_does_not_regress() {
    let dir = tempdir().unwrap();
    let mut log = EventLog::open(dir.path()).unwrap();

    let older = committed(&mut log, position("node-2", 900, 10.0, 20.0));
    let newer = committed(&mut log, position("node-2", 901, 11.0, 21.0));

    let state = apply(None, &newer);
    let state = apply(Some(&state), &older);

    let fix = state.position.expect("position should be set");
    assert_eq!((fix.latitude, fix.longitude), (11.0, 21.0));
    assert_eq!(fix.sequence, 2);
}

#[test]
fn test_text_message_updates_last_message() {
    let dir = tempdir().unwrap();
    let mut log = EventLog::open(dir.path()).unwrap();

    let first = committed(&mut log, text("node-9", 1000, "first"));
    let second = committed(&mut log, text("node-9", 1001, "second"));

    let state = apply(None, &first);
    assert_eq!(state.last_message.as_deref(), Some("first"));
    let state = apply(Some(&state), &second);
    assert_eq!(state.last_message.as_deref(), Some("second"));
}

#[test]
fn test_node_info_updates_identity() {
    let dir = tempdir().unwrap();
    let mut log = EventLog::open(dir.path()).unwrap();

    let event = committed(&mut log, node_info("node-5", 1000, "Ridge Repeater"));
    let state = apply(None, &event);

    let info = state.node_info.expect("identity should be set");
    assert_eq!(info.long_name.as_deref(), Some("Ridge Repeater"));
    assert_eq!(info.hardware.as_deref(), Some("TEST_V1"));
}

#[test]
fn test_unknown_kind_is_presence_only() {
    let unknown = meshfold::Event {
        sequence: 4,
        occurred_at: 1234,
        node_id: "node-x".to_string(),
        body: EventBody::Unknown(json!({"future_kind": {"zing": 1}})),
        provenance: None,
    };

    let state = apply(None, &unknown);

    assert_eq!(state.last_seen_sequence, 4);
    assert_eq!(state.seen_event_count, 1);
    assert!(state.position.is_none());
    assert!(state.metrics.is_empty());
    assert!(state.last_message.is_none());
}

#[test]
fn test_apply_is_deterministic() {
    let dir = tempdir().unwrap();
    let mut log = EventLog::open(dir.path()).unwrap();

    let events = vec![
        committed(&mut log, heartbeat("node-1", 1000)),
        committed(&mut log, telemetry("node-1", 1001, &[("battery_level", 81.0)])),
        committed(&mut log, position("node-1", 1002, 1.0, 2.0)),
    ];

    let fold = |events: &[meshfold::Event]| {
        let mut state = None;
        for event in events {
            state = Some(apply(state.as_ref(), event));
        }
        state.unwrap()
    };

    assert_eq!(fold(&events), fold(&events));
}

#[test]
fn test_projector_skips_already_applied_sequences() {
    let dir = tempdir().unwrap();
    let mut log = EventLog::open(dir.path()).unwrap();
    let event = committed(&mut log, heartbeat("node-7", 1000));

    let mut projector = Projector::new(MemoryStateStore::new());
    assert!(projector.apply_committed(&event).unwrap());
    assert!(
        !projector.apply_committed(&event).unwrap(),
        "second application of the same sequence must be rejected"
    );

    let state = projector.store().get("node-7").unwrap();
    assert_eq!(state.seen_event_count, 1);
}

#[test]
fn test_rebuild_equals_incremental() {
    let dir = tempdir().unwrap();
    let mut log = EventLog::open(dir.path()).unwrap();

    let mut incremental = Projector::new(MemoryStateStore::new());
    let drafts = vec![
        heartbeat("node-1", 1000),
        telemetry("node-2", 1001, &[("battery_level", 70.0)]),
        position("node-1", 1002, 5.0, 6.0),
        text("node-2", 1003, "hi"),
        telemetry("node-1", 1004, &[("voltage", 3.9)]),
        node_info("node-2", 1005, "Summit"),
    ];
    for draft in drafts {
        let event = log.append(draft).unwrap();
        incremental.apply_committed(&event).unwrap();
    }

    let mut rebuilt = Projector::new(MemoryStateStore::new());
    rebuilt.rebuild(&log).unwrap();

    assert_eq!(incremental.store().all(), rebuilt.store().all());
    assert_eq!(incremental.last_applied(), rebuilt.last_applied());
}

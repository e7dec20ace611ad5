mod common;

use common::replay_all;
use meshfold::ports::StateStore;
use meshfold::{DraftEvent, EventLog, MemoryStateStore, NodeInfo, Projector, apply};
use proptest::prelude::*;
use tempfile::tempdir;

fn arb_node() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("node-alpha".to_string()),
        Just("node-bravo".to_string()),
        Just("node-charlie".to_string()),
    ]
}

fn arb_draft() -> impl Strategy<Value = DraftEvent> {
    (arb_node(), 0..5u8, any::<u64>()).prop_map(|(node, kind, seed)| {
        let draft = match kind {
            0 => DraftEvent::heartbeat(&node),
            1 => DraftEvent::telemetry(
                &node,
                &[
                    ("battery_level", (seed % 101) as f64),
                    ("voltage", 3.0 + (seed % 15) as f64 / 10.0),
                ],
            ),
            2 => DraftEvent::position(
                &node,
                (seed % 180) as f64 - 90.0,
                (seed % 360) as f64 - 180.0,
            ),
            3 => DraftEvent::text(&node, &format!("msg {}", seed % 1000), 0),
            _ => DraftEvent::node_info(
                &node,
                NodeInfo {
                    long_name: Some(format!("Node {}", seed % 10)),
                    short_name: None,
                    hardware: Some("PROP_V1".to_string()),
                },
            ),
        };
        draft.at(1_000_000 + seed % 10_000)
    })
}

fn arb_drafts() -> impl Strategy<Value = Vec<DraftEvent>> {
    proptest::collection::vec(arb_draft(), 0..60)
}

// Whatever was appended comes back: same count, gapless sequences from 1.
proptest! {
    #[test]
    fn prop_replay_is_complete_and_gapless(drafts in arb_drafts()) {
        let dir = tempdir().unwrap();
        let mut log = EventLog::open(dir.path()).unwrap();

        let appended: Vec<_> = drafts
            .into_iter()
            .map(|d| log.append(d).unwrap())
            .collect();

        let replayed = replay_all(&log);
        prop_assert_eq!(replayed.len(), appended.len());
        for (i, (a, b)) in appended.iter().zip(&replayed).enumerate() {
            prop_assert_eq!(a, b);
            prop_assert_eq!(b.sequence, i as u64 + 1);
        }
    }
}

// A full rebuild from the log always lands on the same store contents as
// applying each event at commit time.
proptest! {
    #[test]
    fn prop_rebuild_equals_incremental(drafts in arb_drafts()) {
        let dir = tempdir().unwrap();
        let mut log = EventLog::open(dir.path()).unwrap();

        let mut incremental = Projector::new(MemoryStateStore::new());
        for draft in drafts {
            let event = log.append(draft).unwrap();
            incremental.apply_committed(&event).unwrap();
        }

        let mut rebuilt = Projector::new(MemoryStateStore::new());
        rebuilt.rebuild(&log).unwrap();

        prop_assert_eq!(incremental.store().all(), rebuilt.store().all());
        prop_assert_eq!(incremental.last_applied(), rebuilt.last_applied());
    }
}

// Re-folding any committed event into the final state, in any order, never
// moves position or metrics backwards: the per-field sequence guards hold.
proptest! {
    #[test]
    fn prop_stale_reapplication_never_regresses(
        drafts in arb_drafts(),
        stale_picks in proptest::collection::vec(any::<prop::sample::Index>(), 1..10)
    ) {
        let dir = tempdir().unwrap();
        let mut log = EventLog::open(dir.path()).unwrap();
        let events: Vec<_> = drafts
            .into_iter()
            .map(|d| log.append(d).unwrap())
            .collect();
        prop_assume!(!events.is_empty());

        let mut projector = Projector::new(MemoryStateStore::new());
        for event in &events {
            projector.apply_committed(event).unwrap();
        }

        for pick in stale_picks {
            let stale = pick.get(&events);
            let before = projector.store().get(&stale.node_id).unwrap();
            let after = apply(Some(&before), stale);

            if let (Some(was), Some(now)) = (&before.position, &after.position) {
                prop_assert!(now.sequence >= was.sequence);
            }
            for (name, sample) in &before.metrics {
                prop_assert!(after.metrics[name].sequence >= sample.sequence);
                if after.metrics[name].sequence == sample.sequence {
                    prop_assert_eq!(after.metrics[name].value, sample.value);
                }
            }
            prop_assert!(after.last_seen_sequence >= before.last_seen_sequence);
        }
    }
}

// Projector-level idempotency: applying the whole history twice leaves the
// store exactly where one pass left it.
proptest! {
    #[test]
    fn prop_double_application_is_a_noop(drafts in arb_drafts()) {
        let dir = tempdir().unwrap();
        let mut log = EventLog::open(dir.path()).unwrap();
        let events: Vec<_> = drafts
            .into_iter()
            .map(|d| log.append(d).unwrap())
            .collect();

        let mut projector = Projector::new(MemoryStateStore::new());
        for event in &events {
            projector.apply_committed(event).unwrap();
        }
        let once = projector.store().all();

        for event in &events {
            prop_assert!(!projector.apply_committed(event).unwrap());
        }
        prop_assert_eq!(projector.store().all(), once);
    }
}

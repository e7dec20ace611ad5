use crate::error::StorageError;
use crate::event::{Event, EventBody};
use crate::log::line_hash;
use crate::ports::{EventStore, StateStore};
use crate::state::{MetricSample, NodeIdentity, NodeState, PositionFix};
use crate::store::{self, StateSnapshot};
use ::log::{debug, info, warn};
use std::io;
use std::path::PathBuf;

/// Fold one committed event into a node's state.
///
/// Pure and total: no I/O, no errors, deterministic for a given
/// `(prior, event)` pair. Unrecognized event kinds are a presence-only
/// update, not a failure — a log written by a newer schema still replays.
///
/// The fold has no memory of what it already applied; rejecting duplicate
/// events is the caller's job (see [`Projector`]), using
/// `last_seen_sequence`. Position and per-metric telemetry carry their own
/// sequence guards, so even an unguarded re-application of an *older* event
/// cannot regress those fields.
pub fn apply(prior: Option<&NodeState>, event: &Event) -> NodeState {
    let mut state = match prior {
        Some(existing) => existing.clone(),
        None => {
            let mut fresh = NodeState::empty(&event.node_id);
            fresh.first_seen_at = event.occurred_at;
            fresh
        }
    };

    state.seen_event_count += 1;
    if event.sequence > state.last_seen_sequence {
        state.last_seen_sequence = event.sequence;
        state.last_seen_at = event.occurred_at;
    }

    match &event.body {
        EventBody::NodeHeartbeat(_) => {}
        EventBody::TextMessage(message) => {
            state.last_message = Some(message.text.clone());
        }
        EventBody::Position(position) => {
            let newer = state
                .position
                .as_ref()
                .is_none_or(|fix| event.sequence > fix.sequence);
            if newer {
                state.position = Some(PositionFix {
                    latitude: position.latitude,
                    longitude: position.longitude,
                    altitude: position.altitude,
                    sequence: event.sequence,
                });
            }
        }
        EventBody::Telemetry(telemetry) => {
            for (name, value) in &telemetry.metrics {
                let newer = state
                    .metrics
                    .get(name)
                    .is_none_or(|sample| event.sequence > sample.sequence);
                if newer {
                    state.metrics.insert(
                        name.clone(),
                        MetricSample {
                            value: *value,
                            sequence: event.sequence,
                        },
                    );
                }
            }
            state.battery_level = state.metrics.get("battery_level").map(|s| s.value);
        }
        EventBody::NodeInfo(info) => {
            state.node_info = Some(NodeIdentity {
                long_name: info.long_name.clone(),
                short_name: info.short_name.clone(),
                hardware: info.hardware.clone(),
            });
        }
        EventBody::Unknown(_) => {}
    }

    state
}

/// Applies committed events to a [`StateStore`], with the idempotency guard
/// and checkpointed persistence the pure fold deliberately lacks.
///
/// The checkpoint records the last applied sequence together with an xxh64
/// hash of that event's canonical JSON. On recovery the checkpoint is
/// verified against the log; any disagreement (truncated log, foreign log,
/// stale snapshot) discards the store and rebuilds from sequence 0 — the log
/// is always the authority.
pub struct Projector<S: StateStore> {
    store: S,
    snapshot_path: Option<PathBuf>,
    last_applied: u64,
    last_hash: String,
}

impl<S: StateStore> Projector<S> {
    /// A projector with no persistence; state lives only in the store.
    pub fn new(store: S) -> Self {
        Projector {
            store,
            snapshot_path: None,
            last_applied: 0,
            last_hash: String::new(),
        }
    }

    /// Persist a checkpoint snapshot to `path` after every applied event.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Load the checkpoint snapshot (if any), verify it against the log, and
    /// catch up on events committed since. Falls back to a full rebuild when
    /// the snapshot is missing, corrupt, or disagrees with the log.
    ///
    /// Returns the number of events applied during recovery.
    pub fn recover<L: EventStore>(&mut self, log: &L) -> Result<u64, StorageError> {
        let mut resumed = false;

        if let Some(path) = &self.snapshot_path {
            if let Some(snapshot) = store::load_snapshot(path)? {
                match self.verify_checkpoint(&snapshot, log)? {
                    CheckpointValidity::Valid => {
                        self.store.clear()?;
                        for node in snapshot.nodes {
                            self.store.upsert(node)?;
                        }
                        self.last_applied = snapshot.last_applied_sequence;
                        self.last_hash = snapshot.hash;
                        resumed = true;
                        debug!(
                            "resuming projection from checkpoint at sequence {}",
                            self.last_applied
                        );
                    }
                    CheckpointValidity::BeyondLog => {
                        warn!(
                            "state snapshot checkpoint {} is beyond the log, rebuilding",
                            snapshot.last_applied_sequence
                        );
                    }
                    CheckpointValidity::HashMismatch => {
                        warn!("state snapshot does not match the log, rebuilding");
                    }
                }
            }
        }

        if !resumed {
            return self.rebuild(log);
        }

        let mut applied = 0u64;
        for result in log.replay(self.last_applied + 1)? {
            let event = result?;
            if self.apply_unsaved(&event)? {
                applied += 1;
            }
        }
        if applied > 0 {
            self.persist()?;
        }
        Ok(applied)
    }

    /// Discard the store and reproject every committed event from scratch.
    ///
    /// This is the repair procedure for any crash between a log commit and
    /// the corresponding store write: replaying from 0 reproduces exactly
    /// the state incremental application would have built.
    pub fn rebuild<L: EventStore>(&mut self, log: &L) -> Result<u64, StorageError> {
        info!("rebuilding node state from full event log replay");
        self.store.clear()?;
        self.last_applied = 0;
        self.last_hash = String::new();

        let mut applied = 0u64;
        for result in log.replay(0)? {
            let event = result?;
            if self.apply_unsaved(&event)? {
                applied += 1;
            }
        }
        self.persist()?;
        info!("rebuild complete: {applied} events reprojected");
        Ok(applied)
    }

    /// Fold one committed event into the store.
    ///
    /// Returns `Ok(false)` without touching the store if the event's
    /// sequence has already been applied — the caller-level idempotency
    /// guard required by the pure fold.
    pub fn apply_committed(&mut self, event: &Event) -> Result<bool, StorageError> {
        if !self.apply_unsaved(event)? {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    fn apply_unsaved(&mut self, event: &Event) -> Result<bool, StorageError> {
        if event.sequence <= self.last_applied {
            debug!(
                "skipping already-applied event {} (checkpoint at {})",
                event.sequence, self.last_applied
            );
            return Ok(false);
        }

        let prior = self.store.get(&event.node_id);
        let next = apply(prior.as_ref(), event);
        self.store.upsert(next)?;
        self.last_applied = event.sequence;
        self.last_hash = event_hash(event)?;
        Ok(true)
    }

    /// Write the checkpoint snapshot, if persistence is configured.
    pub fn persist(&self) -> Result<(), StorageError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = StateSnapshot {
            nodes: self.store.all(),
            last_applied_sequence: self.last_applied,
            hash: self.last_hash.clone(),
        };
        store::save_snapshot(path, &snapshot)
    }

    /// Sequence of the last event folded into the store, 0 if none.
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Read access to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the projector, returning the store.
    pub fn into_store(self) -> S {
        self.store
    }

    fn verify_checkpoint<L: EventStore>(
        &self,
        snapshot: &StateSnapshot,
        log: &L,
    ) -> Result<CheckpointValidity, StorageError> {
        if snapshot.last_applied_sequence == 0 {
            return Ok(CheckpointValidity::Valid);
        }
        if snapshot.last_applied_sequence > log.latest_sequence() {
            return Ok(CheckpointValidity::BeyondLog);
        }

        // The event at the checkpoint sequence must hash to what the
        // snapshot recorded, or the snapshot belongs to some other history.
        match log.replay(snapshot.last_applied_sequence)?.next() {
            Some(Ok(event)) if event.sequence == snapshot.last_applied_sequence => {
                if event_hash(&event)? == snapshot.hash {
                    Ok(CheckpointValidity::Valid)
                } else {
                    Ok(CheckpointValidity::HashMismatch)
                }
            }
            Some(Err(e)) => Err(e),
            _ => Ok(CheckpointValidity::HashMismatch),
        }
    }
}

enum CheckpointValidity {
    Valid,
    BeyondLog,
    HashMismatch,
}

fn event_hash(event: &Event) -> Result<String, StorageError> {
    let json = serde_json::to_string(event)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(line_hash(json.as_bytes()))
}

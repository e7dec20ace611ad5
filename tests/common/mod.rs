#![allow(dead_code)]

use meshfold::ports::{EventSource, EventStore, Publisher, ReplayIter, StateStore};
use meshfold::{
    DispatchError, DraftEvent, Event, EventLog, NodeInfo, SourceError, StorageError,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub fn heartbeat(node: &str, at: u64) -> DraftEvent {
    DraftEvent::heartbeat(node).at(at)
}

pub fn telemetry(node: &str, at: u64, metrics: &[(&str, f64)]) -> DraftEvent {
    DraftEvent::telemetry(node, metrics).at(at)
}

pub fn position(node: &str, at: u64, latitude: f64, longitude: f64) -> DraftEvent {
    DraftEvent::position(node, latitude, longitude).at(at)
}

pub fn text(node: &str, at: u64, message: &str) -> DraftEvent {
    DraftEvent::text(node, message, 0).at(at)
}

pub fn node_info(node: &str, at: u64, long_name: &str) -> DraftEvent {
    DraftEvent::node_info(
        node,
        NodeInfo {
            long_name: Some(long_name.to_string()),
            short_name: None,
            hardware: Some("TEST_V1".to_string()),
        },
    )
    .at(at)
}

/// Append `n` heartbeats from rotating nodes.
pub fn append_n(log: &mut EventLog, n: usize) -> Vec<Event> {
    (0..n)
        .map(|i| {
            log.append(heartbeat(&format!("node-{}", i % 3), 1000 + i as u64))
                .unwrap()
        })
        .collect()
}

/// Collect a full replay, panicking on any error.
pub fn replay_all(log: &EventLog) -> Vec<Event> {
    log.replay(0).unwrap().collect::<Result<Vec<_>, _>>().unwrap()
}

/// Sink that records delivered sequences.
pub struct CollectingPublisher {
    name: String,
    delivered: Arc<Mutex<Vec<u64>>>,
}

impl CollectingPublisher {
    pub fn new(name: &str) -> (Self, Arc<Mutex<Vec<u64>>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        (
            CollectingPublisher {
                name: name.to_string(),
                delivered: delivered.clone(),
            },
            delivered,
        )
    }
}

impl Publisher for CollectingPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&mut self, event: &Event) -> Result<(), DispatchError> {
        self.delivered.lock().unwrap().push(event.sequence);
        Ok(())
    }
}

/// Sink that fails a configured number of attempts before succeeding.
/// `u32::MAX` failures means it never succeeds.
pub struct FlakyPublisher {
    name: String,
    failures_left: u32,
    attempts: Arc<AtomicU32>,
    delivered: Arc<Mutex<Vec<u64>>>,
}

impl FlakyPublisher {
    pub fn new(name: &str, failures: u32) -> (Self, Arc<AtomicU32>, Arc<Mutex<Vec<u64>>>) {
        let attempts = Arc::new(AtomicU32::new(0));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        (
            FlakyPublisher {
                name: name.to_string(),
                failures_left: failures,
                attempts: attempts.clone(),
                delivered: delivered.clone(),
            },
            attempts,
            delivered,
        )
    }
}

impl Publisher for FlakyPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&mut self, event: &Event) -> Result<(), DispatchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(DispatchError("broker unavailable".to_string()));
        }
        self.delivered.lock().unwrap().push(event.sequence);
        Ok(())
    }
}

/// Source that plays back a fixed script of results, then ends the stream.
pub struct ScriptedSource {
    steps: VecDeque<Result<Option<DraftEvent>, SourceError>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Result<Option<DraftEvent>, SourceError>>) -> Self {
        ScriptedSource {
            steps: steps.into(),
        }
    }

    /// A script that just yields these drafts in order.
    pub fn of(drafts: Vec<DraftEvent>) -> Self {
        ScriptedSource::new(drafts.into_iter().map(|d| Ok(Some(d))).collect())
    }
}

impl EventSource for ScriptedSource {
    fn next(&mut self) -> Result<Option<DraftEvent>, SourceError> {
        self.steps.pop_front().unwrap_or(Ok(None))
    }
}

/// Event store wrapper that injects append failures on demand.
pub struct FlakyStore<L: EventStore> {
    inner: L,
    fail_next: Arc<AtomicBool>,
    fatal_next: Arc<AtomicBool>,
}

impl<L: EventStore> FlakyStore<L> {
    pub fn new(inner: L) -> (Self, Arc<AtomicBool>, Arc<AtomicBool>) {
        let fail_next = Arc::new(AtomicBool::new(false));
        let fatal_next = Arc::new(AtomicBool::new(false));
        (
            FlakyStore {
                inner,
                fail_next: fail_next.clone(),
                fatal_next: fatal_next.clone(),
            },
            fail_next,
            fatal_next,
        )
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: EventStore> EventStore for FlakyStore<L> {
    fn append(&mut self, draft: DraftEvent) -> Result<Event, StorageError> {
        if self.fatal_next.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Unrecoverable("disk full".to_string()));
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other("injected append failure")));
        }
        self.inner.append(draft)
    }

    fn replay(&self, from: u64) -> Result<ReplayIter<'_>, StorageError> {
        self.inner.replay(from)
    }

    fn latest_sequence(&self) -> u64 {
        self.inner.latest_sequence()
    }
}

//! Decoupled forwarding of committed events to external sinks.
//!
//! Each registered sink gets a bounded queue and a dedicated worker thread.
//! Enqueueing never performs network I/O; delivery runs behind the queue
//! with exponential backoff, and a sink that keeps failing past the retry
//! ceiling surfaces exactly one permanent-failure notice instead of
//! retrying forever or dropping silently.

use crate::error::DispatchError;
use crate::event::Event;
use crate::ports::Publisher;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use ::log::{debug, error, info, warn};
use serde_json::Value;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What `enqueue` does when a sink's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Block the caller until the worker catches up. The default: a publish
    /// lost silently would break the at-least-once intent, and ingestion can
    /// tolerate brief stalls far better than consumers tolerate loss.
    Backpressure,
    /// Drop the event for that sink and count it.
    DropWithCount,
}

/// Tuning for the dispatcher and its sink workers.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Queue capacity per sink.
    pub queue_capacity: usize,
    /// Maximum delivery attempts per event per sink.
    pub retry_ceiling: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Upper bound on a single backoff delay.
    pub backoff_cap: Duration,
    /// How long `shutdown` waits for queues to drain.
    pub shutdown_grace: Duration,
    pub overflow: OverflowPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            queue_capacity: 256,
            retry_ceiling: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
            overflow: OverflowPolicy::Backpressure,
        }
    }
}

/// Operator-visible outcome that is not plain success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchNotice {
    /// A sink exhausted its retry budget for one event. Emitted once per
    /// (event, sink) pair; the event stays committed in the log.
    PermanentFailure {
        sink: String,
        sequence: u64,
        attempts: u32,
        reason: String,
    },
    /// Shutdown gave up waiting for a sink; this many events were still
    /// queued. They remain replayable from the log.
    Abandoned { sink: String, queued: usize },
}

struct SinkHandle {
    name: String,
    tx: Option<Sender<Event>>,
    rx_probe: Receiver<Event>,
    worker: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

/// Fan-out dispatcher over registered [`Publisher`] sinks.
///
/// Delivery order to a given sink follows enqueue order; cross-sink order is
/// unspecified. Delivery is at-least-once per sink.
pub struct Dispatcher {
    config: DispatcherConfig,
    sinks: Vec<SinkHandle>,
    notice_tx: Sender<DispatchNotice>,
    notice_rx: Receiver<DispatchNotice>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let (notice_tx, notice_rx) = unbounded();
        Dispatcher {
            config,
            sinks: Vec::new(),
            notice_tx,
            notice_rx,
        }
    }

    /// Register a sink and start its worker thread.
    pub fn register(&mut self, publisher: Box<dyn Publisher>) -> io::Result<()> {
        let name = publisher.name().to_string();
        let (tx, rx) = bounded(self.config.queue_capacity);
        let rx_probe = rx.clone();
        let worker_cfg = self.config.clone();
        let notice_tx = self.notice_tx.clone();
        let worker_name = name.clone();

        let worker = thread::Builder::new()
            .name(format!("dispatch-{name}"))
            .spawn(move || run_sink_worker(worker_name, rx, publisher, worker_cfg, notice_tx))?;

        info!("dispatch sink '{name}' registered");
        self.sinks.push(SinkHandle {
            name,
            tx: Some(tx),
            rx_probe,
            worker: Some(worker),
            dropped: Arc::new(AtomicU64::new(0)),
        });
        Ok(())
    }

    /// Hand a committed event to every sink queue.
    ///
    /// Never touches the network. Under [`OverflowPolicy::Backpressure`] this
    /// blocks while a queue is full; under [`OverflowPolicy::DropWithCount`]
    /// a full queue drops the event for that sink and counts it.
    pub fn enqueue(&self, event: &Event) {
        for sink in &self.sinks {
            let Some(tx) = &sink.tx else { continue };
            match self.config.overflow {
                OverflowPolicy::Backpressure => {
                    if tx.send(event.clone()).is_err() {
                        warn!(
                            "sink '{}': worker is gone, event {} not forwarded",
                            sink.name, event.sequence
                        );
                    }
                }
                OverflowPolicy::DropWithCount => match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let total = sink.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            "sink '{}': queue full, dropped event {} ({} dropped so far)",
                            sink.name, event.sequence, total
                        );
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        warn!(
                            "sink '{}': worker is gone, event {} not forwarded",
                            sink.name, event.sequence
                        );
                    }
                },
            }
        }
    }

    /// Events dropped so far across all sinks (drop policy only).
    pub fn dropped_events(&self) -> u64 {
        self.sinks
            .iter()
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .sum()
    }

    /// Queued events not yet handed to workers, summed over sinks.
    pub fn backlog(&self) -> usize {
        self.sinks.iter().map(|s| s.rx_probe.len()).sum()
    }

    /// Channel of permanent-failure and abandonment notices.
    pub fn notices(&self) -> &Receiver<DispatchNotice> {
        &self.notice_rx
    }

    /// Close the queues, wait up to the grace period for workers to drain,
    /// and return every notice produced over the dispatcher's lifetime.
    ///
    /// Events still queued when the grace period runs out are abandoned with
    /// an [`DispatchNotice::Abandoned`] marker — they are not lost, only
    /// undelivered, and a replay-driven re-dispatch can resume them.
    pub fn shutdown(mut self) -> Vec<DispatchNotice> {
        for sink in &mut self.sinks {
            sink.tx = None;
        }

        let deadline = Instant::now() + self.config.shutdown_grace;
        for sink in &mut self.sinks {
            let Some(worker) = sink.worker.take() else {
                continue;
            };
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if worker.is_finished() {
                let _ = worker.join();
                debug!("sink '{}' drained", sink.name);
            } else {
                let queued = sink.rx_probe.len();
                warn!(
                    "sink '{}' did not drain within the grace period, abandoning {} queued events",
                    sink.name, queued
                );
                let _ = self.notice_tx.send(DispatchNotice::Abandoned {
                    sink: sink.name.clone(),
                    queued,
                });
            }
        }

        self.notice_rx.try_iter().collect()
    }
}

fn run_sink_worker(
    name: String,
    rx: Receiver<Event>,
    mut publisher: Box<dyn Publisher>,
    config: DispatcherConfig,
    notice_tx: Sender<DispatchNotice>,
) {
    for event in rx.iter() {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match publisher.publish(&event) {
                Ok(()) => {
                    debug!("sink '{name}': delivered event {}", event.sequence);
                    break;
                }
                Err(e) if attempts >= config.retry_ceiling => {
                    error!(
                        "sink '{name}': giving up on event {} after {attempts} attempts: {e}",
                        event.sequence
                    );
                    let _ = notice_tx.send(DispatchNotice::PermanentFailure {
                        sink: name.clone(),
                        sequence: event.sequence,
                        attempts,
                        reason: e.to_string(),
                    });
                    break;
                }
                Err(e) => {
                    let delay = backoff_delay(&config, attempts);
                    warn!(
                        "sink '{name}': attempt {attempts} for event {} failed ({e}), retrying in {delay:?}",
                        event.sequence
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}

fn backoff_delay(config: &DispatcherConfig, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    config
        .backoff_base
        .saturating_mul(factor)
        .min(config.backoff_cap)
}

/// Publish topic for an event: `mesh/{node_id}/{kind}`.
pub fn topic(event: &Event) -> String {
    format!("mesh/{}/{}", event.node_id, event.body.kind())
}

/// Stable wire encoding of a committed event.
///
/// The event's own fields plus a `schema` marker. Evolution is
/// additive-only: consumers must ignore fields they don't know, so old
/// payloads stay replay-compatible forever.
pub fn encode(event: &Event) -> Result<Value, DispatchError> {
    let mut value =
        serde_json::to_value(event).map_err(|e| DispatchError(e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.insert("schema".to_string(), Value::from(1u32));
    }
    Ok(value)
}

/// A sink that writes each event to the structured log.
///
/// Useful on its own for audit trails and as the fallback when no broker is
/// configured.
#[derive(Debug, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn name(&self) -> &str {
        "log"
    }

    fn publish(&mut self, event: &Event) -> Result<(), DispatchError> {
        let payload = encode(event)?;
        info!(target: "meshfold::publish", "{} {payload}", topic(event));
        Ok(())
    }
}

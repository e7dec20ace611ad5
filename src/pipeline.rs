use crate::dispatch::{DispatchNotice, Dispatcher};
use crate::error::{PipelineError, SourceError};
use crate::ports::{EventSource, EventStore, StateStore};
use crate::projection::Projector;
use ::log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Tuning for the ingestion loop itself.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Consecutive source disconnects tolerated before giving up.
    pub source_retry_ceiling: u32,
    /// First reconnect delay; doubles per consecutive failure.
    pub source_backoff_base: Duration,
    /// Upper bound on a single reconnect delay.
    pub source_backoff_cap: Duration,
    /// Emit a progress line every this many processed events.
    pub progress_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            source_retry_ceiling: 10,
            source_backoff_base: Duration::from_secs(1),
            source_backoff_cap: Duration::from_secs(60),
            progress_every: 100,
        }
    }
}

/// Counters kept by the ingestion loop, reported on progress lines and
/// available after shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Events committed to the log.
    pub processed: u64,
    /// Events skipped because a transient append failure lost them.
    pub append_skips: u64,
    /// Committed events whose store write failed (repaired by rebuild).
    pub projection_errors: u64,
    /// Source reconnect attempts.
    pub source_retries: u64,
}

/// Cooperative stop signal for a running pipeline.
///
/// Cheap to clone and safe to trigger from any thread (a signal handler, a
/// UI). The loop finishes the in-flight append + projection before exiting,
/// so shutdown never leaves a half-committed event.
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// The ingestion orchestrator: source → log commit → projection → dispatch.
///
/// Per event the stages run in that fixed order, and the log commit is the
/// durability boundary — nothing downstream is attempted for an event that
/// failed to commit. Each stage fails independently:
///
/// - source errors reconnect with backoff (fatal ones halt),
/// - transient append failures skip the event and keep ingesting; an
///   unrecoverable storage condition halts with [`PipelineError::Storage`],
/// - store-write failures after a commit are reported and tolerated, because
///   the log already holds the event and a rebuild repairs the store,
/// - dispatch is fire-and-forget from the loop's perspective and can never
///   roll back a commit.
pub struct Pipeline<L: EventStore, S: StateStore> {
    log: L,
    projector: Projector<S>,
    dispatcher: Dispatcher,
    source: Box<dyn EventSource>,
    config: PipelineConfig,
    stop: ShutdownHandle,
    stats: PipelineStats,
}

impl<L: EventStore, S: StateStore> Pipeline<L, S> {
    pub fn new(
        log: L,
        projector: Projector<S>,
        dispatcher: Dispatcher,
        source: Box<dyn EventSource>,
        config: PipelineConfig,
    ) -> Self {
        Pipeline {
            log,
            projector,
            dispatcher,
            source,
            config,
            stop: ShutdownHandle::default(),
            stats: PipelineStats::default(),
        }
    }

    /// Handle for stopping this pipeline from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn projector(&self) -> &Projector<S> {
        &self.projector
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run the ingestion loop until end of stream, shutdown, or a fatal
    /// error.
    pub fn run(&mut self) -> Result<(), PipelineError> {
        info!("ingestion pipeline starting");
        let mut consecutive_source_failures = 0u32;

        while !self.stop.is_shutdown() {
            let draft = match self.source.next() {
                Ok(Some(draft)) => {
                    consecutive_source_failures = 0;
                    draft
                }
                Ok(None) => {
                    info!("event source reached end of stream");
                    break;
                }
                Err(SourceError::Fatal(reason)) => {
                    error!("event source failed fatally: {reason}");
                    return Err(SourceError::Fatal(reason).into());
                }
                Err(SourceError::Disconnected(reason)) => {
                    consecutive_source_failures += 1;
                    self.stats.source_retries += 1;
                    if consecutive_source_failures > self.config.source_retry_ceiling {
                        error!(
                            "event source still down after {} reconnect attempts",
                            self.config.source_retry_ceiling
                        );
                        return Err(SourceError::Fatal(reason).into());
                    }
                    let delay = self.source_backoff(consecutive_source_failures);
                    warn!("event source disconnected ({reason}), retrying in {delay:?}");
                    self.interruptible_sleep(delay);
                    continue;
                }
            };

            let event = match self.log.append(draft) {
                Ok(event) => event,
                Err(e) if e.is_fatal() => {
                    error!("unrecoverable storage failure, halting ingestion: {e}");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!("append failed, skipping event: {e}");
                    self.stats.append_skips += 1;
                    continue;
                }
            };

            // Committed. The store write may fail, the dispatch may lag —
            // neither touches the log, and the event is already durable.
            if let Err(e) = self.projector.apply_committed(&event) {
                error!(
                    "state projection failed for committed event {}: {e}",
                    event.sequence
                );
                self.stats.projection_errors += 1;
            }

            self.dispatcher.enqueue(&event);

            self.stats.processed += 1;
            if self.stats.processed % self.config.progress_every == 0 {
                info!(
                    "processed {} events (append skips: {}, projection errors: {}, dispatch backlog: {})",
                    self.stats.processed,
                    self.stats.append_skips,
                    self.stats.projection_errors,
                    self.dispatcher.backlog()
                );
            }
        }

        info!(
            "ingestion pipeline stopping (processed: {}, append skips: {}, projection errors: {})",
            self.stats.processed, self.stats.append_skips, self.stats.projection_errors
        );
        Ok(())
    }

    /// Tear down: persist the projection checkpoint, drain the dispatcher,
    /// and hand back the log, projector, and any dispatch notices.
    pub fn close(self) -> (L, Projector<S>, Vec<DispatchNotice>) {
        if let Err(e) = self.projector.persist() {
            // Not fatal: the next start rebuilds from the log.
            error!("failed to persist state checkpoint during shutdown: {e}");
        }
        let notices = self.dispatcher.shutdown();
        (self.log, self.projector, notices)
    }

    fn source_backoff(&self, failure: u32) -> Duration {
        let factor = 1u32 << failure.saturating_sub(1).min(16);
        self.config
            .source_backoff_base
            .saturating_mul(factor)
            .min(self.config.source_backoff_cap)
    }

    // Sleep in small slices so a shutdown request interrupts a long backoff.
    fn interruptible_sleep(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while Instant::now() < deadline && !self.stop.is_shutdown() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(remaining.min(Duration::from_millis(50)));
        }
    }
}

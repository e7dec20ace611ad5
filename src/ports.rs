//! Collaborator contracts at the edges of the engine.
//!
//! Concrete transports (serial, TCP, a broker client) and storage engines
//! live behind these traits and are selected at startup. The engine only
//! ever sees the contract.

use crate::error::{DispatchError, SourceError, StorageError};
use crate::event::{DraftEvent, Event};
use crate::state::NodeState;

/// Boxed replay iterator returned by [`EventStore::replay`].
pub type ReplayIter<'a> = Box<dyn Iterator<Item = Result<Event, StorageError>> + 'a>;

/// The append-only durable event record.
///
/// [`EventLog`](crate::EventLog) is the file-backed implementation; tests
/// wrap it to inject storage failures.
pub trait EventStore {
    /// Commit a draft, assigning the next sequence. Serialized single-writer.
    fn append(&mut self, draft: DraftEvent) -> Result<Event, StorageError>;

    /// Ordered, finite, gapless replay of events with `sequence >= from`.
    fn replay(&self, from: u64) -> Result<ReplayIter<'_>, StorageError>;

    /// Highest committed sequence, 0 when empty.
    fn latest_sequence(&self) -> u64;
}

impl EventStore for crate::EventLog {
    fn append(&mut self, draft: DraftEvent) -> Result<Event, StorageError> {
        crate::EventLog::append(self, draft)
    }

    fn replay(&self, from: u64) -> Result<ReplayIter<'_>, StorageError> {
        Ok(Box::new(crate::EventLog::replay(self, from)?))
    }

    fn latest_sequence(&self) -> u64 {
        crate::EventLog::latest_sequence(self)
    }
}

/// A live stream of raw events from some external system.
///
/// `Ok(None)` signals end of stream. The source is not replayable — only the
/// log is — so a reconnect resumes from "now", never re-delivering events the
/// pipeline already committed.
pub trait EventSource {
    /// Produce the next event, blocking on I/O as needed.
    fn next(&mut self) -> Result<Option<DraftEvent>, SourceError>;
}

/// An external sink for committed events (broker, message-history store,
/// structured log).
///
/// Delivery is at-least-once: the dispatcher retries failed publishes, so
/// implementations must tolerate duplicates.
pub trait Publisher: Send {
    /// Sink name used in logs and failure notices.
    fn name(&self) -> &str;

    /// Attempt one delivery of one event.
    fn publish(&mut self, event: &Event) -> Result<(), DispatchError>;
}

/// Durable keyed store of the latest projected state per node.
///
/// Exclusively mutated by the projection. Upsert is whole-value: a
/// concurrent reader sees either the pre-event or the post-event state,
/// never a mix of fields.
pub trait StateStore {
    /// Current state for a node, if any event from it has been projected.
    fn get(&self, node_id: &str) -> Option<NodeState>;

    /// Replace (or insert) a node's state as one unit.
    fn upsert(&self, state: NodeState) -> Result<(), StorageError>;

    /// Point-in-time snapshot of every node's state.
    fn all(&self) -> Vec<NodeState>;

    /// Discard all contents. Used by the full-rebuild procedure.
    fn clear(&self) -> Result<(), StorageError>;
}

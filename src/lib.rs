//! Event-sourcing engine for mesh radio telemetry.
//!
//! Events observed on the mesh are committed to an append-only log in
//! strict arrival order, folded into per-node state by a deterministic
//! projection, and forwarded to external sinks with at-least-once delivery.
//! The log is the single source of truth: the projected state is a cache
//! that can always be rebuilt by replaying from sequence 0.

mod config;
mod dispatch;
mod error;
mod event;
mod log;
mod pipeline;
pub mod ports;
mod projection;
mod source;
mod state;
pub mod store;

pub use config::Config;
pub use dispatch::{
    DispatchNotice, Dispatcher, DispatcherConfig, LogPublisher, OverflowPolicy, encode, topic,
};
pub use error::{DispatchError, PipelineError, SourceError, StorageError};
pub use event::{
    DraftEvent, Event, EventBody, Heartbeat, NodeInfo, Position, Provenance, Telemetry,
    TextMessage,
};
pub use log::{EventLog, LogReader, Replay, line_hash};
pub use pipeline::{Pipeline, PipelineConfig, PipelineStats, ShutdownHandle};
pub use projection::{Projector, apply};
pub use source::{ReplaySource, SyntheticSource};
pub use state::{MetricSample, NodeIdentity, NodeState, PositionFix};
pub use store::MemoryStateStore;

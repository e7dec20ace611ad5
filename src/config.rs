//! Runtime configuration with environment overrides.
//!
//! Every field can be overridden by a `MESHFOLD_`-prefixed environment
//! variable; a value that fails to parse falls back to the default with a
//! warning rather than aborting startup.

use crate::dispatch::{DispatcherConfig, OverflowPolicy};
use crate::pipeline::PipelineConfig;
use ::log::warn;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration for the engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `events.jsonl` and the `state/` snapshots.
    pub data_dir: PathBuf,

    /// Per-sink dispatch queue capacity.
    pub dispatch_queue_capacity: usize,
    /// Maximum delivery attempts per event per sink.
    pub dispatch_retry_ceiling: u32,
    /// First dispatch retry delay in milliseconds.
    pub dispatch_backoff_ms: u64,
    /// Full-queue policy: block the producer or drop with a counter.
    pub dispatch_overflow: OverflowPolicy,
    /// Shutdown drain grace period in milliseconds.
    pub shutdown_grace_ms: u64,

    /// Consecutive source disconnects tolerated before halting.
    pub source_retry_ceiling: u32,
    /// First source reconnect delay in milliseconds.
    pub source_backoff_ms: u64,

    /// Synthetic source emit interval in milliseconds.
    pub synthetic_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("meshfold-data"),
            dispatch_queue_capacity: 256,
            dispatch_retry_ceiling: 5,
            dispatch_backoff_ms: 1000,
            dispatch_overflow: OverflowPolicy::Backpressure,
            shutdown_grace_ms: 2000,
            source_retry_ceiling: 10,
            source_backoff_ms: 1000,
            synthetic_interval_ms: 1500,
        }
    }
}

impl Config {
    /// Defaults overridden by `MESHFOLD_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            data_dir: env::var("MESHFOLD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            dispatch_queue_capacity: env_parse(
                "MESHFOLD_DISPATCH_QUEUE_CAPACITY",
                defaults.dispatch_queue_capacity,
            ),
            dispatch_retry_ceiling: env_parse(
                "MESHFOLD_DISPATCH_RETRY_CEILING",
                defaults.dispatch_retry_ceiling,
            ),
            dispatch_backoff_ms: env_parse(
                "MESHFOLD_DISPATCH_BACKOFF_MS",
                defaults.dispatch_backoff_ms,
            ),
            dispatch_overflow: env_overflow("MESHFOLD_DISPATCH_OVERFLOW", defaults.dispatch_overflow),
            shutdown_grace_ms: env_parse("MESHFOLD_SHUTDOWN_GRACE_MS", defaults.shutdown_grace_ms),
            source_retry_ceiling: env_parse(
                "MESHFOLD_SOURCE_RETRY_CEILING",
                defaults.source_retry_ceiling,
            ),
            source_backoff_ms: env_parse("MESHFOLD_SOURCE_BACKOFF_MS", defaults.source_backoff_ms),
            synthetic_interval_ms: env_parse(
                "MESHFOLD_SYNTHETIC_INTERVAL_MS",
                defaults.synthetic_interval_ms,
            ),
        }
    }

    /// Dispatcher tuning derived from this configuration.
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.dispatch_queue_capacity,
            retry_ceiling: self.dispatch_retry_ceiling,
            backoff_base: Duration::from_millis(self.dispatch_backoff_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            overflow: self.dispatch_overflow,
            ..DispatcherConfig::default()
        }
    }

    /// Ingestion-loop tuning derived from this configuration.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            source_retry_ceiling: self.source_retry_ceiling,
            source_backoff_base: Duration::from_millis(self.source_backoff_ms),
            ..PipelineConfig::default()
        }
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("{key}={raw} is not valid, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_overflow(key: &str, default: OverflowPolicy) -> OverflowPolicy {
    match env::var(key) {
        Ok(raw) => match raw.as_str() {
            "backpressure" => OverflowPolicy::Backpressure,
            "drop" => OverflowPolicy::DropWithCount,
            _ => {
                warn!("{key}={raw} is not valid (expected 'backpressure' or 'drop'), using default");
                default
            }
        },
        Err(_) => default,
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latest value of one telemetry metric, versioned by the event that set it.
///
/// Each metric is independently guarded: a replayed older event can never
/// overwrite a newer reading for the same metric name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub value: f64,
    /// Sequence of the event that produced this value.
    pub sequence: u64,
}

/// Most recent GPS fix for a node, versioned like a metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Sequence of the event that produced this fix.
    pub sequence: u64,
}

/// Identity fields announced by the node itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,
}

/// Current derived state of one mesh node.
///
/// Never stored as an authority: at any time this equals the fold of every
/// committed event with this `node_id`, in sequence order, from
/// [`NodeState::empty`]. The log is the source of truth; this is the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeState {
    pub node_id: String,

    /// `occurred_at` of the first event ever seen from this node.
    pub first_seen_at: u64,

    /// `occurred_at` of the newest (by sequence) event seen from this node.
    pub last_seen_at: u64,

    /// Highest event sequence folded into this state. The caller's
    /// idempotency guard — the fold itself has no memory.
    pub last_seen_sequence: u64,

    /// Total events folded in, of any kind.
    pub seen_event_count: u64,

    /// Convenience copy of the `battery_level` metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionFix>,

    /// Text of the most recent message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_info: Option<NodeIdentity>,

    /// Latest reading per metric name, each with its own sequence guard.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, MetricSample>,
}

impl NodeState {
    /// The initial state for a node that has never produced an event.
    pub fn empty(node_id: impl Into<String>) -> Self {
        NodeState {
            node_id: node_id.into(),
            first_seen_at: 0,
            last_seen_at: 0,
            last_seen_sequence: 0,
            seen_event_count: 0,
            battery_level: None,
            position: None,
            last_message: None,
            node_info: None,
            metrics: BTreeMap::new(),
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A committed, immutable event record stored in the log.
///
/// Events are serialized as single JSON lines in `events.jsonl`. The
/// `sequence` is assigned by [`EventLog::append`](crate::EventLog::append) at
/// commit time and is the only ordering authority — `occurred_at` is whatever
/// the radio reported and may be out of wall-clock order.
///
/// Serialization is additive-only: optional fields are omitted when absent,
/// unknown fields are ignored on decode, and event kinds this version does
/// not know about survive a round trip as [`EventBody::Unknown`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Monotonically increasing, gapless commit sequence. Starts at 1.
    pub sequence: u64,

    /// Source-supplied Unix timestamp in seconds.
    pub occurred_at: u64,

    /// Identifier of the originating mesh node.
    pub node_id: String,

    /// Kind-specific payload.
    pub body: EventBody,

    /// Radio-level provenance (SNR, RSSI, channel). Omitted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

/// An event as produced by a source, before the log has committed it.
///
/// Identical to [`Event`] minus the `sequence` — only the log hands out
/// sequence numbers.
///
/// # Examples
///
/// ```
/// use meshfold::DraftEvent;
///
/// let draft = DraftEvent::text("!a1b2c3d4", "hello mesh", 0);
/// assert_eq!(draft.node_id, "!a1b2c3d4");
/// assert_eq!(draft.body.kind(), "text_message");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftEvent {
    pub occurred_at: u64,
    pub node_id: String,
    pub body: EventBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

/// Kind-specific event payload.
///
/// Externally tagged: `{"telemetry": {"metrics": {...}}}`. The trailing
/// [`EventBody::Unknown`] variant captures any kind a newer schema may emit,
/// so old readers replay new logs without error — projections treat it as a
/// presence-only update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventBody {
    NodeHeartbeat(Heartbeat),
    TextMessage(TextMessage),
    Position(Position),
    Telemetry(Telemetry),
    NodeInfo(NodeInfo),
    #[serde(untagged)]
    Unknown(Value),
}

impl EventBody {
    /// Stable kind name used in publish topics and logs.
    pub fn kind(&self) -> &str {
        match self {
            EventBody::NodeHeartbeat(_) => "node_heartbeat",
            EventBody::TextMessage(_) => "text_message",
            EventBody::Position(_) => "position",
            EventBody::Telemetry(_) => "telemetry",
            EventBody::NodeInfo(_) => "node_info",
            EventBody::Unknown(value) => value
                .as_object()
                .and_then(|map| map.keys().next())
                .map(String::as_str)
                .unwrap_or("unknown"),
        }
    }
}

/// Periodic presence beacon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Heartbeat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
}

/// A text message broadcast on a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextMessage {
    pub text: String,
    #[serde(default)]
    pub channel: u32,
}

/// A GPS fix reported by a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

/// Device and environment metric readings.
///
/// Metric names follow the radio's own vocabulary (`battery_level`,
/// `voltage`, `channel_utilization`, `air_util_tx`, `temperature`, ...).
/// The map is ordered so serialized events are byte-stable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Telemetry {
    pub metrics: BTreeMap<String, f64>,
}

/// Node identity announcement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,
}

/// Radio-level reception metadata carried alongside an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx_snr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx_rssi: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
}

impl DraftEvent {
    /// Create a draft with the given node and body, timestamped now.
    pub fn new(node_id: impl Into<String>, body: EventBody) -> Self {
        DraftEvent {
            occurred_at: unix_now(),
            node_id: node_id.into(),
            body,
            provenance: None,
        }
    }

    /// Set the source-supplied timestamp (Unix seconds).
    pub fn at(mut self, occurred_at: u64) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Attach radio provenance.
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Heartbeat draft.
    pub fn heartbeat(node_id: impl Into<String>) -> Self {
        DraftEvent::new(node_id, EventBody::NodeHeartbeat(Heartbeat::default()))
    }

    /// Text message draft.
    pub fn text(node_id: impl Into<String>, text: impl Into<String>, channel: u32) -> Self {
        DraftEvent::new(
            node_id,
            EventBody::TextMessage(TextMessage {
                text: text.into(),
                channel,
            }),
        )
    }

    /// Position draft.
    pub fn position(node_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        DraftEvent::new(
            node_id,
            EventBody::Position(Position {
                latitude,
                longitude,
                altitude: None,
            }),
        )
    }

    /// Telemetry draft from `(metric, value)` pairs.
    pub fn telemetry(node_id: impl Into<String>, metrics: &[(&str, f64)]) -> Self {
        DraftEvent::new(
            node_id,
            EventBody::Telemetry(Telemetry {
                metrics: metrics
                    .iter()
                    .map(|(name, value)| (name.to_string(), *value))
                    .collect(),
            }),
        )
    }

    /// Node info draft.
    pub fn node_info(node_id: impl Into<String>, info: NodeInfo) -> Self {
        DraftEvent::new(node_id, EventBody::NodeInfo(info))
    }

    /// Promote this draft to a committed event with the given sequence.
    ///
    /// Only the log calls this — sequence assignment is its exclusive job.
    pub(crate) fn into_event(self, sequence: u64) -> Event {
        Event {
            sequence,
            occurred_at: self.occurred_at,
            node_id: self.node_id,
            body: self.body,
            provenance: self.provenance,
        }
    }
}

impl Event {
    /// Strip the sequence, turning a committed event back into a draft.
    ///
    /// Used when replaying the log through a source adapter — the receiving
    /// log assigns fresh sequences.
    pub fn into_draft(self) -> DraftEvent {
        DraftEvent {
            occurred_at: self.occurred_at,
            node_id: self.node_id,
            body: self.body,
            provenance: self.provenance,
        }
    }
}

/// Current Unix time in seconds, clamped to 0 if the clock is pre-epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

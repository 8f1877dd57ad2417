//! Message types carried by the download event stream

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known values of the `type` field
pub mod kinds {
    /// Liveness ping, optionally carrying `queue_size`
    pub const HEARTBEAT: &str = "heartbeat";
    /// Sent by the server right after the stream opens
    pub const CONNECTION: &str = "connection";
    /// Asks the UI to reload its whole download list
    pub const FORCE_REFRESH: &str = "force_refresh";
    /// Manual diagnostics message
    pub const TEST_MESSAGE: &str = "test_message";
    /// Per-job state change
    pub const STATUS_UPDATE: &str = "status_update";
    /// Synthesized locally by the coalescer, never received
    pub const BATCH_STATUS_UPDATE: &str = "batch_status_update";
}

/// A message decoded from a single stream frame
///
/// Fields the client does not interpret are kept in `extra`, so pass-through
/// messages reach the consumer with their original shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub msg_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InboundMessage {
    /// Create a message with only a type
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            data: None,
            status: None,
            queue_size: None,
            extra: Map::new(),
        }
    }

    /// Attach a `data` payload
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Shorthand for a `status_update` message
    pub fn status_update(data: Value) -> Self {
        Self::new(kinds::STATUS_UPDATE).with_data(data)
    }

    /// Look up a field inside `data`
    pub fn data_field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(name))
    }

    /// The job status carried in `data.status`
    pub fn job_status(&self) -> Option<&str> {
        self.data_field("status").and_then(Value::as_str)
    }

    /// The job progress carried in `data.progress`, 0 when absent
    pub fn progress(&self) -> f64 {
        self.data_field("progress")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// The entity key for coalescing, taken from `data.id`
    pub fn coalesce_key(&self) -> Option<CoalesceKey> {
        self.data_field("id").and_then(CoalesceKey::from_value)
    }

    pub fn is_type(&self, kind: &str) -> bool {
        self.msg_type == kind
    }
}

/// Identifies the job a buffered update belongs to
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoalesceKey(String);

impl CoalesceKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build a key from a JSON id; strings and integers are accepted
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CoalesceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Several status payloads delivered in one call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub data: Vec<Value>,
}

impl BatchMessage {
    pub fn new(data: Vec<Value>) -> Self {
        Self {
            msg_type: kinds::BATCH_STATUS_UPDATE.to_string(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// What the registered consumer receives
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamMessage {
    /// A message forwarded as it came off the wire
    Single(InboundMessage),
    /// Coalesced status updates
    Batch(BatchMessage),
}

impl StreamMessage {
    pub fn message_type(&self) -> &str {
        match self {
            StreamMessage::Single(msg) => &msg.msg_type,
            StreamMessage::Batch(batch) => &batch.msg_type,
        }
    }

    pub fn as_single(&self) -> Option<&InboundMessage> {
        match self {
            StreamMessage::Single(msg) => Some(msg),
            StreamMessage::Batch(_) => None,
        }
    }

    pub fn as_batch(&self) -> Option<&BatchMessage> {
        match self {
            StreamMessage::Batch(batch) => Some(batch),
            StreamMessage::Single(_) => None,
        }
    }
}

impl From<InboundMessage> for StreamMessage {
    fn from(msg: InboundMessage) -> Self {
        StreamMessage::Single(msg)
    }
}

impl From<BatchMessage> for StreamMessage {
    fn from(batch: BatchMessage) -> Self {
        StreamMessage::Batch(batch)
    }
}

//! Frame decoding and message classification
//!
//! Decides, per message, whether it is consumed locally, delivered right
//! away, or buffered for coalescing.

use thiserror::Error;

use crate::types::{kinds, CoalesceKey, InboundMessage};

/// Why a frame was dropped before classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame is not a valid message: {0}")]
    Json(String),

    #[error("{kind} frame is missing `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

/// Semantic category of a decoded message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    /// Liveness and diagnostics; never forwarded
    Control,
    /// Bypasses buffering
    Priority,
    /// Buffered per job and delivered in batches
    Coalescable(CoalesceKey),
    /// Unclassified pass-through, delivered immediately
    Generic,
}

impl Category {
    /// True for categories that reach the consumer without delay
    pub fn is_immediate(&self) -> bool {
        matches!(self, Category::Priority | Category::Generic)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Control => "control",
            Category::Priority => "priority",
            Category::Coalescable(_) => "coalescable",
            Category::Generic => "generic",
        }
    }
}

/// Job states that must be shown as soon as they happen
const TERMINAL_STATUSES: [&str; 3] = ["stopped", "done", "failed"];

/// Decode one frame into a message
///
/// A `status_update` without an object `data` holding a usable `id` is
/// rejected here, so classification never sees it.
pub fn decode_frame(frame: &str) -> Result<InboundMessage, DecodeError> {
    let message: InboundMessage =
        serde_json::from_str(frame).map_err(|e| DecodeError::Json(e.to_string()))?;

    if message.is_type(kinds::STATUS_UPDATE) {
        let missing = |field: &'static str| DecodeError::MissingField {
            kind: kinds::STATUS_UPDATE,
            field,
        };
        match &message.data {
            Some(data) if data.is_object() => {}
            _ => return Err(missing("data")),
        }
        if message.coalesce_key().is_none() {
            return Err(missing("data.id"));
        }
    }

    Ok(message)
}

/// Classify a decoded message
pub fn classify(message: &InboundMessage) -> Category {
    match message.msg_type.as_str() {
        kinds::HEARTBEAT | kinds::CONNECTION => Category::Control,
        kinds::FORCE_REFRESH | kinds::TEST_MESSAGE => Category::Priority,
        kinds::STATUS_UPDATE if is_high_signal(message) => Category::Priority,
        kinds::STATUS_UPDATE => message
            .coalesce_key()
            .map_or(Category::Generic, Category::Coalescable),
        _ => Category::Generic,
    }
}

fn is_high_signal(message: &InboundMessage) -> bool {
    match message.job_status() {
        Some(status) if TERMINAL_STATUSES.contains(&status) => true,
        Some("downloading") => message.progress() > 0.0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(status: &str, progress: f64) -> InboundMessage {
        InboundMessage::status_update(json!({"id": "a", "status": status, "progress": progress}))
    }

    #[test]
    fn test_control_messages() {
        assert_eq!(classify(&InboundMessage::new("heartbeat")), Category::Control);
        assert_eq!(classify(&InboundMessage::new("connection")), Category::Control);
    }

    #[test]
    fn test_priority_types() {
        assert_eq!(classify(&InboundMessage::new("force_refresh")), Category::Priority);
        assert_eq!(classify(&InboundMessage::new("test_message")), Category::Priority);
    }

    #[test]
    fn test_terminal_statuses_are_priority() {
        for s in ["stopped", "done", "failed"] {
            assert_eq!(classify(&status(s, 0.0)), Category::Priority, "status {}", s);
        }
    }

    #[test]
    fn test_downloading_needs_progress() {
        assert_eq!(classify(&status("downloading", 12.5)), Category::Priority);
        assert_eq!(
            classify(&status("downloading", 0.0)),
            Category::Coalescable(CoalesceKey::new("a"))
        );
    }

    #[test]
    fn test_other_statuses_coalesce() {
        for s in ["waiting", "parsing", "proxying", ""] {
            assert_eq!(
                classify(&status(s, 40.0)),
                Category::Coalescable(CoalesceKey::new("a"))
            );
        }
    }

    #[test]
    fn test_unknown_types_pass_through() {
        let msg = InboundMessage::new("wait_countdown").with_data(json!({"id": 1}));
        assert_eq!(classify(&msg), Category::Generic);
        assert!(Category::Generic.is_immediate());
        assert!(!Category::Control.is_immediate());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_frame("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode_frame("[1,2,3]"), Err(DecodeError::Json(_))));
        assert!(matches!(decode_frame(r#"{"data":{}}"#), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_rejects_status_update_without_id() {
        assert_eq!(
            decode_frame(r#"{"type":"status_update"}"#),
            Err(DecodeError::MissingField {
                kind: "status_update",
                field: "data"
            })
        );
        assert_eq!(
            decode_frame(r#"{"type":"status_update","data":{"status":"done"}}"#),
            Err(DecodeError::MissingField {
                kind: "status_update",
                field: "data.id"
            })
        );
    }

    #[test]
    fn test_decode_accepts_server_frames() {
        let msg = decode_frame(
            r#"{"type":"status_update","data":{"id":17,"status":"waiting","progress":0},"timestamp":1.0}"#,
        )
        .unwrap();
        assert_eq!(classify(&msg), Category::Coalescable(CoalesceKey::new("17")));

        let heartbeat = decode_frame(r#"{"type":"heartbeat","queue_size":3}"#).unwrap();
        assert_eq!(heartbeat.queue_size, Some(3));
    }
}

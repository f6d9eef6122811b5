use serde_json::Value;

use crate::sse::StreamFrame;

/// What a decoded frame means to a chat exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Session metadata. `session_id` is `None` when the frame carried no
    /// numeric id.
    Meta { session_id: Option<i64> },
    /// A piece of the answer, to be appended.
    Text { content: String },
    /// The backend gave up; `message` is plain text.
    Error { message: String },
    /// The answer is complete.
    Done,
}

impl ChatEvent {
    /// Classify a frame. Returns `None` for frames that carry nothing to act
    /// on: malformed `meta` payloads and data-less text frames.
    pub fn from_frame(frame: StreamFrame) -> Option<Self> {
        match frame.event.as_str() {
            "meta" => match serde_json::from_str::<Value>(&frame.data) {
                Ok(meta) => Some(Self::Meta {
                    session_id: meta.get("session_id").and_then(Value::as_i64),
                }),
                Err(e) => {
                    tracing::debug!("Ignoring malformed meta frame: {}", e);
                    None
                }
            },
            "error" => Some(Self::Error {
                message: frame.data,
            }),
            "done" => Some(Self::Done),
            _ if frame.data.is_empty() => None,
            _ => Some(Self::Text {
                content: frame.data,
            }),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Meta { .. } => "meta",
            Self::Text { .. } => "text",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

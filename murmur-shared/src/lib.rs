use serde::{Deserialize, Serialize};
use std::fmt;

mod ndjson;

pub use ndjson::{encode_event, DecodeError, EventDecoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One segment of a turn's content. Only text reaches the provider; other
/// part types (`step-start`, reasoning, tool parts) are accepted and skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    // Browser clients post `parts`, everything else posts `content`.
    #[serde(alias = "parts")]
    pub content: Vec<ContentPart>,
}

impl ConversationTurn {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Concatenates the text segments in order.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Other => None,
            })
            .collect()
    }
}

/// Full history sent by the client on every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub messages: Vec<ConversationTurn>,
}

impl ConversationRequest {
    pub fn new(messages: Vec<ConversationTurn>) -> Self {
        Self { messages }
    }

    pub fn validate(&self) -> Result<(), StreamEvent> {
        if self.messages.is_empty() {
            return Err(StreamEvent::error(
                ErrorKind::InvalidRequest,
                "conversation must contain at least one message",
                false,
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or empty input, no provider call was attempted.
    InvalidRequest,
    /// The provider refused the call before producing output.
    ProviderRejected,
    /// The provider stream ended without a completion signal.
    UpstreamTerminated,
    Timeout,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ProviderRejected => "provider_rejected",
            ErrorKind::UpstreamTerminated => "upstream_terminated",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Event relayed to the client. Every call ends with exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    TextDelta {
        delta: String,
    },
    Done,
    Error {
        kind: ErrorKind,
        message: String,
        /// True once the provider had produced output, so partial text may exist.
        started: bool,
    },
}

impl StreamEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        StreamEvent::TextDelta {
            delta: delta.into(),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>, started: bool) -> Self {
        StreamEvent::Error {
            kind,
            message: message.into(),
            started,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            StreamEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Frames a client sends over the websocket transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Chat(ConversationRequest),
    Cancel,
}

//! JSON envelope exchanged between browsers and the hub.
//!
//! One envelope per WebSocket text frame:
//! ```text
//! {"type":"update","content":"# Hi","renderedHtml":"<h1 id=\"hi\">Hi</h1>"}
//! {"type":"cursor","userId":"user_ABC","position":5,"content":"#FF6B6B"}
//! {"type":"cursor_disconnect","userId":"user_ABC","content":""}
//! ```
//!
//! `content` is overloaded: document source for `init`/`update`, cursor
//! color for `cursor`. Optional fields are omitted when absent.

use serde::{Deserialize, Serialize};

/// Envelope tag.
///
/// Unrecognised tags decode as [`MessageKind::Unknown`] so the hub can pass
/// them through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Snapshot sent once after registration
    Init,
    /// Whole-document replacement
    Update,
    /// Cursor position report
    Cursor,
    /// A participant left
    CursorDisconnect,
    /// Anything else, forwarded verbatim
    #[default]
    #[serde(other)]
    Unknown,
}

/// The wire unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,

    #[serde(default)]
    pub content: String,

    #[serde(
        rename = "renderedHtml",
        alias = "renderedContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rendered: Option<String>,

    #[serde(
        rename = "userId",
        alias = "participantID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub participant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
}

impl Envelope {
    /// Registration snapshot: raw document, its rendered form, and the
    /// identity the server assigned to the receiving participant.
    pub fn init(
        document: impl Into<String>,
        rendered: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Init,
            content: document.into(),
            rendered: Some(rendered.into()),
            participant_id: Some(participant_id.into()),
            position: None,
        }
    }

    /// Document replacement. `rendered` is filled in by the hub.
    pub fn update(document: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Update,
            content: document.into(),
            rendered: None,
            participant_id: None,
            position: None,
        }
    }

    pub fn cursor(participant_id: impl Into<String>, position: u64, color: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Cursor,
            content: color.into(),
            rendered: None,
            participant_id: Some(participant_id.into()),
            position: Some(position),
        }
    }

    pub fn cursor_disconnect(participant_id: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::CursorDisconnect,
            content: String::new(),
            rendered: None,
            participant_id: Some(participant_id.into()),
            position: None,
        }
    }

    /// Attach a rendered representation.
    pub fn with_rendered(mut self, rendered: impl Into<String>) -> Self {
        self.rendered = Some(rendered.into());
        self
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse a text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Last known cursor of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CursorInfo {
    #[serde(rename = "userId")]
    pub participant_id: String,
    pub position: u64,
    pub color: String,
}

impl CursorInfo {
    pub fn new(participant_id: impl Into<String>, position: u64, color: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            position,
            color: color.into(),
        }
    }

    /// The `cursor` envelope announcing this entry.
    pub fn to_envelope(&self) -> Envelope {
        Envelope::cursor(self.participant_id.clone(), self.position, self.color.clone())
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

//! # Protocol module
//!
//! Wire codec for the two peers:
//!
//! - **Agent envelopes** (this file, [`AgentMessage`]): the three message
//!   families the agent sends (`event`, `breakpoint`, `commit`) and the one
//!   the core sends back (`breakpoint`), framed as
//!   `{"message": <tag>, "data": {...}}`.
//! - **UI events** ([`UiCommand`], [`UiEvent`]): the eight control commands
//!   the UI sends and the seven notifications the core streams back, framed
//!   as `{"event": <name>, "content": {...}}`.
//!
//! Decoding distinguishes two failure kinds: an unrecognized tag is a
//! [`DecodeError::Protocol`]; a well-tagged message with missing or mistyped
//! fields is a [`DecodeError::Parse`]. Identifiers are opaque strings;
//! timestamps are ISO-8601 with millisecond precision ([`iso_millis`]).

use serde::{Deserialize, Serialize};

use crate::run::{Breakpoint, Commit, Event, Run};
use crate::state::{AgentState, ExecutionState};

/// Breakpoint and event payloads are opaque to the core: either plain text
/// or a structured JSON object, tag carried explicitly on the wire as
/// `{"kind": "text"|"json", "value": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Json(_) => None,
        }
    }

    /// Text rendering for places that need a string (run names, summary
    /// prompts); JSON payloads are compact-serialized.
    pub fn to_text_lossy(&self) -> String {
        match self {
            Payload::Text(s) => s.clone(),
            Payload::Json(v) => v.to_string(),
        }
    }
}

/// Current time truncated to whole milliseconds. Everything the core mints
/// (run start times, terminal events) must carry the same precision as the
/// wire format, or an exported run would no longer compare equal after
/// reimport.
pub fn now_millis() -> chrono::DateTime<chrono::Utc> {
    let now = chrono::Utc::now();
    chrono::DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// ISO-8601 timestamps with millisecond precision, e.g.
/// `2026-08-01T09:30:00.123Z`.
pub mod iso_millis {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let parsed = DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| NaiveDateTime::parse_from_str(&s, FORMAT).map(|n| n.and_utc()))
            .map_err(serde::de::Error::custom)?;
        // Drop sub-millisecond precision a peer may have sent; stored
        // timestamps must match what serializing them again produces.
        Ok(DateTime::from_timestamp_millis(parsed.timestamp_millis()).unwrap_or(parsed))
    }
}

/// Decode failure, split the way the error policy needs it: `Protocol` is an
/// unknown or missing tag, `Parse` a well-tagged message with bad fields.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("parse error: {0}")]
    Parse(String),
}

// -----------------------------------------------------------------------------
// Agent envelopes
// -----------------------------------------------------------------------------

/// Agent-side envelope: `{"message": "event"|"breakpoint"|"commit", "data": {...}}`.
///
/// Inbound, all three variants occur. Outbound the core only ever sends
/// `breakpoint`, echoing back the (possibly mutated) breakpoint the agent is
/// blocked on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", content = "data", rename_all = "snake_case")]
pub enum AgentMessage {
    Event(Event),
    Breakpoint(Breakpoint),
    Commit(Commit),
}

const AGENT_TAGS: [&str; 3] = ["event", "breakpoint", "commit"];

/// Decodes one agent envelope from wire text.
pub fn decode_agent(text: &str) -> Result<AgentMessage, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::Parse(format!("invalid JSON: {e}")))?;
    let tag = value
        .get("message")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| DecodeError::Protocol("missing \"message\" tag".to_string()))?;
    if !AGENT_TAGS.contains(&tag) {
        return Err(DecodeError::Protocol(format!("unknown message tag: {tag}")));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::Parse(e.to_string()))
}

// -----------------------------------------------------------------------------
// UI -> core commands
// -----------------------------------------------------------------------------

/// Content for commands that only name a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRef {
    pub run: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenameRun {
    pub run: String,
    pub name: String,
}

/// `data` is base64-encoded compressed run bytes, as produced by
/// `run_export`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportRun {
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateMsgContent {
    pub run: String,
    /// Uuid of the pending breakpoint whose `modified_data` is rewritten.
    pub message: String,
    pub content: Payload,
}

/// UI-side control envelope: `{"event": <name>, "content": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "content", rename_all = "snake_case")]
pub enum UiCommand {
    Step(RunRef),
    Continue(RunRef),
    Halt(RunRef),
    RenameRun(RenameRun),
    DownloadRunRequest(RunRef),
    ImportRun(ImportRun),
    DeleteRun(RunRef),
    UpdateMsgContent(UpdateMsgContent),
}

const UI_TAGS: [&str; 8] = [
    "step",
    "continue",
    "halt",
    "rename_run",
    "download_run_request",
    "import_run",
    "delete_run",
    "update_msg_content",
];

/// Decodes one UI command from wire text.
pub fn decode_ui(text: &str) -> Result<UiCommand, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::Parse(format!("invalid JSON: {e}")))?;
    let tag = value
        .get("event")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| DecodeError::Protocol("missing \"event\" tag".to_string()))?;
    if !UI_TAGS.contains(&tag) {
        return Err(DecodeError::Protocol(format!("unknown event name: {tag}")));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::Parse(e.to_string()))
}

// -----------------------------------------------------------------------------
// Core -> UI events
// -----------------------------------------------------------------------------

/// Snapshot sent once when the UI connects: everything it needs to render.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitAppState {
    pub runs: Vec<Run>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_run: Option<String>,
    /// Pending breakpoint uuid when the core is halted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewRun {
    pub run: Run,
}

/// A breakpoint rendered for the UI. The UI model calls these messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub run: String,
    pub message: Breakpoint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateRunState {
    pub run: String,
    pub state: ExecutionState,
    pub agent_state: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewCommit {
    pub run: String,
    pub commit: Commit,
}

/// Export payload: base64-encoded compressed run bytes plus the run name
/// the UI offers as a download filename.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunExport {
    pub name: String,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// Core-side notification envelope, same framing as [`UiCommand`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "content", rename_all = "snake_case")]
pub enum UiEvent {
    InitAppState(InitAppState),
    NewRun(NewRun),
    NewMessage(NewMessage),
    UpdateRunState(UpdateRunState),
    NewCommit(NewCommit),
    RunExport(RunExport),
    Error(ErrorEvent),
}

impl UiEvent {
    pub fn error(message: impl Into<String>) -> Self {
        UiEvent::Error(ErrorEvent {
            message: message.into(),
        })
    }
}

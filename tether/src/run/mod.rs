//! Run data model: one agent execution start to finish, as observed by the
//! core, with its events, breakpoints and commits.
//!
//! A [`Run`] owns its [`Event`]s and [`Commit`]s; breakpoints hang off the
//! event they reference. The same types are used on the wire (agent
//! envelopes, UI events) and in the export byte format, so their serde shape
//! is the wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol::{iso_millis, now_millis, Payload};

/// Kind of a trajectory event reported by the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ProgramStarted,
    ProgramFinished,
    LlmQuery,
    ToolInvocation,
    DebugMessage,
}

/// Where a breakpoint sits relative to its event: `begin`/`end` bracket the
/// work the agent does for the event; `message` carries a standalone note.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Begin,
    End,
    Message,
}

/// A payload-carrying marker attached to an event. The UI may rewrite
/// `modified_data` while the core is halted on it; the agent observes the
/// rewritten payload on resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub uuid: String,
    pub event_id: String,
    pub phase: Phase,
    pub original_data: Payload,
    /// Defaults to `original_data` on attach; the wire may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_data: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(with = "iso_millis")]
    pub sent_at: DateTime<Utc>,
}

impl Breakpoint {
    /// The payload the agent observes on resume: `modified_data` when set,
    /// else `original_data`.
    pub fn effective_data(&self) -> &Payload {
        self.modified_data.as_ref().unwrap_or(&self.original_data)
    }
}

/// A discrete moment in the run trajectory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: EventType,
    pub payload: Payload,
    #[serde(with = "iso_millis")]
    pub sent_at: DateTime<Utc>,
    /// Breakpoints attached to this event, in arrival order. Not part of the
    /// agent's `event` envelope; carried in exports and UI snapshots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakpoints: Vec<Breakpoint>,
}

/// Kind of a single file change inside a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    NewFile,
    DeletedFile,
    Modified,
}

/// One file change inside a [`Commit`]. Immutable once attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_content: Option<String>,
}

/// A workspace snapshot the agent committed at some point in the trajectory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Opaque commit identifier (e.g. a VCS hash).
    pub id: String,
    #[serde(with = "iso_millis")]
    pub date: DateTime<Utc>,
    pub title: String,
    pub changes: Vec<Change>,
}

/// One execution of an agent, start to finish.
///
/// Owns its events and commits. The `event_id → index` map is a derived
/// lookup structure, rebuilt after deserialization, never serialized.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub uuid: String,
    pub name: String,
    pub program_name: String,
    #[serde(with = "iso_millis")]
    pub start_time: DateTime<Utc>,
    pub server_version: String,
    pub events: Vec<Event>,
    pub commits: Vec<Commit>,
    #[serde(skip)]
    event_index: HashMap<String, usize>,
}

impl Run {
    pub fn new(
        name: impl Into<String>,
        program_name: impl Into<String>,
        server_version: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            program_name: program_name.into(),
            // Millisecond precision, like every serialized timestamp.
            start_time: now_millis(),
            server_version: server_version.into(),
            events: Vec::new(),
            commits: Vec::new(),
            event_index: HashMap::new(),
        }
    }

    /// Appends an event and indexes it by `event_id`.
    pub fn push_event(&mut self, event: Event) {
        self.event_index
            .insert(event.event_id.clone(), self.events.len());
        self.events.push(event);
    }

    pub fn event(&self, event_id: &str) -> Option<&Event> {
        self.event_index.get(event_id).map(|&i| &self.events[i])
    }

    pub fn event_mut(&mut self, event_id: &str) -> Option<&mut Event> {
        let i = *self.event_index.get(event_id)?;
        self.events.get_mut(i)
    }

    /// Looks up a breakpoint by event and breakpoint uuid.
    pub fn breakpoint(&self, event_id: &str, uuid: &str) -> Option<&Breakpoint> {
        self.event(event_id)?
            .breakpoints
            .iter()
            .find(|b| b.uuid == uuid)
    }

    pub fn breakpoint_mut(&mut self, event_id: &str, uuid: &str) -> Option<&mut Breakpoint> {
        self.event_mut(event_id)?
            .breakpoints
            .iter_mut()
            .find(|b| b.uuid == uuid)
    }

    /// Rebuilds the `event_id` index; call after deserializing.
    pub fn rebuild_index(&mut self) {
        self.event_index = self
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.event_id.clone(), i))
            .collect();
    }

    /// The last event of the run, if any.
    pub fn last_event(&self) -> Option<&Event> {
        self.events.last()
    }
}

impl PartialEq for Run {
    /// Index is derived state; two runs are equal when their persisted
    /// fields are.
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
            && self.name == other.name
            && self.program_name == other.program_name
            && self.start_time == other.start_time
            && self.server_version == other.server_version
            && self.events == other.events
            && self.commits == other.commits
    }
}

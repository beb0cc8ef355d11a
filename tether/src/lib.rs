//! # Tether core
//!
//! Core of the tether agent debugger: an instrumented agent process reports a
//! trajectory of LLM queries, tool invocations and repository commits; a human
//! operator halts the agent at reported events, inspects and rewrites the
//! payload carried across a breakpoint, then resumes stepwise or freely.
//!
//! This crate holds everything that is independent of the transport:
//!
//! - [`protocol`]: wire codec for the agent envelopes and the UI events
//! - [`run`]: the run data model (runs, events, breakpoints, commits)
//! - [`store`]: in-memory run aggregation, export/import, naming
//! - [`runlog`]: on-disk persistence of closed runs
//! - [`state`]: the halt/step/continue state machine
//! - [`summarize`]: best-effort one-line breakpoint summaries via an LLM
//!
//! The serving layer (`serve` crate) wires these together behind two
//! WebSocket endpoints and a single serialized controller lane.

pub mod protocol;
pub mod run;
pub mod runlog;
pub mod state;
pub mod store;
pub mod summarize;

/// Version stamped into every run and checked on import.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use protocol::{
    decode_agent, decode_ui, now_millis, AgentMessage, DecodeError, ErrorEvent, ImportRun,
    InitAppState, NewCommit, NewMessage, NewRun, Payload, RenameRun, RunExport, RunRef, UiCommand,
    UiEvent, UpdateMsgContent, UpdateRunState,
};
pub use run::{Breakpoint, Change, ChangeKind, Commit, Event, EventType, Phase, Run};
pub use runlog::{LogError, RunLog};
pub use state::{AgentState, ExecutionState, PendingBreakpoint, StateMachine};
pub use store::{CloseOutcome, RunStore, StoreError};
pub use summarize::{NoopSummarizer, OpenAiSummarizer, Summarizer};

//! Halt/step/continue state machine for the active run.
//!
//! Passive: every transition is driven by the controller, which is the only
//! writer. The machine owns the pending-breakpoint reference and keeps the
//! invariant that it is non-empty exactly while execution is `HALTED`.

use serde::{Deserialize, Serialize};

use crate::run::{EventType, Phase};

/// The core's control mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Idle,
    Step,
    Halted,
    Continue,
}

/// Reporting label for what the agent appears to be doing right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Idle,
    AgentRunning,
    LlmThinking,
    ToolExecuting,
    Halting,
    Halted,
    AgentFinished,
}

/// Reference to the breakpoint the core is holding while halted. Carries the
/// phase and event type so resuming can derive the next agent state without
/// a store lookup. The breakpoint object itself is owned by its event.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingBreakpoint {
    pub breakpoint_uuid: String,
    pub event_id: String,
    pub phase: Phase,
    pub event_type: EventType,
}

/// Derivation table from `(inside_breakpoint, event_type)`. `inside` means
/// the agent is past a `begin` breakpoint and working on the event.
fn derive_agent_state(inside: bool, event_type: EventType, current: AgentState) -> AgentState {
    match event_type {
        EventType::LlmQuery if inside => AgentState::LlmThinking,
        EventType::ToolInvocation if inside => AgentState::ToolExecuting,
        EventType::LlmQuery | EventType::ToolInvocation => AgentState::AgentRunning,
        // DEBUG_MESSAGE never moves the label; start/finish have explicit
        // transitions of their own.
        EventType::DebugMessage | EventType::ProgramStarted | EventType::ProgramFinished => current,
    }
}

#[derive(Debug)]
pub struct StateMachine {
    execution: ExecutionState,
    agent: AgentState,
    pending: Option<PendingBreakpoint>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            execution: ExecutionState::Idle,
            agent: AgentState::Idle,
            pending: None,
        }
    }

    pub fn execution(&self) -> ExecutionState {
        self.execution
    }

    pub fn agent(&self) -> AgentState {
        self.agent
    }

    pub fn pending(&self) -> Option<&PendingBreakpoint> {
        self.pending.as_ref()
    }

    /// Invariant: pending is non-empty iff execution is `HALTED`.
    pub fn is_consistent(&self) -> bool {
        self.pending.is_some() == (self.execution == ExecutionState::Halted)
    }

    /// PROGRAM_STARTED: a fresh run begins in single-step mode.
    pub fn run_started(&mut self) {
        self.execution = ExecutionState::Step;
        self.agent = AgentState::AgentRunning;
        self.pending = None;
    }

    /// PROGRAM_FINISHED or run closure, from any state.
    pub fn run_finished(&mut self) {
        self.execution = ExecutionState::Idle;
        self.agent = AgentState::AgentFinished;
        self.pending = None;
    }

    /// A breakpoint arrived while stepping: hold it and halt.
    pub fn halt_at(&mut self, pending: PendingBreakpoint) {
        self.execution = ExecutionState::Halted;
        self.agent = AgentState::Halted;
        self.pending = Some(pending);
    }

    /// UI step/continue out of HALTED: clears the pending reference, moves
    /// to `to`, and derives the agent state from the breakpoint being
    /// released (`begin` means the agent now works inside the event).
    pub fn release(&mut self, to: ExecutionState) -> Option<PendingBreakpoint> {
        let released = self.pending.take();
        self.execution = to;
        if let Some(ref p) = released {
            self.agent = derive_agent_state(p.phase == Phase::Begin, p.event_type, self.agent);
        }
        released
    }

    /// UI continue while already stepping: free-run until the next halt
    /// request or PROGRAM_FINISHED.
    pub fn continue_free(&mut self) {
        self.execution = ExecutionState::Continue;
    }

    /// UI halt while free-running: back to single-step; the agent label is
    /// `HALTED` when a pending breakpoint exists, else `HALTING` until the
    /// next breakpoint arrives.
    pub fn halt_requested(&mut self) {
        self.execution = ExecutionState::Step;
        self.agent = if self.pending.is_some() {
            AgentState::Halted
        } else {
            AgentState::Halting
        };
    }

    /// Labels set by control actions are not derivable and must not be
    /// overwritten by observed traffic; they stick until the next control
    /// transition.
    fn label_is_explicit(&self) -> bool {
        matches!(
            self.agent,
            AgentState::Halting | AgentState::Halted | AgentState::AgentFinished
        )
    }

    /// An event was reported outside any breakpoint bracket.
    pub fn observe_event(&mut self, event_type: EventType) {
        if self.label_is_explicit() {
            return;
        }
        self.agent = derive_agent_state(false, event_type, self.agent);
    }

    /// A breakpoint crossed without halting (CONTINUE pass-through).
    pub fn observe_breakpoint(&mut self, phase: Phase, event_type: EventType) {
        if self.label_is_explicit() {
            return;
        }
        self.agent = derive_agent_state(phase == Phase::Begin, event_type, self.agent);
    }
}

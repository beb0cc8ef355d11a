//! The controller: every inbound message from either channel funnels into
//! one serialized execution lane (an unbounded mpsc drained by a single
//! task). All mutation of the run store, the state machine and the pending
//! breakpoint happens here, so handlers are atomic with respect to each
//! other and the UI can never observe the pending reference out of step
//! with the execution state.
//!
//! Error policy: malformed or out-of-order agent input is fatal to the
//! agent session (close frame, UI informed); semantically invalid UI
//! commands are answered with an `error` event and the session continues.

use base64::Engine;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use tether::{
    decode_agent, decode_ui, AgentMessage, Breakpoint, Commit, Event, EventType, ExecutionState,
    InitAppState, NewCommit, NewMessage, NewRun, Payload, PendingBreakpoint, Phase, RunExport,
    RunLog, RunStore, StateMachine, Summarizer, UiCommand, UiEvent, UpdateRunState,
};

use crate::connection::{OutboundHandle, Peer};

/// One message on the controller lane.
#[derive(Debug)]
pub(crate) enum LaneMsg {
    Connected(Peer, OutboundHandle),
    /// A text frame, in wire order for its channel. Decoded on the lane so
    /// decode errors follow the same serialized error policy as handlers.
    Inbound(Peer, String),
    Disconnected(Peer),
}

pub(crate) struct Controller {
    store: RunStore,
    machine: StateMachine,
    log: RunLog,
    summarizer: Arc<dyn Summarizer>,
    agent: Option<OutboundHandle>,
    ui: Option<OutboundHandle>,
}

impl Controller {
    pub(crate) fn new(store: RunStore, log: RunLog, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            store,
            machine: StateMachine::new(),
            log,
            summarizer,
            agent: None,
            ui: None,
        }
    }

    /// Drains the lane until every sender is gone.
    pub(crate) async fn run(mut self, mut rx: UnboundedReceiver<LaneMsg>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg).await;
        }
        tracing::debug!("controller lane drained, stopping");
    }

    async fn handle(&mut self, msg: LaneMsg) {
        match msg {
            LaneMsg::Connected(Peer::Agent, handle) => self.agent = Some(handle),
            LaneMsg::Connected(Peer::Ui, handle) => {
                self.ui = Some(handle);
                self.send_init_state();
            }
            LaneMsg::Inbound(Peer::Agent, text) => self.on_agent_text(&text).await,
            LaneMsg::Inbound(Peer::Ui, text) => self.on_ui_text(&text),
            LaneMsg::Disconnected(Peer::Agent) => self.on_agent_disconnected(),
            LaneMsg::Disconnected(Peer::Ui) => self.ui = None,
        }
    }

    // -------------------------------------------------------------------------
    // Outbound helpers
    // -------------------------------------------------------------------------

    fn send_ui(&self, event: &UiEvent) {
        let Some(ui) = &self.ui else { return };
        match serde_json::to_string(event) {
            Ok(json) => {
                ui.send_text(json);
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode UI event"),
        }
    }

    fn ui_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(error = %message, "reporting error to UI");
        self.send_ui(&UiEvent::error(message));
    }

    fn send_agent_breakpoint(&self, bp: &Breakpoint) {
        let Some(agent) = &self.agent else {
            tracing::warn!(breakpoint = %bp.uuid, "no agent connection to resume");
            return;
        };
        match serde_json::to_string(&AgentMessage::Breakpoint(bp.clone())) {
            Ok(json) => {
                agent.send_text(json);
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode breakpoint"),
        }
    }

    /// Agent protocol violation: fatal to the agent session. The channel is
    /// closed with the reason; the UI is informed. Run closure happens when
    /// the disconnect comes back through the lane.
    fn agent_fatal(&mut self, reason: &str) {
        tracing::warn!(reason = %reason, "agent protocol violation, closing agent session");
        self.ui_error(format!("agent protocol violation: {reason}"));
        if let Some(agent) = &self.agent {
            agent.close(reason);
        }
    }

    fn push_run_state(&self, run_uuid: &str) {
        self.send_ui(&UiEvent::UpdateRunState(UpdateRunState {
            run: run_uuid.to_string(),
            state: self.machine.execution(),
            agent_state: self.machine.agent(),
            halted_at: self
                .machine
                .pending()
                .map(|p| p.breakpoint_uuid.clone()),
        }));
    }

    fn send_init_state(&self) {
        self.send_ui(&UiEvent::InitAppState(InitAppState {
            runs: self.store.runs().cloned().collect(),
            active_run: self.store.active().map(|r| r.uuid.clone()),
            halted_at: self.machine.pending().map(|p| p.breakpoint_uuid.clone()),
        }));
    }

    // -------------------------------------------------------------------------
    // Agent channel
    // -------------------------------------------------------------------------

    async fn on_agent_text(&mut self, text: &str) {
        match decode_agent(text) {
            Ok(AgentMessage::Event(event)) => self.on_agent_event(event),
            Ok(AgentMessage::Breakpoint(bp)) => self.on_agent_breakpoint(bp).await,
            Ok(AgentMessage::Commit(commit)) => self.on_agent_commit(commit),
            Err(e) => self.agent_fatal(&e.to_string()),
        }
    }

    fn on_agent_event(&mut self, event: Event) {
        match event.event_type {
            EventType::ProgramStarted => self.on_program_started(event),
            EventType::ProgramFinished => self.on_program_finished(event),
            EventType::DebugMessage => self.on_debug_message(event),
            EventType::LlmQuery | EventType::ToolInvocation => {
                let Some(run_uuid) = self.active_run_uuid() else {
                    self.agent_fatal("event received without an active run");
                    return;
                };
                let event_type = event.event_type;
                if let Err(e) = self.store.attach_event(event) {
                    self.agent_fatal(&e.to_string());
                    return;
                }
                self.machine.observe_event(event_type);
                self.push_run_state(&run_uuid);
            }
        }
    }

    fn on_program_started(&mut self, event: Event) {
        if self.store.active().is_some() {
            // The previous run never finished; seal it, then drop the agent.
            self.machine.run_finished();
            let closed =
                self.close_active_run("PROGRAM_STARTED arrived while this run was active");
            if let Some(uuid) = closed {
                self.push_run_state(&uuid);
            }
            self.agent_fatal("PROGRAM_STARTED while a run is already active");
            return;
        }
        let program_name = event.payload.to_text_lossy();
        let run_uuid = match self.store.open_run(&program_name) {
            Ok(run) => run.uuid.clone(),
            Err(e) => {
                self.agent_fatal(&e.to_string());
                return;
            }
        };
        if let Err(e) = self.store.attach_event(event) {
            self.agent_fatal(&e.to_string());
            return;
        }
        self.machine.run_started();
        if let Some(run) = self.store.get(&run_uuid) {
            self.send_ui(&UiEvent::NewRun(NewRun { run: run.clone() }));
        }
        self.push_run_state(&run_uuid);
    }

    fn on_program_finished(&mut self, event: Event) {
        let Some(run_uuid) = self.active_run_uuid() else {
            self.agent_fatal("PROGRAM_FINISHED without an active run");
            return;
        };
        if let Err(e) = self.store.attach_event(event) {
            self.agent_fatal(&e.to_string());
            return;
        }
        self.machine.run_finished();
        self.close_active_run("program finished");
        self.push_run_state(&run_uuid);
    }

    /// Debug lines don't touch execution state; the UI sees them as a
    /// message-phase breakpoint attached to the event.
    fn on_debug_message(&mut self, event: Event) {
        let Some(run_uuid) = self.active_run_uuid() else {
            self.agent_fatal("DEBUG_MESSAGE without an active run");
            return;
        };
        let message = Breakpoint {
            uuid: Uuid::new_v4().to_string(),
            event_id: event.event_id.clone(),
            phase: Phase::Message,
            original_data: event.payload.clone(),
            modified_data: Some(event.payload.clone()),
            summary: None,
            sent_at: event.sent_at,
        };
        if let Err(e) = self.store.attach_event(event) {
            self.agent_fatal(&e.to_string());
            return;
        }
        match self.store.attach_breakpoint(message) {
            Ok(message) => {
                self.send_ui(&UiEvent::NewMessage(NewMessage {
                    run: run_uuid,
                    message,
                }));
            }
            Err(e) => self.agent_fatal(&e.to_string()),
        }
    }

    async fn on_agent_breakpoint(&mut self, bp: Breakpoint) {
        let Some(run_uuid) = self.active_run_uuid() else {
            self.agent_fatal("breakpoint received without an active run");
            return;
        };
        match self.machine.execution() {
            ExecutionState::Step | ExecutionState::Continue => {}
            ExecutionState::Halted => {
                self.agent_fatal("breakpoint received while already halted");
                return;
            }
            ExecutionState::Idle => {
                self.agent_fatal("breakpoint received while idle");
                return;
            }
        }

        let mut attached = match self.store.attach_breakpoint(bp) {
            Ok(b) => b,
            // Unknown event_id included: fatal, state machine untouched.
            Err(e) => {
                self.agent_fatal(&e.to_string());
                return;
            }
        };

        if attached.summary.as_deref().map_or(true, str::is_empty) {
            // Best-effort; the adapter never raises.
            let summary = match self.store.active() {
                Some(run) => self.summarizer.summarize(run, &attached).await,
                None => None,
            };
            if let Some(summary) = summary {
                attached.summary = Some(summary.clone());
                if let Some(b) = self
                    .store
                    .active_breakpoint_mut(&attached.event_id, &attached.uuid)
                {
                    b.summary = Some(summary);
                }
            }
        }

        self.send_ui(&UiEvent::NewMessage(NewMessage {
            run: run_uuid.clone(),
            message: attached.clone(),
        }));

        let event_type = self
            .store
            .active()
            .and_then(|r| r.event(&attached.event_id))
            .map(|e| e.event_type)
            .unwrap_or(EventType::DebugMessage);

        match self.machine.execution() {
            ExecutionState::Step => {
                // Hold the breakpoint; the agent stays blocked until the UI
                // steps or continues.
                self.machine.halt_at(PendingBreakpoint {
                    breakpoint_uuid: attached.uuid.clone(),
                    event_id: attached.event_id.clone(),
                    phase: attached.phase,
                    event_type,
                });
                self.push_run_state(&run_uuid);
            }
            ExecutionState::Continue => {
                // Pass through: echo straight back, never halt.
                self.send_agent_breakpoint(&attached);
                self.machine.observe_breakpoint(attached.phase, event_type);
                self.push_run_state(&run_uuid);
            }
            // Rejected before the breakpoint was attached.
            ExecutionState::Halted | ExecutionState::Idle => {}
        }
    }

    fn on_agent_commit(&mut self, commit: Commit) {
        let Some(run_uuid) = self.active_run_uuid() else {
            self.agent_fatal("commit received without an active run");
            return;
        };
        let snapshot = commit.clone();
        if let Err(e) = self.store.attach_commit(commit) {
            self.agent_fatal(&e.to_string());
            return;
        }
        self.send_ui(&UiEvent::NewCommit(NewCommit {
            run: run_uuid,
            commit: snapshot,
        }));
    }

    fn on_agent_disconnected(&mut self) {
        self.agent = None;
        if self.store.active().is_none() {
            return;
        }
        self.machine.run_finished();
        if let Some(run_uuid) = self.close_active_run("agent disconnected") {
            self.push_run_state(&run_uuid);
        }
    }

    /// Seals the active run: terminal event, log write, history. Emits the
    /// terminal message and surfaces persistence failures to the UI.
    fn close_active_run(&mut self, reason: &str) -> Option<String> {
        match self.store.close_active(reason, &self.log) {
            Ok(outcome) => {
                if let Some(message) = outcome.terminal_message {
                    self.send_ui(&UiEvent::NewMessage(NewMessage {
                        run: outcome.run_uuid.clone(),
                        message,
                    }));
                }
                if let Some(e) = outcome.persist_error {
                    self.ui_error(format!(
                        "run {} kept in memory, log write failed: {e}",
                        outcome.run_uuid
                    ));
                }
                Some(outcome.run_uuid)
            }
            Err(e) => {
                tracing::warn!(error = %e, "closing active run failed");
                None
            }
        }
    }

    fn active_run_uuid(&self) -> Option<String> {
        self.store.active().map(|r| r.uuid.clone())
    }

    // -------------------------------------------------------------------------
    // UI channel
    // -------------------------------------------------------------------------

    fn on_ui_text(&mut self, text: &str) {
        match decode_ui(text) {
            Ok(cmd) => self.on_ui_command(cmd),
            // Unknown names and malformed commands are soft failures for
            // the UI: report and keep the session.
            Err(e) => self.ui_error(e.to_string()),
        }
    }

    fn on_ui_command(&mut self, cmd: UiCommand) {
        match cmd {
            UiCommand::Step(r) => self.on_ui_step(&r.run),
            UiCommand::Continue(r) => self.on_ui_continue(&r.run),
            UiCommand::Halt(r) => self.on_ui_halt(&r.run),
            UiCommand::RenameRun(r) => {
                if let Err(e) = self.store.rename(&r.run, &r.name) {
                    self.ui_error(e.to_string());
                }
            }
            UiCommand::DownloadRunRequest(r) => self.on_ui_download(&r.run),
            UiCommand::ImportRun(r) => self.on_ui_import(&r.data),
            UiCommand::DeleteRun(r) => {
                if let Err(e) = self.store.delete(&r.run) {
                    self.ui_error(e.to_string());
                }
            }
            UiCommand::UpdateMsgContent(u) => self.on_ui_update_msg(&u.run, &u.message, u.content),
        }
    }

    /// The named run must be the active one for control commands.
    fn active_matching(&self, run: &str) -> Option<String> {
        match self.active_run_uuid() {
            Some(uuid) if uuid == run => Some(uuid),
            _ => {
                self.ui_error(format!("run {run} is not the active run"));
                None
            }
        }
    }

    /// Releases the pending breakpoint to the agent with its current
    /// `modified_data` and moves to `to`.
    fn release_pending(&mut self, to: ExecutionState) {
        let Some(released) = self.machine.release(to) else {
            return;
        };
        let bp = self
            .store
            .active()
            .and_then(|r| r.breakpoint(&released.event_id, &released.breakpoint_uuid))
            .cloned();
        match bp {
            Some(bp) => self.send_agent_breakpoint(&bp),
            None => tracing::warn!(
                breakpoint = %released.breakpoint_uuid,
                "pending breakpoint vanished from the active run"
            ),
        }
    }

    fn on_ui_step(&mut self, run: &str) {
        let Some(run_uuid) = self.active_matching(run) else {
            return;
        };
        if self.machine.execution() != ExecutionState::Halted {
            self.ui_error("step is only valid while halted");
            return;
        }
        self.release_pending(ExecutionState::Step);
        self.push_run_state(&run_uuid);
    }

    fn on_ui_continue(&mut self, run: &str) {
        let Some(run_uuid) = self.active_matching(run) else {
            return;
        };
        match self.machine.execution() {
            ExecutionState::Halted => {
                self.release_pending(ExecutionState::Continue);
                self.push_run_state(&run_uuid);
            }
            ExecutionState::Step => {
                self.machine.continue_free();
                self.push_run_state(&run_uuid);
            }
            ExecutionState::Continue | ExecutionState::Idle => {
                self.ui_error("continue ignored: the run is neither halted nor stepping");
            }
        }
    }

    fn on_ui_halt(&mut self, run: &str) {
        let Some(run_uuid) = self.active_matching(run) else {
            return;
        };
        match self.machine.execution() {
            ExecutionState::Continue => {
                self.machine.halt_requested();
                self.push_run_state(&run_uuid);
            }
            // Already stepping or halted: nothing to do.
            ExecutionState::Step | ExecutionState::Halted | ExecutionState::Idle => {}
        }
    }

    fn on_ui_download(&mut self, run: &str) {
        let name = match self.store.get(run) {
            Some(r) => r.name.clone(),
            None => {
                self.ui_error(format!("unknown run: {run}"));
                return;
            }
        };
        match self.store.export(run) {
            Ok(bytes) => {
                let data = base64::engine::general_purpose::STANDARD.encode(bytes);
                self.send_ui(&UiEvent::RunExport(RunExport { name, data }));
            }
            Err(e) => self.ui_error(e.to_string()),
        }
    }

    fn on_ui_import(&mut self, data: &str) {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(data) {
            Ok(b) => b,
            Err(e) => {
                self.ui_error(format!("import: invalid base64: {e}"));
                return;
            }
        };
        match self.store.import(&bytes) {
            Ok(run) => {
                let run = run.clone();
                self.send_ui(&UiEvent::NewRun(NewRun { run }));
            }
            // Version mismatches included: surfaced, never silently dropped.
            Err(e) => self.ui_error(format!("import failed: {e}")),
        }
    }

    fn on_ui_update_msg(&mut self, run: &str, message: &str, content: Payload) {
        if self.active_matching(run).is_none() {
            return;
        }
        if self.machine.execution() != ExecutionState::Halted {
            self.ui_error("message content can only be changed while halted");
            return;
        }
        let Some(pending) = self.machine.pending() else {
            self.ui_error("no pending message");
            return;
        };
        if pending.breakpoint_uuid != message {
            self.ui_error(format!("message {message} is not the pending breakpoint"));
            return;
        }
        let event_id = pending.event_id.clone();
        match self.store.active_breakpoint_mut(&event_id, message) {
            Some(bp) => bp.modified_data = Some(content),
            None => self.ui_error(format!("message {message} not found in the active run")),
        }
    }
}

//! Run store: the in-memory aggregate of every run the core knows about.
//!
//! Holds at most one *active* run plus a newest-first list of closed
//! *historical* runs. All mutation happens on the controller lane; the store
//! itself is single-threaded state. Closed runs are persisted to the
//! [`RunLog`](crate::runlog::RunLog) as zstd-compressed JSON, which is also
//! the export/import byte format.

use uuid::Uuid;

use crate::protocol::{now_millis, Payload};
use crate::run::{Breakpoint, Commit, Event, EventType, Phase, Run};
use crate::runlog::{LogError, RunLog};

/// zstd level for export bytes. Runs are mostly JSON text; the default
/// level keeps export fast without bloating the log.
const EXPORT_ZSTD_LEVEL: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no active run")]
    NoActiveRun,
    #[error("a run is already in progress")]
    RunInProgress,
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("unknown run: {0}")]
    UnknownRun(String),
    #[error("the active run cannot be deleted")]
    ActiveRun,
    #[error("run version {run} does not match server version {server}")]
    VersionMismatch { run: String, server: String },
    #[error("run codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("run compression: {0}")]
    Compress(std::io::Error),
}

/// What `close_active` produced: the closed run's uuid, the terminal
/// message synthesized for it (none when the agent already reported
/// PROGRAM_FINISHED), and a persistence failure if the log write failed.
/// Persistence failures do not fail the close; the run stays in history.
#[derive(Debug)]
pub struct CloseOutcome {
    pub run_uuid: String,
    pub terminal_message: Option<Breakpoint>,
    pub persist_error: Option<LogError>,
}

#[derive(Debug)]
pub struct RunStore {
    server_version: String,
    active: Option<Run>,
    /// Closed runs, newest first.
    history: Vec<Run>,
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new(crate::SERVER_VERSION)
    }
}

impl RunStore {
    pub fn new(server_version: impl Into<String>) -> Self {
        Self {
            server_version: server_version.into(),
            active: None,
            history: Vec::new(),
        }
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn active(&self) -> Option<&Run> {
        self.active.as_ref()
    }

    /// All runs, active first, then history newest first.
    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.active.iter().chain(self.history.iter())
    }

    pub fn get(&self, uuid: &str) -> Option<&Run> {
        self.runs().find(|r| r.uuid == uuid)
    }

    /// Mints a name unique across all runs, suffixing `-2`, `-3`, … on
    /// collision. `exclude` skips one run (rename to an unchanged name).
    fn unique_name(&self, want: &str, exclude: Option<&str>) -> String {
        let taken = |candidate: &str| {
            self.runs()
                .any(|r| r.name == candidate && Some(r.uuid.as_str()) != exclude)
        };
        if !taken(want) {
            return want.to_string();
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{want}-{n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Creates the active run for a starting program. The run name is
    /// minted from the program name and made unique within the store.
    pub fn open_run(&mut self, program_name: &str) -> Result<&Run, StoreError> {
        if self.active.is_some() {
            return Err(StoreError::RunInProgress);
        }
        let name = self.unique_name(program_name, None);
        let run = Run::new(name, program_name, self.server_version.clone());
        Ok(self.active.insert(run))
    }

    pub fn attach_event(&mut self, event: Event) -> Result<(), StoreError> {
        let run = self.active.as_mut().ok_or(StoreError::NoActiveRun)?;
        run.push_event(event);
        Ok(())
    }

    /// Attaches a breakpoint to the event it references and returns it as
    /// attached. Defaults `modified_data` to `original_data` when the wire
    /// omitted it.
    pub fn attach_breakpoint(&mut self, mut bp: Breakpoint) -> Result<Breakpoint, StoreError> {
        let run = self.active.as_mut().ok_or(StoreError::NoActiveRun)?;
        let event = run
            .event_mut(&bp.event_id)
            .ok_or_else(|| StoreError::UnknownEvent(bp.event_id.clone()))?;
        if bp.modified_data.is_none() {
            bp.modified_data = Some(bp.original_data.clone());
        }
        event.breakpoints.push(bp.clone());
        Ok(bp)
    }

    /// Mutable access to a breakpoint of the active run (summary fill,
    /// pending-data rewrite).
    pub fn active_breakpoint_mut(
        &mut self,
        event_id: &str,
        uuid: &str,
    ) -> Option<&mut Breakpoint> {
        self.active.as_mut()?.breakpoint_mut(event_id, uuid)
    }

    pub fn attach_commit(&mut self, commit: Commit) -> Result<(), StoreError> {
        let run = self.active.as_mut().ok_or(StoreError::NoActiveRun)?;
        run.commits.push(commit);
        Ok(())
    }

    /// Closes the active run: appends a terminal PROGRAM_FINISHED event
    /// carrying `reason` as a message-phase breakpoint (unless the agent
    /// already reported its finish), persists the run to the log, moves it
    /// to history.
    pub fn close_active(&mut self, reason: &str, log: &RunLog) -> Result<CloseOutcome, StoreError> {
        let mut run = self.active.take().ok_or(StoreError::NoActiveRun)?;

        let already_finished = run
            .last_event()
            .map(|e| e.event_type == EventType::ProgramFinished)
            .unwrap_or(false);
        let terminal_message = if already_finished {
            None
        } else {
            let event_id = Uuid::new_v4().to_string();
            let now = now_millis();
            let message = Breakpoint {
                uuid: Uuid::new_v4().to_string(),
                event_id: event_id.clone(),
                phase: Phase::Message,
                original_data: Payload::Text(reason.to_string()),
                modified_data: Some(Payload::Text(reason.to_string())),
                summary: None,
                sent_at: now,
            };
            run.push_event(Event {
                event_id,
                event_type: EventType::ProgramFinished,
                payload: Payload::Text(reason.to_string()),
                sent_at: now,
                breakpoints: vec![message.clone()],
            });
            Some(message)
        };

        let run_uuid = run.uuid.clone();
        let persist_error = match encode_run(&run) {
            Ok(bytes) => log.save(&run_uuid, &bytes).err(),
            Err(e) => {
                // Treated like a log failure: the run survives in memory.
                Some(LogError::Io(std::io::Error::other(e.to_string())))
            }
        };
        self.history.insert(0, run);

        Ok(CloseOutcome {
            run_uuid,
            terminal_message,
            persist_error,
        })
    }

    /// Deterministic, self-describing serialization of a whole run:
    /// zstd-compressed JSON.
    pub fn export(&self, run_uuid: &str) -> Result<Vec<u8>, StoreError> {
        let run = self
            .get(run_uuid)
            .ok_or_else(|| StoreError::UnknownRun(run_uuid.to_string()))?;
        encode_run(run)
    }

    /// Reconstructs a run from export bytes. Rejected unless its
    /// `server_version` equals the store's; on success the run joins
    /// history (newest first) under a collision-free name.
    pub fn import(&mut self, bytes: &[u8]) -> Result<&Run, StoreError> {
        let decompressed = zstd::decode_all(bytes).map_err(StoreError::Compress)?;
        let mut run: Run = serde_json::from_slice(&decompressed)?;
        if run.server_version != self.server_version {
            return Err(StoreError::VersionMismatch {
                run: run.server_version,
                server: self.server_version.clone(),
            });
        }
        run.rebuild_index();
        run.name = self.unique_name(&run.name, None);
        self.history.insert(0, run);
        Ok(&self.history[0])
    }

    /// Removes a historical run. The active run cannot be deleted.
    pub fn delete(&mut self, run_uuid: &str) -> Result<(), StoreError> {
        if self.active.as_ref().is_some_and(|r| r.uuid == run_uuid) {
            return Err(StoreError::ActiveRun);
        }
        let idx = self
            .history
            .iter()
            .position(|r| r.uuid == run_uuid)
            .ok_or_else(|| StoreError::UnknownRun(run_uuid.to_string()))?;
        self.history.remove(idx);
        Ok(())
    }

    /// Renames any run; the stored name is uniqued and returned.
    pub fn rename(&mut self, run_uuid: &str, name: &str) -> Result<String, StoreError> {
        let unique = self.unique_name(name, Some(run_uuid));
        let run = self
            .active
            .iter_mut()
            .chain(self.history.iter_mut())
            .find(|r| r.uuid == run_uuid)
            .ok_or_else(|| StoreError::UnknownRun(run_uuid.to_string()))?;
        run.name = unique.clone();
        Ok(unique)
    }

    /// Reloads history from the run log at startup. Runs whose version no
    /// longer matches are skipped with a warning, not an error.
    pub fn load_history(&mut self, log: &RunLog) -> Result<(), LogError> {
        for uuid in log.list()? {
            let bytes = match log.load(&uuid) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(run = %uuid, error = %e, "skipping unreadable run log entry");
                    continue;
                }
            };
            if let Err(e) = self.import(&bytes) {
                tracing::warn!(run = %uuid, error = %e, "skipping run log entry");
            }
        }
        self.history
            .sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(())
    }
}

fn encode_run(run: &Run) -> Result<Vec<u8>, StoreError> {
    let json = serde_json::to_vec(run)?;
    zstd::encode_all(&json[..], EXPORT_ZSTD_LEVEL).map_err(StoreError::Compress)
}

//! Best-effort one-line summaries for breakpoints.
//!
//! When a breakpoint arrives without a summary the controller asks a
//! [`Summarizer`] for one. The adapter is strictly best-effort: any failure
//! (network, rate limit, missing credential) yields `None` and a warning;
//! it never surfaces an error into the controller.

mod openai;

pub use openai::OpenAiSummarizer;

use async_trait::async_trait;

use crate::run::{Breakpoint, Phase, Run};

/// Produces a one-line summary for a breakpoint, or nothing.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, run: &Run, breakpoint: &Breakpoint) -> Option<String>;
}

/// Summarizer that never produces anything. Used in tests and when no LLM
/// credential is configured, so the core runs fully offline.
pub struct NoopSummarizer;

#[async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(&self, _run: &Run, _breakpoint: &Breakpoint) -> Option<String> {
        None
    }
}

/// Longest payload excerpt fed to the model. Payloads can carry whole
/// prompts or tool outputs; the summary only needs the head.
const EXCERPT_LIMIT: usize = 2000;

/// Builds the user prompt for a breakpoint summary. Shared by the OpenAI
/// adapter and its tests.
pub(crate) fn summary_prompt(run: &Run, breakpoint: &Breakpoint) -> String {
    let event_type = run
        .event(&breakpoint.event_id)
        .map(|e| format!("{:?}", e.event_type))
        .unwrap_or_else(|| "unknown".to_string());
    let phase = match breakpoint.phase {
        Phase::Begin => "about to start",
        Phase::End => "just finished",
        Phase::Message => "reported",
    };
    let mut excerpt = breakpoint.effective_data().to_text_lossy();
    if excerpt.len() > EXCERPT_LIMIT {
        let mut cut = EXCERPT_LIMIT;
        while !excerpt.is_char_boundary(cut) {
            cut -= 1;
        }
        excerpt.truncate(cut);
        excerpt.push('…');
    }
    format!(
        "Program \"{}\" {} a {} step. Payload:\n{}",
        run.program_name, phase, event_type, excerpt
    )
}

//! OpenAI Chat Completions implementation of [`Summarizer`].
//!
//! Requires `OPENAI_API_KEY` in the environment (or explicit config). Every
//! failure path logs a warning and yields `None`; summarization must never
//! block or break the debugging session.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

use super::{summary_prompt, Summarizer};
use crate::run::{Breakpoint, Run};

const SYSTEM_PROMPT: &str = "You label steps of a program under a debugger. \
Reply with one short line (no quotes, no trailing period) describing what \
the step does.";

/// Chat-completions summarizer.
pub struct OpenAiSummarizer {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiSummarizer {
    /// Builds a client with default config (API key from `OPENAI_API_KEY`).
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
        }
    }

    /// Builds a client with custom config (e.g. custom API key or base URL).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }

    /// `Some` when a credential is present in the environment, else `None`
    /// (callers fall back to the noop summarizer).
    pub fn from_env(model: impl Into<String>) -> Option<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return None;
        }
        Some(Self::new(model))
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, run: &Run, breakpoint: &Breakpoint) -> Option<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(vec![
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage::from(
                    SYSTEM_PROMPT,
                )),
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(
                    summary_prompt(run, breakpoint).as_str(),
                )),
            ])
            .build();
        let request = match request {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "summary request build failed");
                return None;
            }
        };

        let response = match self.client.chat().create(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(
                    model = %self.model,
                    breakpoint = %breakpoint.uuid,
                    error = %e,
                    "summarization failed, leaving summary empty"
                );
                return None;
            }
        };

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)?;
        let line = content.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

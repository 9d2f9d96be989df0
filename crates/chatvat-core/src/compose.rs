//! Answer composer.
//!
//! Builds a bounded prompt from the system prompt, the ranked context
//! entries and the user's question, then hands it to the [`Completer`]
//! collaborator. Upstream failures come back as
//! [`Error::CompletionUnavailable`]; retrying a paid completion call is a
//! caller decision, so nothing here retries.

use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::KnowledgeEntry;

/// Chat-style prompt handed to a completion model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// An external text-completion model.
#[async_trait]
pub trait Completer: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt) -> AnyResult<String>;
}

/// Context shown when retrieval found nothing.
const NO_CONTEXT: &str = "(no relevant context was found in the knowledge base)";

/// The default system prompt for a bot called `bot_name`.
pub fn default_system_prompt(bot_name: &str) -> String {
    format!(
        "You are {bot_name}, a helpful assistant. Answer the user's question using only \
         the provided context. If the context does not contain the answer, say that you \
         don't know instead of guessing. Keep answers concise."
    )
}

pub struct AnswerComposer {
    completer: Arc<dyn Completer>,
    system_prompt: String,
    max_context_chars: usize,
}

impl AnswerComposer {
    /// `system_prompt` falls back to [`default_system_prompt`] when `None`
    /// or blank.
    pub fn new(
        completer: Arc<dyn Completer>,
        bot_name: &str,
        system_prompt: Option<&str>,
        max_context_chars: usize,
    ) -> Self {
        let system_prompt = match system_prompt.map(str::trim) {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => default_system_prompt(bot_name),
        };
        Self {
            completer,
            system_prompt,
            max_context_chars,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Assemble the prompt. Context blocks keep their ranked order and are
    /// cut off once `max_context_chars` is reached; a first block that is
    /// too long on its own is truncated rather than dropped.
    pub fn build_prompt(&self, query: &str, retrieved: &[KnowledgeEntry]) -> Prompt {
        let mut context = String::new();

        for (i, entry) in retrieved.iter().enumerate() {
            let block = format!("[{}] (source: {})\n{}", i + 1, entry.source_id, entry.text.trim());
            let sep = if context.is_empty() { "" } else { "\n\n" };
            let remaining = self.max_context_chars.saturating_sub(context.len() + sep.len());

            if block.len() <= remaining {
                context.push_str(sep);
                context.push_str(&block);
                continue;
            }
            if context.is_empty() && remaining > 0 {
                context.push_str(truncate_at_char_boundary(&block, remaining));
            }
            break;
        }

        if context.is_empty() {
            context.push_str(NO_CONTEXT);
        }

        Prompt {
            system: self.system_prompt.clone(),
            user: format!("Context:\n{}\n\nQuestion: {}", context, query.trim()),
        }
    }

    /// Ask the completion model to answer `query` from `retrieved`.
    pub async fn answer(&self, query: &str, retrieved: &[KnowledgeEntry]) -> Result<String> {
        let prompt = self.build_prompt(query, retrieved);
        tracing::debug!(
            model = self.completer.model_name(),
            context_entries = retrieved.len(),
            prompt_len = prompt.user.len(),
            "requesting completion"
        );
        let text = self
            .completer
            .complete(&prompt)
            .await
            .map_err(Error::completion)?;
        Ok(text.trim().to_string())
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

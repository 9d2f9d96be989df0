//! Completion providers.
//!
//! All hosted backends speak the OpenAI-compatible
//! `POST {base}/chat/completions` protocol:
//!
//! | `completion.provider` | Default base URL | API key variable |
//! |-----------------------|------------------|------------------|
//! | `groq` | `https://api.groq.com/openai/v1` | `GROQ_API_KEY` |
//! | `openai` | `https://api.openai.com/v1` | `OPENAI_API_KEY` |
//! | `ollama` | `http://localhost:11434/v1` | none |
//! | `disabled` | | |
//!
//! `completion.max_retries` defaults to 0: a failed call surfaces as
//! `CompletionUnavailable` instead of being silently repeated.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use chatvat_core::compose::{Completer, Prompt};

use crate::config::Config;
use crate::embedding::post_json_with_retry;

pub struct DisabledCompleter;

#[async_trait]
impl Completer for DisabledCompleter {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &Prompt) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

/// OpenAI-compatible chat completion client.
pub struct ChatCompleter {
    provider: String,
    model: String,
    url: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl ChatCompleter {
    pub fn new(config: &Config) -> Result<Self> {
        let c = &config.completion;
        let (default_base, default_key_env) = match c.provider.as_str() {
            "groq" => ("https://api.groq.com/openai/v1", Some("GROQ_API_KEY")),
            "openai" => ("https://api.openai.com/v1", Some("OPENAI_API_KEY")),
            "ollama" => ("http://localhost:11434/v1", None),
            other => bail!("Unknown completion provider: {}", other),
        };

        let key_env = c.api_key_env.as_deref().or(default_key_env);
        let api_key = match key_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| anyhow!("{} environment variable not set", var))?,
            ),
            None => None,
        };

        let base = c.base_url.as_deref().unwrap_or(default_base);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(c.timeout_secs))
            .user_agent(concat!("chatvat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            provider: c.provider.clone(),
            model: config.llm_model.clone(),
            url: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key,
            temperature: c.temperature,
            max_tokens: c.max_tokens,
            max_retries: c.max_retries,
            client,
        })
    }

    fn request_body(&self, prompt: &Prompt) -> Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

#[async_trait]
impl Completer for ChatCompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let json = post_json_with_retry(
            &self.client,
            &self.url,
            self.api_key.as_deref(),
            &self.request_body(prompt),
            self.max_retries,
            &self.provider,
        )
        .await?;
        parse_chat_response(&json)
    }
}

/// `choices[0].message.content`.
fn parse_chat_response(json: &Value) -> Result<String> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message.content"))?;
    if content.trim().is_empty() {
        bail!("Completion response was empty");
    }
    Ok(content.to_string())
}

/// Build the completer selected by `completion.provider`.
pub fn create_completer(config: &Config) -> Result<Arc<dyn Completer>> {
    let completer: Arc<dyn Completer> = match config.completion.provider.as_str() {
        "disabled" => Arc::new(DisabledCompleter),
        _ => Arc::new(ChatCompleter::new(config)?),
    };
    tracing::info!(
        provider = %config.completion.provider,
        model = completer.model_name(),
        "completion provider ready"
    );
    Ok(completer)
}

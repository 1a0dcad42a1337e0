//! Formatting pipeline.
//!
//! Sends the raw transcript to a remote rewrite service with strict
//! non-paraphrase instructions, validates the result against a
//! similarity bound, and retries with a constant delay up to a bound.
//! On exhaustion the caller falls back to the raw transcript.

pub mod validator;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::settings::PersonalGlossaryEntry;
pub use validator::{similarity, validate, DEFAULT_SIMILARITY_THRESHOLD};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
/// Constant by design: the dominant failure mode is a single flaky
/// network call, not sustained overload, so exponential backoff buys
/// nothing but latency.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(600);

#[derive(Debug, Clone, Error)]
pub enum FormatError {
    #[error("rewrite call failed: {0}")]
    Rewrite(String),
    #[error("rewrite rejected: similarity {similarity:.3} below threshold")]
    Rejected { similarity: f64 },
}

/// Remote single-shot text rewrite capability.
pub trait RewriteClient {
    fn rewrite(
        &self,
        model: &str,
        prompt: &str,
    ) -> impl std::future::Future<Output = Result<String, String>> + Send;
}

#[derive(Debug, Clone)]
pub struct FormatterConfig {
    pub model: String,
    pub similarity_threshold: f64,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Build the fixed-structure rewrite instruction.
///
/// Only enabled glossary entries are embedded; order is preserved.
pub fn build_prompt(text: &str, glossary: &[PersonalGlossaryEntry]) -> String {
    let mut prompt = String::from(
        "Rewrite the dictated text below for grammar and punctuation only.\n\
         Rules:\n\
         - Do not paraphrase, summarize, or reorder ideas.\n\
         - Do not add or remove information.\n\
         - Keep every word the speaker used unless it is a clear mis-transcription.\n\
         - Output only the rewritten text, with no commentary.\n",
    );

    let enabled: Vec<&PersonalGlossaryEntry> =
        glossary.iter().filter(|entry| entry.enabled).collect();
    if !enabled.is_empty() {
        prompt.push_str("\nPersonal glossary (use the preferred spelling):\n");
        for entry in enabled {
            prompt.push_str("- Preferred: ");
            prompt.push_str(&entry.term);
            prompt.push('.');
            if !entry.aliases.is_empty() {
                prompt.push_str(" Variants: ");
                prompt.push_str(&entry.aliases.join(", "));
            }
            prompt.push('\n');
        }
    }

    prompt.push_str("\nDictated text:\n");
    prompt.push_str(text);
    prompt
}

/// Retrying formatter over any [`RewriteClient`].
pub struct FormattingPipeline<C> {
    client: C,
    config: FormatterConfig,
}

impl<C: RewriteClient> FormattingPipeline<C> {
    pub fn new(client: C, config: FormatterConfig) -> Self {
        Self { client, config }
    }

    /// Rewrite `text`, retrying transport errors and similarity
    /// rejections alike; after the last attempt the most recent error
    /// is surfaced.
    pub async fn format(
        &self,
        text: &str,
        glossary: &[PersonalGlossaryEntry],
    ) -> Result<String, FormatError> {
        let prompt = build_prompt(text, glossary);
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = FormatError::Rewrite("no attempts made".to_string());

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.client.rewrite(&self.config.model, &prompt).await {
                Ok(output) => {
                    let score = similarity(text, &output);
                    if score >= self.config.similarity_threshold {
                        debug!("formatting accepted on attempt {attempt} (similarity {score:.3})");
                        return Ok(output);
                    }
                    warn!("formatting rejected on attempt {attempt}: similarity {score:.3}");
                    last_error = FormatError::Rejected { similarity: score };
                }
                Err(e) => {
                    warn!("formatting attempt {attempt} failed: {e}");
                    last_error = FormatError::Rewrite(e);
                }
            }
        }
        Err(last_error)
    }
}

#[derive(Serialize, Debug)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize, Debug)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// [`RewriteClient`] speaking the OpenAI-compatible chat completions
/// API.
pub struct OpenAiRewriteClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiRewriteClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }
}

impl RewriteClient for OpenAiRewriteClient {
    async fn rewrite(&self, model: &str, prompt: &str) -> Result<String, String> {
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .http
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("failed to send rewrite request: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(format!("rewrite API error ({status}): {body}"));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("failed to parse rewrite response: {e}"))?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| "rewrite response has no choices".to_string())
    }
}

//! Content synthesis against an OpenAI-compatible endpoint.

use std::sync::Arc;
use std::time::Duration;

use super::parse::parse_sections;
use super::prompt::{build_messages, PromptInput};
use super::types::ReportSection;
use crate::error::{LlmError, SynthesisError};
use crate::llm::{GenerationRequest, LlmProvider};
use crate::pipeline::PipelineConfig;

/// Bounds for one synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesisPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub backoff_base: Duration,
    /// Wall-clock limit for a single request.
    pub request_timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for SynthesisPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            request_timeout: Duration::from_secs(300),
            max_tokens: 32_768,
            temperature: 0.3,
        }
    }
}

impl SynthesisPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_transport_attempts.max(1),
            backoff_base: config.backoff_base,
            request_timeout: config.synthesis_timeout,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << (attempt.saturating_sub(1)).min(16))
    }
}

/// Generates typed report sections from extracted material.
pub struct Synthesizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    policy: SynthesisPolicy,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, policy: SynthesisPolicy) -> Self {
        Self {
            provider,
            model: model.into(),
            policy,
        }
    }

    /// Runs one synthesis round and parses the result.
    pub async fn synthesize(
        &self,
        input: &PromptInput<'_>,
    ) -> Result<Vec<ReportSection>, SynthesisError> {
        let raw = self.generate_with_retry(input).await?;
        let sections = parse_sections(&raw, input.tables.len())?;
        tracing::info!(
            sections = sections.len(),
            figures = super::figure_requests(&sections).len(),
            "Synthesized report content"
        );
        Ok(sections)
    }

    async fn generate_with_retry(&self, input: &PromptInput<'_>) -> Result<String, SynthesisError> {
        let messages = build_messages(input);
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                let delay = self.policy.backoff(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying generation after transient failure"
                );
                tokio::time::sleep(delay).await;
            }

            let request = GenerationRequest::new(self.model.clone(), messages.clone())
                .with_temperature(self.policy.temperature)
                .with_max_tokens(self.policy.max_tokens);

            let result = match tokio::time::timeout(
                self.policy.request_timeout,
                self.provider.generate(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout(self.policy.request_timeout)),
            };

            match result {
                Ok(response) => {
                    return Ok(response.first_content().unwrap_or_default().to_string());
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        error = %err,
                        "Transient generation error"
                    );
                    last_error = Some(err);
                }
                Err(err) => {
                    return Err(SynthesisError::Unavailable {
                        attempts: attempt + 1,
                        message: err.to_string(),
                    });
                }
            }
        }

        Err(SynthesisError::Unavailable {
            attempts: self.policy.max_attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt was made".to_string()),
        })
    }
}

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ollama_rs::{
    generation::{completion::request::GenerationRequest, parameters::FormatType},
    models::ModelOptions,
    Ollama,
};
use tracing::{debug, warn};

use crate::settings::LlmSettings;

/// Shape the caller expects back from a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

/// A stateless prompt → text call to some language model provider.
///
/// Callers must treat the returned text as untrusted and validate it.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, format: ResponseFormat) -> Result<String>;
}

/// An Ollama-served model with per-call timeout and bounded retries.
pub struct OllamaModel {
    client: Ollama,
    model: String,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl OllamaModel {
    pub fn new(client: Ollama, model: &str, settings: &LlmSettings) -> Self {
        Self {
            client,
            model: model.to_string(),
            timeout: settings.timeout(),
            max_retries: settings.max_retries,
            backoff: settings.retry_backoff(),
        }
    }

    async fn generate_once(&self, prompt: &str, format: ResponseFormat) -> Result<String> {
        let mut request = GenerationRequest::new(self.model.clone(), prompt.to_string())
            .options(ModelOptions::default().temperature(0.0));
        if format == ResponseFormat::Json {
            request = request.format(FormatType::Json);
        }
        let response = tokio::time::timeout(self.timeout, self.client.generate(request))
            .await
            .map_err(|_| anyhow!("timed out after {:?}", self.timeout))??;
        Ok(response.response)
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn complete(&self, prompt: &str, format: ResponseFormat) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.generate_once(prompt, format).await {
                Ok(text) => {
                    debug!(model = %self.model, attempt, "completion received");
                    return Ok(text);
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = backoff_delay(self.backoff, attempt);
                    warn!(
                        model = %self.model,
                        attempt,
                        error = %e,
                        ?delay,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "LLM call to '{}' failed after {} attempts",
                        self.model,
                        attempt + 1
                    )));
                }
            }
        }
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at 30 seconds.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor).min(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 40), Duration::from_secs(30));
    }
}

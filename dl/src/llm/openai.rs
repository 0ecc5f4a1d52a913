//! OpenAI API client implementation
//!
//! Implements GenerationClient over the Chat Completions API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{GenRole, GenerationClient, LlmError};
use crate::config::{Config, RoleModels};

/// Maximum number of retries for transient errors
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// OpenAI API client
pub struct OpenAIClient {
    model: String,
    role_models: RoleModels,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl OpenAIClient {
    /// Create a new client from configuration
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        debug!(model = %config.llm.model, "from_config: called");
        let api_key = std::env::var(&config.llm.api_key_env)
            .map_err(|_| LlmError::MissingCredentials(config.llm.api_key_env.clone()))?;

        let timeout = Duration::from_millis(config.llm.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: config.llm.model.clone(),
            role_models: config.roles.clone(),
            api_key,
            base_url: config.llm.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.llm.max_tokens,
        })
    }

    fn model_for(&self, role: GenRole) -> &str {
        self.role_models.model_for(role).unwrap_or(&self.model)
    }

    /// Build the request body for the OpenAI API
    fn build_request_body(&self, role: GenRole, system_prompt: &str, context: &str) -> serde_json::Value {
        let model = self.model_for(role);
        debug!(%role, %model, "build_request_body: called");

        // GPT-5.x and o1/o3 models use max_completion_tokens instead of max_tokens
        let uses_completion_tokens = model.starts_with("gpt-5") || model.starts_with("o1") || model.starts_with("o3");

        let mut body = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": context},
            ],
        });

        if uses_completion_tokens {
            body["max_completion_tokens"] = serde_json::json!(self.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(self.max_tokens);
        }

        body
    }
}

#[async_trait]
impl GenerationClient for OpenAIClient {
    async fn generate(&self, role: GenRole, system_prompt: &str, context: &str) -> Result<String, LlmError> {
        debug!(%role, context_len = context.len(), "generate: called");
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(role, system_prompt, context);

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
                warn!(attempt, backoff_ms = backoff, "generate: retrying after transient error");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let response = match self
                .http
                .post(url.clone())
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(attempt, error = %e, "generate: network error");
                    last_error = Some(LlmError::Network(e));
                    continue;
                }
            };

            let status = response.status().as_u16();

            if is_retryable_status(status) {
                if status == 429 {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(60);
                    debug!(attempt, retry_after, "generate: rate limited (429)");
                    last_error = Some(LlmError::RateLimited {
                        retry_after: Duration::from_secs(retry_after),
                    });
                } else {
                    let text = response.text().await.unwrap_or_default();
                    debug!(attempt, status, "generate: retryable error");
                    last_error = Some(LlmError::ApiError { status, message: text });
                }
                continue;
            }

            if !response.status().is_success() {
                debug!(%status, "generate: API error");
                let text = response.text().await.unwrap_or_default();
                return Err(LlmError::ApiError { status, message: text });
            }

            debug!("generate: success");
            let api_response: OpenAIResponse = response.json().await?;
            return api_response
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| LlmError::InvalidResponse("Response had no content".to_string()));
        }

        Err(last_error.unwrap_or_else(|| LlmError::InvalidResponse("Max retries exceeded".to_string())))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(model: &str, roles: RoleModels) -> OpenAIClient {
        OpenAIClient {
            model: model.to_string(),
            role_models: roles,
            api_key: "test-key".to_string(),
            base_url: "https://api.openai.com".to_string(),
            http: Client::new(),
            max_tokens: 1000,
        }
    }

    #[test]
    fn test_build_request_body_basic() {
        let body = client("gpt-4o", RoleModels::default()).build_request_body(GenRole::Worker, "You write", "Chapter 1");

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You write");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Chapter 1");
    }

    #[test]
    fn test_role_model_override() {
        let roles = RoleModels {
            reviewer: Some("o3-mini".to_string()),
            ..Default::default()
        };
        let c = client("gpt-4o", roles);

        let body = c.build_request_body(GenRole::Reviewer, "s", "c");
        assert_eq!(body["model"], "o3-mini");
        assert_eq!(body["max_completion_tokens"], 1000);
        assert!(body.get("max_tokens").is_none());

        let body = c.build_request_body(GenRole::Worker, "s", "c");
        assert_eq!(body["model"], "gpt-4o");
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status));
        }
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
    }
}

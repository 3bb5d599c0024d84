//! Core types and async API client for taskeval

use crate::error::{Result, TaskEvalError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::sleep;

/// A normalized prediction for a single message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub is_task: bool,
    pub confidence: f64,
    pub task: String,
}

/// Gold annotations for a single dataset row, as read from the CSV.
///
/// `label` and `gold_task` are raw cell values; interpretation (number
/// parsing, whitespace trimming) happens in the evaluator so that malformed
/// cells degrade to "not provided" instead of failing the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoldRow {
    pub text: String,
    pub label: Option<String>,
    pub gold_task: Option<String>,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct APIConfig {
    pub url: String,
    pub model: String,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub api_key: Option<String>,
}

fn default_seed() -> u64 {
    42
}
fn default_timeout() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

impl APIConfig {
    pub fn new(url: String, model: String) -> Self {
        Self {
            url,
            model,
            seed: 42,
            timeout_seconds: 120,
            max_retries: 3,
            api_key: None,
        }
    }

    /// Parse from key=value format string
    pub fn from_model_args(args: &str) -> Result<Self> {
        let mut url = None;
        let mut model = None;
        let mut seed = 42u64;
        let mut timeout = 120u64;
        let mut max_retries = 3u32;
        let mut api_key = None;

        for part in args.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part.split_once('=').ok_or_else(|| {
                TaskEvalError::InvalidModelArgs(format!("Invalid format: {}", part))
            })?;

            match key.trim() {
                "base_url" => url = Some(value.trim().to_string()),
                "model" => model = Some(value.trim().to_string()),
                "seed" => {
                    seed = value
                        .trim()
                        .parse()
                        .map_err(|_| TaskEvalError::ParseError(format!("Invalid seed: {}", value)))?
                }
                "timeout" => {
                    timeout = value.trim().parse().map_err(|_| {
                        TaskEvalError::ParseError(format!("Invalid timeout: {}", value))
                    })?
                }
                "max_retries" => {
                    max_retries = value.trim().parse().map_err(|_| {
                        TaskEvalError::ParseError(format!("Invalid max_retries: {}", value))
                    })?
                }
                "api_key" => api_key = Some(value.trim().to_string()),
                _ => {} // Ignore unknown keys
            }
        }

        let url = url.ok_or_else(|| TaskEvalError::MissingField("base_url".to_string()))?;
        let model = model.ok_or_else(|| TaskEvalError::MissingField("model".to_string()))?;

        Ok(Self {
            url: format!("{}/chat/completions", url.trim_end_matches('/')),
            model,
            seed,
            timeout_seconds: timeout,
            max_retries,
            api_key,
        })
    }
}

/// Generation kwargs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenKwargs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

impl GenKwargs {
    /// Parse from key=value format string
    pub fn from_str(args: &str) -> Result<Self> {
        let mut kwargs = GenKwargs::default();

        for part in args.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| TaskEvalError::ParseError(format!("Invalid format: {}", part)))?;

            let key = key.trim();
            let value = value.trim();

            match key {
                "temperature" => {
                    kwargs.temperature = Some(value.parse().map_err(|_| {
                        TaskEvalError::ParseError(format!("Invalid temperature: {}", value))
                    })?)
                }
                "max_tokens" => {
                    kwargs.max_tokens = Some(value.parse().map_err(|_| {
                        TaskEvalError::ParseError(format!("Invalid max_tokens: {}", value))
                    })?)
                }
                "top_p" => {
                    kwargs.top_p = Some(value.parse().map_err(|_| {
                        TaskEvalError::ParseError(format!("Invalid top_p: {}", value))
                    })?)
                }
                _ => {
                    // Try to parse as JSON value
                    let json_value: serde_json::Value = serde_json::from_str(value)
                        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
                    kwargs.extra.insert(key.to_string(), json_value);
                }
            }
        }

        Ok(kwargs)
    }
}

/// OpenAI chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: text.to_string(),
        }
    }

    pub fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: text.to_string(),
        }
    }
}

/// OpenAI chat completion request
#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(flatten)]
    extra: std::collections::HashMap<String, serde_json::Value>,
}

/// OpenAI chat completion response
#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// Async client for OpenAI-compatible APIs
pub struct ApiClient {
    client: Client,
    config: APIConfig,
}

impl ApiClient {
    pub fn new(config: APIConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, config }
    }

    /// Send a single chat completion request with retries, returning the raw
    /// assistant message content
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        gen_kwargs: &GenKwargs,
    ) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: gen_kwargs.temperature,
            max_tokens: gen_kwargs.max_tokens,
            top_p: gen_kwargs.top_p,
            seed: Some(self.config.seed),
            extra: gen_kwargs.extra.clone(),
        };

        let mut last_error = None;
        let mut delay = Duration::from_secs(1);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(8));
            }

            let mut req = self.client.post(&self.config.url).json(&request);

            if let Some(ref api_key) = self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: ChatCompletionResponse = response.json().await?;
                        if let Some(choice) = body.choices.first() {
                            return Ok(choice.message.content.clone());
                        }
                        return Err(TaskEvalError::ApiError(
                            "No choices in response".to_string(),
                        ));
                    }

                    if status.as_u16() == 429 {
                        last_error = Some(TaskEvalError::RateLimited(delay.as_secs()));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    return Err(TaskEvalError::ApiError(format!(
                        "HTTP {}: {}",
                        status, error_text
                    )));
                }
                Err(e) => {
                    if e.is_timeout() {
                        last_error = Some(TaskEvalError::Timeout(self.config.timeout_seconds));
                        continue;
                    }
                    last_error = Some(TaskEvalError::HttpError(e));
                }
            }
        }

        Err(TaskEvalError::MaxRetriesExceeded(
            self.config.max_retries,
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }
}

/// Compute SHA256 hash of dataset rows for reproducibility
pub fn compute_dataset_hash(rows: &[GoldRow]) -> String {
    let mut hasher = Sha256::new();

    for row in rows {
        hasher.update(row.text.as_bytes());
        if let Some(ref label) = row.label {
            hasher.update(label.as_bytes());
        }
        if let Some(ref gold_task) = row.gold_task {
            hasher.update(gold_task.as_bytes());
        }
    }

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_config_from_model_args() {
        let config =
            APIConfig::from_model_args("model=gpt-4,base_url=http://localhost:8000/v1,seed=123")
                .unwrap();

        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.url, "http://localhost:8000/v1/chat/completions");
        assert_eq!(config.seed, 123);
    }

    #[test]
    fn test_api_config_missing_model() {
        let result = APIConfig::from_model_args("base_url=http://localhost:8000/v1");
        assert!(matches!(result, Err(TaskEvalError::MissingField(_))));
    }

    #[test]
    fn test_api_config_ignores_unknown_keys() {
        let config = APIConfig::from_model_args(
            "model=m,base_url=http://localhost:8000/v1,num_concurrent=8",
        )
        .unwrap();
        assert_eq!(config.model, "m");
    }

    #[test]
    fn test_gen_kwargs_from_str() {
        let kwargs = GenKwargs::from_str("temperature=0.7,max_tokens=100").unwrap();
        assert_eq!(kwargs.temperature, Some(0.7));
        assert_eq!(kwargs.max_tokens, Some(100));
    }

    #[test]
    fn test_gen_kwargs_extra_values() {
        let kwargs = GenKwargs::from_str("presence_penalty=0.5,stop_token=END").unwrap();
        assert_eq!(
            kwargs.extra.get("presence_penalty"),
            Some(&serde_json::json!(0.5))
        );
        assert_eq!(
            kwargs.extra.get("stop_token"),
            Some(&serde_json::json!("END"))
        );
    }

    #[test]
    fn test_prediction_default() {
        let pred = Prediction::default();
        assert!(!pred.is_task);
        assert_eq!(pred.confidence, 0.0);
        assert_eq!(pred.task, "");
    }

    #[test]
    fn test_compute_dataset_hash_deterministic() {
        let rows = vec![
            GoldRow {
                text: "Buy milk".to_string(),
                label: Some("1".to_string()),
                gold_task: Some("Buy milk".to_string()),
            },
            GoldRow {
                text: "lol".to_string(),
                label: Some("0".to_string()),
                gold_task: None,
            },
        ];

        let hash1 = compute_dataset_hash(&rows);
        let hash2 = compute_dataset_hash(&rows);

        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_compute_dataset_hash_changes_with_content() {
        let rows1 = vec![GoldRow {
            text: "Buy milk".to_string(),
            label: Some("1".to_string()),
            gold_task: None,
        }];
        let rows2 = vec![GoldRow {
            text: "Buy eggs".to_string(),
            label: Some("1".to_string()),
            gold_task: None,
        }];

        assert_ne!(compute_dataset_hash(&rows1), compute_dataset_hash(&rows2));
    }
}

//! LLM client: provider wire formats plus the bounded-concurrency
//! dispatcher used by every pipeline phase.
//!
//! A shared semaphore caps in-flight calls, each call carries a per-call
//! timeout, and transient failures (timeout, 429, 5xx, transport) are
//! retried with exponential backoff. Non-transient failures surface
//! immediately. Every call is tagged with a phase name so the metrics
//! accumulator can report per-phase counts.

use crate::config::{LlmConfig, Provider};
use crate::error::{Result, TreeIndexError};
use crate::llm::Prompts;
use crate::metrics::Metrics;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Message role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// OpenAI-compatible wire format.

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// Anthropic messages wire format.

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Parsed completion with usage accounting.
struct Completion {
    content: String,
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Shared LLM client with bounded concurrency.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
    semaphore: Arc<Semaphore>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

impl LlmClient {
    /// Create a client; the semaphore width comes from the config.
    pub fn new(config: LlmConfig, metrics: Arc<Metrics>, cancel: CancellationToken) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            http: Client::new(),
            config,
            semaphore,
            metrics,
            cancel,
        }
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Width of the shared in-flight-call semaphore.
    pub fn max_concurrency(&self) -> usize {
        self.config.max_concurrency
    }

    /// Override the model (used when options carry an explicit model).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Complete a prompt, returning raw text.
    ///
    /// Acquires the shared semaphore for the whole retry sequence so the
    /// in-flight cap holds regardless of retries.
    pub async fn complete(
        &self,
        phase: &str,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| TreeIndexError::Cancelled(phase.to_string()))?;

        let mut last_err: Option<TreeIndexError> = None;

        for attempt in 0..=self.config.max_retries {
            if self.cancel.is_cancelled() {
                return Err(TreeIndexError::Cancelled(phase.to_string()));
            }

            if attempt > 0 {
                let backoff = self.config.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    phase,
                    attempt,
                    max = self.config.max_retries,
                    backoff_ms = backoff,
                    "retrying LLM call"
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.dispatch_once(phase, system, prompt).await {
                Ok(completion) => {
                    self.metrics.record_call(
                        phase,
                        completion.prompt_tokens,
                        completion.completion_tokens,
                    );
                    return Ok(completion.content);
                }
                Err(e) if e.is_transient() => {
                    debug!(phase, error = %e, "transient LLM failure");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| TreeIndexError::LlmApi {
            phase: phase.to_string(),
            status: 0,
            message: "retries exhausted".to_string(),
        }))
    }

    /// Complete a prompt and parse the response as JSON.
    ///
    /// Guarantees the prompt carries the literal token "json", strictly
    /// parses the reply, and re-prompts once with a sharpened instruction
    /// before surfacing a parse error.
    pub async fn complete_json(
        &self,
        phase: &str,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<serde_json::Value> {
        let prompt = ensure_json_token(prompt);

        let first = self.complete(phase, system, &prompt).await?;
        match parse_json_response(&first) {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(phase, error = %e, "JSON parse failed; re-prompting once");
            }
        }

        let retry_prompt = format!("{}{}", prompt, Prompts::json_retry_suffix());
        let second = self.complete(phase, system, &retry_prompt).await?;
        parse_json_response(&second).map_err(|e| {
            TreeIndexError::parse(
                phase,
                format!("{} (response head: {})", e, truncate(&second, 200)),
            )
        })
    }

    /// Test connectivity to the API.
    pub async fn test_connection(&self) -> Result<()> {
        let response = self
            .complete("connectivity", None, "Say 'hello' and nothing else.")
            .await?;

        if response.to_lowercase().contains("hello") {
            Ok(())
        } else {
            Err(TreeIndexError::LlmApi {
                phase: "connectivity".to_string(),
                status: 0,
                message: format!("Unexpected response: {}", truncate(&response, 120)),
            })
        }
    }

    /// One provider round trip with timeout and cancellation.
    async fn dispatch_once(
        &self,
        phase: &str,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<Completion> {
        let request = self.send_request(phase, system, prompt);
        let deadline = Duration::from_secs(self.config.timeout_secs);

        tokio::select! {
            _ = self.cancel.cancelled() => Err(TreeIndexError::Cancelled(phase.to_string())),
            outcome = timeout(deadline, request) => match outcome {
                Ok(result) => result,
                Err(_) => Err(TreeIndexError::LlmTimeout {
                    phase: phase.to_string(),
                    seconds: self.config.timeout_secs,
                }),
            },
        }
    }

    async fn send_request(
        &self,
        phase: &str,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<Completion> {
        match self.config.provider {
            Provider::OpenAi => self.send_openai(phase, system, prompt).await,
            Provider::Anthropic => self.send_anthropic(phase, system, prompt).await,
        }
    }

    async fn send_openai(
        &self,
        phase: &str,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<Completion> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(Message::system(sys));
        }
        messages.push(Message::user(prompt));

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        };

        let base = self.config.api_base.trim_end_matches('/');
        let response = self
            .http
            .post(format!("{}/v1/chat/completions", base))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| TreeIndexError::Http {
                phase: phase.to_string(),
                source: e,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| TreeIndexError::Http {
            phase: phase.to_string(),
            source: e,
        })?;

        if !status.is_success() {
            return Err(TreeIndexError::LlmApi {
                phase: phase.to_string(),
                status: status.as_u16(),
                message: truncate(&body, 300),
            });
        }

        let completion: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| TreeIndexError::parse(phase, e.to_string()))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TreeIndexError::parse(phase, "no choices in response"))?;

        let (prompt_tokens, completion_tokens) = completion
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            content: choice.message.content,
            prompt_tokens,
            completion_tokens,
        })
    }

    async fn send_anthropic(
        &self,
        phase: &str,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<Completion> {
        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: system.map(|s| s.to_string()),
            temperature: Some(self.config.temperature),
            messages: vec![Message::user(prompt)],
        };

        let base = self.config.api_base.trim_end_matches('/');
        let response = self
            .http
            .post(format!("{}/v1/messages", base))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| TreeIndexError::Http {
                phase: phase.to_string(),
                source: e,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| TreeIndexError::Http {
            phase: phase.to_string(),
            source: e,
        })?;

        if !status.is_success() {
            return Err(TreeIndexError::LlmApi {
                phase: phase.to_string(),
                status: status.as_u16(),
                message: truncate(&body, 300),
            });
        }

        let completion: AnthropicResponse =
            serde_json::from_str(&body).map_err(|e| TreeIndexError::parse(phase, e.to_string()))?;

        let content = completion
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        let (prompt_tokens, completion_tokens) = completion
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        Ok(Completion {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }
}

/// Append a JSON reminder when the prompt lacks the literal token.
///
/// Some providers reject JSON-mode requests whose prompt never says
/// "json"; every catalogue prompt already does, this is the belt for
/// caller-built prompts.
fn ensure_json_token(prompt: &str) -> String {
    if prompt.to_lowercase().contains("json") {
        prompt.to_string()
    } else {
        format!("{}\n\nRespond with valid json only.", prompt)
    }
}

/// Strictly parse a model reply as JSON after unwrapping fences/noise.
fn parse_json_response(response: &str) -> std::result::Result<serde_json::Value, String> {
    let candidate = extract_json(response);
    serde_json::from_str(&candidate).map_err(|e| e.to_string())
}

/// Extract JSON from a potentially markdown-wrapped response.
pub fn extract_json(response: &str) -> String {
    let response = response.trim();

    if response.starts_with("```json") {
        if let Some(end) = response.rfind("```") {
            let start = "```json".len();
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    if response.starts_with("```") {
        if let Some(end) = response.rfind("```") {
            let start = response.find('\n').map(|n| n + 1).unwrap_or(3);
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    if let Some(start) = response.find('[') {
        if let Some(end) = response.rfind(']') {
            if end > start {
                // Prefer the array unless an object opens first.
                let obj_start = response.find('{');
                if obj_start.is_none() || obj_start.unwrap() > start {
                    return response[start..=end].to_string();
                }
            }
        }
    }

    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end > start {
                return response[start..=end].to_string();
            }
        }
    }

    response.to_string()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain_array() {
        let response = r#"[{"title": "Test"}]"#;
        assert_eq!(extract_json(response), r#"[{"title": "Test"}]"#);
    }

    #[test]
    fn test_extract_json_markdown_fence() {
        let response = "```json\n[{\"title\": \"Test\"}]\n```";
        assert_eq!(extract_json(response), r#"[{"title": "Test"}]"#);
    }

    #[test]
    fn test_extract_json_surrounded_by_text() {
        let response = "Here's the structure:\n[{\"title\": \"Test\"}]\nThat's the result.";
        assert_eq!(extract_json(response), r#"[{"title": "Test"}]"#);
    }

    #[test]
    fn test_extract_json_object_before_array() {
        let response = r#"{"items": [1, 2, 3]}"#;
        assert_eq!(extract_json(response), r#"{"items": [1, 2, 3]}"#);
    }

    #[test]
    fn test_ensure_json_token() {
        assert!(ensure_json_token("list the headings").contains("json"));
        let already = "reply in JSON format";
        assert_eq!(ensure_json_token(already), already);
    }

    #[test]
    fn test_parse_json_response_rejects_prose() {
        assert!(parse_json_response("I could not find any headings.").is_err());
        assert!(parse_json_response(r#"{"answer": "yes"}"#).is_ok());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "héllo wörld";
        let t = truncate(s, 3);
        assert!(t.ends_with('…'));
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::error::UpstreamError;
use crate::types::Message;

/// Sampling knobs for one class of completion call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompletionProfile {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionProfile {
    pub const CHAT: CompletionProfile = CompletionProfile {
        temperature: 0.7,
        max_tokens: 150,
    };
    pub const ANALYSIS: CompletionProfile = CompletionProfile {
        temperature: 0.3,
        max_tokens: 500,
    };
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub profile: CompletionProfile,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, UpstreamError>;

    fn is_configured(&self) -> bool {
        true
    }
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    async fn send(&self, api_key: &str, request: &CompletionRequest) -> Result<String, UpstreamError> {
        let messages = request
            .messages
            .iter()
            .map(Message::for_prompt)
            .collect::<Vec<_>>();
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "model": request.model,
                "messages": messages,
                "max_tokens": request.profile.max_tokens,
                "temperature": request.profile.temperature,
            }))
            .send()
            .await
            .map_err(|err| UpstreamError::Other(format!("openai request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| UpstreamError::Other(format!("openai parse failed: {err}")))?;
        extract_content(&payload)
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, UpstreamError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(UpstreamError::InvalidCredentials(
                "OPENAI_API_KEY not configured".to_string(),
            ));
        };

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            max_tokens = request.profile.max_tokens,
            "requesting completion"
        );
        match tokio::time::timeout(self.timeout, self.send(api_key, &request)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.timeout.as_secs())),
        }
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Maps a non-2xx response onto the upstream taxonomy. The OpenAI error
/// `code` wins over the HTTP status when both are present.
fn classify_failure(status: StatusCode, body: &str) -> UpstreamError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let code = error
        .and_then(|e| e.get("code").or_else(|| e.get("type")))
        .and_then(Value::as_str)
        .unwrap_or("");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("openai returned {status}: {body}"));

    match code {
        "insufficient_quota" => UpstreamError::QuotaExceeded(message),
        "invalid_api_key" => UpstreamError::InvalidCredentials(message),
        _ if status == StatusCode::TOO_MANY_REQUESTS => UpstreamError::QuotaExceeded(message),
        _ if status == StatusCode::UNAUTHORIZED => UpstreamError::InvalidCredentials(message),
        _ => UpstreamError::Other(message),
    }
}

fn extract_content(payload: &Value) -> Result<String, UpstreamError> {
    let text = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    if text.is_empty() {
        return Err(UpstreamError::Other(
            "openai response had empty content".to_string(),
        ));
    }
    Ok(text)
}

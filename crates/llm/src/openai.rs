use std::time::Duration;

use async_trait::async_trait;
use railmind_common::{RailmindError, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<WireChoice>,
    model: String,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Client for any OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RailmindError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            http_client,
        })
    }

    fn role_to_string(role: &Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn build_body(&self, request: &LlmRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system_prompt {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: Some(system.clone()),
            });
        }
        for msg in &request.messages {
            messages.push(WireMessage {
                role: Self::role_to_string(&msg.role).to_string(),
                content: Some(msg.content.clone()),
            });
        }
        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}/chat/completions", self.base_url)
        } else {
            format!("{}/v1/chat/completions", self.base_url)
        }
    }
}

/// Maps a non-success HTTP status onto the reasoning-call error taxonomy.
fn status_error(status: StatusCode, retry_after: Option<&str>, body: &str) -> RailmindError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let hint = retry_after
                .map(|secs| format!(", Retry-After: {secs}"))
                .unwrap_or_default();
            RailmindError::RateLimited(format!("HTTP {status}{hint}: {body}"))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            RailmindError::Timeout(format!("HTTP {status}: {body}"))
        }
        _ => RailmindError::Provider(format!("HTTP {status}: {body}")),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = self.endpoint();
        let body = self.build_body(&request);

        let mut http_req = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req.send().await.map_err(|e| {
            if e.is_timeout() {
                RailmindError::Timeout(format!("request to {url} timed out"))
            } else {
                RailmindError::Provider(format!("request to {url} failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after.as_deref(), &body_text));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| RailmindError::InvalidResponse(format!("malformed completion body: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RailmindError::InvalidResponse("no choices in completion".to_string()))?;

        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| RailmindError::InvalidResponse("empty completion content".to_string()))?;

        debug!(
            model = %parsed.model,
            finish_reason = ?choice.finish_reason,
            "Completion received"
        );

        Ok(LlmResponse {
            content,
            model: parsed.model,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    fn client(base: &str) -> OpenAiClient {
        OpenAiClient::new(base, "llama-3.1-8b-instant", Some("gsk-test".to_string()), Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn request_body_matches_chat_completions_format() {
        let request = LlmRequest {
            system_prompt: Some("You analyse delays.".to_string()),
            messages: vec![ChatMessage::user("Train 12627 is 45 minutes late")],
            temperature: Some(0.3),
            max_tokens: Some(1500),
        };

        let body = client("https://api.groq.com/openai").build_body(&request);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "llama-3.1-8b-instant");
        assert_eq!(json["max_tokens"], 1500);
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "Train 12627 is 45 minutes late");
    }

    #[test]
    fn request_body_omits_unset_knobs() {
        let request = LlmRequest {
            messages: vec![ChatMessage::user("Hello")],
            ..Default::default()
        };
        let json = serde_json::to_value(client("http://localhost:11434").build_body(&request)).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert!(json.get("temperature").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn endpoint_handles_base_with_and_without_version() {
        assert_eq!(
            client("http://localhost:11434/").endpoint(),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            client("https://api.openai.com/v1").endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn status_mapping() {
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, Some("7"), "slow down");
        assert!(matches!(err, RailmindError::RateLimited(_)));
        assert!(err.to_string().contains("Retry-After: 7"));

        let err = status_error(StatusCode::GATEWAY_TIMEOUT, None, "");
        assert!(matches!(err, RailmindError::Timeout(_)));

        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, None, "down");
        assert!(matches!(err, RailmindError::Provider(_)));
        assert!(err.is_transient());

        let err = status_error(StatusCode::UNAUTHORIZED, None, "bad key");
        assert!(!err.is_transient());
    }
}

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ProviderAdapter, QueryContext};
use crate::config::{
    AiProviderConfig, DEFAULT_AI_BASE_URL, DEFAULT_AI_CONFIDENCE, DEFAULT_AI_MAX_TOKENS,
    DEFAULT_AI_MODEL, DEFAULT_AI_TEMPERATURE,
};
use crate::errors::{FailureReason, ProviderFailure};
use crate::history::{ConversationTurn, TurnRole};
use crate::types::{ProviderKind, ProviderResult, Query};

const PROVIDER_NAME: &str = "remote-ai";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Debug, PartialEq)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct ChatErrorResponse {
    error: ChatError,
}

#[derive(Deserialize, Debug)]
struct ChatError {
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Generative answers from an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct RemoteAiProvider {
    http_client: Client,
    base_url: String,
    model_name: String,
    max_tokens: u32,
    temperature: f32,
    confidence: u8,
}

impl RemoteAiProvider {
    /// Builds the provider. The credential goes into a default header and is
    /// not kept anywhere else.
    pub fn new(config: &AiProviderConfig, timeout: Duration) -> Result<Self, ProviderFailure> {
        let api_key = config
            .api_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderFailure::transport(PROVIDER_NAME, "API key is required"))?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key.expose()))
            .map_err(|_| ProviderFailure::transport(PROVIDER_NAME, "Invalid API key format"))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderFailure::from_reqwest(PROVIDER_NAME, &e))?;

        Ok(Self {
            http_client,
            base_url: config
                .base_url
                .clone()
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| DEFAULT_AI_BASE_URL.to_string()),
            model_name: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_AI_MAX_TOKENS),
            temperature: config.temperature.unwrap_or(DEFAULT_AI_TEMPERATURE),
            confidence: config.confidence.unwrap_or(DEFAULT_AI_CONFIDENCE),
        })
    }

    fn api_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// History first, then the query as the newest user turn.
fn build_messages<'a>(history: &'a [ConversationTurn], query: &'a Query) -> Vec<ChatMessage<'a>> {
    history
        .iter()
        .map(|turn| ChatMessage {
            role: turn.role.as_str(),
            content: &turn.content,
        })
        .chain(std::iter::once(ChatMessage {
            role: TurnRole::User.as_str(),
            content: query.text(),
        }))
        .collect()
}

/// Maps an unsuccessful HTTP status (and error body) onto a failure reason.
fn classify_status(status: StatusCode, body: &str) -> FailureReason {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::PAYMENT_REQUIRED {
        return FailureReason::Quota;
    }
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return FailureReason::Timeout;
    }
    if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(body) {
        let quota = [err.error.code.as_deref(), err.error.error_type.as_deref()]
            .into_iter()
            .flatten()
            .any(|c| c == "insufficient_quota" || c == "rate_limit_exceeded");
        if quota {
            return FailureReason::Quota;
        }
    }
    FailureReason::Transport
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ChatErrorResponse>(body) {
        Ok(err) => format!("API error {}: {}", status, err.error.message),
        Err(_) => format!("API request failed with status {}", status),
    }
}

#[async_trait]
impl ProviderAdapter for RemoteAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::RemoteAi
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn answer(
        &self,
        query: &Query,
        context: &QueryContext,
    ) -> Result<Vec<ProviderResult>, ProviderFailure> {
        debug!(model = %self.model_name, turns = context.history.len(), "Requesting AI answer");

        let request = ChatRequest {
            model: &self.model_name,
            messages: build_messages(&context.history, query),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .http_client
            .post(self.api_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderFailure::from_reqwest(PROVIDER_NAME, &e))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| ProviderFailure::from_reqwest(PROVIDER_NAME, &e))?;

        if !status.is_success() {
            let reason = classify_status(status, &response_text);
            warn!(status = %status, reason = %reason, "AI provider request failed");
            return Err(ProviderFailure::new(
                PROVIDER_NAME,
                reason,
                error_message(status, &response_text),
            ));
        }

        let chat_response: ChatResponse = serde_json::from_str(&response_text).map_err(|e| {
            ProviderFailure::transport(PROVIDER_NAME, format!("Failed to parse response: {}", e))
        })?;

        if let Some(usage) = &chat_response.usage {
            debug!(
                prompt = usage.prompt_tokens,
                completion = usage.completion_tokens,
                total = usage.total_tokens,
                "AI token usage"
            );
        }

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderFailure::transport(PROVIDER_NAME, "No choices in response"))?;

        if let Some(reason) = choice.finish_reason.as_deref() {
            if reason != "stop" {
                warn!(finish_reason = reason, "AI generation did not finish cleanly");
            }
        }

        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderFailure::transport(PROVIDER_NAME, "Empty completion"))?;

        Ok(vec![ProviderResult::new(
            ProviderKind::RemoteAi,
            PROVIDER_NAME,
            format!("AI answer ({})", context.feature.display_name()),
            content,
            self.confidence,
        )])
    }
}

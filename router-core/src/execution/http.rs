//! OpenAI-compatible HTTP provider adapter
//!
//! Posts `{base}/chat/completions` with the tier's model and prices the
//! reported usage from [`ExecutionConfig::pricing`]. The payload may carry a
//! `messages` array, a `prompt` string, or anything else (sent as JSON text).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::manager::QUALITY_FALLBACK_KEY;
use super::provider::{ProviderAdapter, ProviderError, ProviderRegistry, ProviderResponse};
use crate::config::{ExecutionConfig, ModelPricing};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Adapter for one OpenAI-compatible provider
pub struct HttpAdapter {
    id: String,
    url: String,
    client: reqwest::Client,
    max_tokens: u32,
    pricing: BTreeMap<String, ModelPricing>,
}

impl HttpAdapter {
    pub fn new(
        id: impl Into<String>,
        base_url: &str,
        client: reqwest::Client,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            id: id.into(),
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            client,
            max_tokens: config.max_tokens,
            pricing: config.pricing.clone(),
        }
    }

    /// One adapter per configured endpoint, sharing a single client
    pub fn registry(
        endpoints: &BTreeMap<String, String>,
        config: &ExecutionConfig,
    ) -> Result<ProviderRegistry, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.attempt_timeout())
            .build()
            .map_err(|e| ProviderError::Failed(format!("failed to create HTTP client: {}", e)))?;
        let mut registry = ProviderRegistry::new();
        for (id, base) in endpoints {
            registry.register(Arc::new(Self::new(id.as_str(), base, client.clone(), config)));
        }
        Ok(registry)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn pricing_for(&self, model: &str) -> ModelPricing {
        self.pricing.get(model).copied().unwrap_or_default()
    }
}

#[async_trait]
impl ProviderAdapter for HttpAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, model: &str, payload: &Value) -> Result<ProviderResponse, ProviderError> {
        let request = ChatRequest {
            model,
            messages: messages_from_payload(payload),
            max_tokens: self.max_tokens,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Failed(format!("malformed response: {}", e)))?;
        into_provider_response(chat, self.pricing_for(model))
    }
}

/// Chat messages for a payload, with a system note when it is a quality retry
pub(crate) fn messages_from_payload(payload: &Value) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = payload
        .get("messages")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|m| {
                    Some(ChatMessage::new(
                        m.get("role")?.as_str()?,
                        m.get("content")?.as_str()?,
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    if messages.is_empty() {
        let content = match payload.get("prompt").and_then(Value::as_str) {
            Some(prompt) => prompt.to_string(),
            None => match payload {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        };
        messages.push(ChatMessage::new("user", content));
    }

    if let Some(marker) = payload.get(QUALITY_FALLBACK_KEY) {
        let issues = marker
            .get("issues")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        messages.insert(
            0,
            ChatMessage::new(
                "system",
                format!(
                    "A previous answer failed its quality check ({}). Give a complete answer.",
                    issues
                ),
            ),
        );
    }
    messages
}

pub(crate) fn status_error(status: StatusCode, body: &str) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited
    } else {
        ProviderError::Failed(format!("HTTP {}: {}", status, body.trim()))
    }
}

pub(crate) fn into_provider_response(
    chat: ChatResponse,
    pricing: ModelPricing,
) -> Result<ProviderResponse, ProviderError> {
    let output = chat
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Failed("no choices in response".to_string()))?
        .message
        .content
        .unwrap_or_default();
    let usage = chat.usage.unwrap_or_default();
    let cost = pricing.cost(usage.prompt_tokens, usage.completion_tokens);
    Ok(ProviderResponse::new(output).with_usage(usage.prompt_tokens, usage.completion_tokens, cost))
}

//! Anthropic Messages API adapter, grounded on the teacher's
//! `AnthropicProvider`: system messages move to a separate top-level
//! `system` field rather than the messages array.

use async_trait::async_trait;
use conclave_domain::config::ProviderConfig;
use conclave_domain::error::{Error, Result};
use serde_json::Value;

use crate::traits::{ChatMessage, GenerateRequest, GenerateResponse, ProviderAdapter, Role};
use crate::util::{from_reqwest, resolve_api_key};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeAdapter {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl ClaudeAdapter {
    pub fn from_config(id: impl Into<String>, cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            id: id.into(),
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            default_model: cfg.default_model.clone(),
            client,
            timeout: std::time::Duration::from_millis(cfg.timeout_ms),
        })
    }

    fn build_body(&self, req: &GenerateRequest) -> Value {
        let system: String = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages: Vec<Value> = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                serde_json::json!({
                    "role": if m.role == Role::User { "user" } else { "assistant" },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.default_model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        let url = format!("{}/messages", self.base_url);
        let body = self.build_body(req);

        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| Error::Timeout(format!("{}: generate timed out", self.id)))?
        .map_err(from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("{status}: {body}")));
        }

        let parsed: Value = response.json().await.map_err(from_reqwest)?;
        let content = parsed["content"][0]["text"].as_str().unwrap_or_default().to_string();
        let input_tokens = parsed["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = parsed["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
        let finish_reason = parsed["stop_reason"].as_str().map(str::to_string);
        let model = parsed["model"].as_str().unwrap_or(&self.default_model).to_string();

        Ok(GenerateResponse {
            content,
            input_tokens,
            output_tokens,
            model,
            finish_reason,
        })
    }

    async fn health_check(&self) -> bool {
        let req = GenerateRequest {
            messages: vec![ChatMessage::user("ping")],
            max_tokens: 1,
            temperature: 0.0,
        };
        self.generate(&req).await.is_ok()
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.default_model
    }
}

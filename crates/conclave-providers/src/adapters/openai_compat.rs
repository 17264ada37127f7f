//! OpenAI-compatible chat completions adapter — drives both OpenAI
//! and Groq (same wire format, different default base URL/model),
//! grounded on the teacher's single `openai_compat.rs` driving
//! multiple OpenAI-compatible backends.

use async_trait::async_trait;
use conclave_domain::config::ProviderConfig;
use conclave_domain::error::{Error, Result};
use serde_json::Value;

use crate::traits::{ChatMessage, GenerateRequest, GenerateResponse, ProviderAdapter, Role};
use crate::util::{from_reqwest, resolve_api_key};

pub struct OpenAiCompatAdapter {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl OpenAiCompatAdapter {
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
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            default_model: cfg.default_model.clone(),
            client,
            timeout: std::time::Duration::from_millis(cfg.timeout_ms),
        })
    }

    fn build_body(&self, req: &GenerateRequest) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": role_str(m.role),
                    "content": m.content,
                })
            })
            .collect();
        serde_json::json!({
            "model": self.default_model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        })
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req);

        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
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
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let finish_reason = parsed["choices"][0]["finish_reason"]
            .as_str()
            .map(str::to_string);
        let input_tokens = parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let model = parsed["model"]
            .as_str()
            .unwrap_or(&self.default_model)
            .to_string();

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_body_maps_roles_to_openai_wire_names() {
        let cfg = ProviderConfig {
            provider: "openai".to_string(),
            base_url: None,
            default_model: "gpt-4o-mini".to_string(),
            auth: Some(conclave_domain::config::AuthConfig {
                api_key_env: "CONCLAVE_TEST_OPENAI_KEY".to_string(),
            }),
            timeout_ms: 30_000,
        };
        std::env::set_var("CONCLAVE_TEST_OPENAI_KEY", "sk-test");
        let adapter = OpenAiCompatAdapter::from_config("openai-1", &cfg).unwrap();
        let req = GenerateRequest {
            messages: vec![ChatMessage::system("be terse"), ChatMessage::user("hi")],
            max_tokens: 50,
            temperature: 0.7,
        };
        let body = adapter.build_body(&req);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }
}

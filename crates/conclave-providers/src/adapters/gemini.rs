//! Google Gemini `generateContent` adapter. The wire format nests
//! roles as `user`/`model` and keys text under `parts[].text`.

use async_trait::async_trait;
use conclave_domain::config::ProviderConfig;
use conclave_domain::error::{Error, Result};
use serde_json::Value;

use crate::traits::{ChatMessage, GenerateRequest, GenerateResponse, ProviderAdapter, Role};
use crate::util::{from_reqwest, resolve_api_key};

pub struct GeminiAdapter {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl GeminiAdapter {
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
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            default_model: cfg.default_model.clone(),
            client,
            timeout: std::time::Duration::from_millis(cfg.timeout_ms),
        })
    }

    fn build_body(&self, req: &GenerateRequest) -> Value {
        let system_instruction: String = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let contents: Vec<Value> = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                serde_json::json!({
                    "role": if m.role == Role::User { "user" } else { "model" },
                    "parts": [{ "text": m.content }],
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": req.max_tokens,
                "temperature": req.temperature,
            },
        });
        if !system_instruction.is_empty() {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system_instruction }] });
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.default_model, self.api_key
        );
        let body = self.build_body(req);

        let response = tokio::time::timeout(self.timeout, self.client.post(&url).json(&body).send())
            .await
            .map_err(|_| Error::Timeout(format!("{}: generate timed out", self.id)))?
            .map_err(from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("{status}: {body}")));
        }

        let parsed: Value = response.json().await.map_err(from_reqwest)?;
        let content = parsed["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let input_tokens = parsed["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32;
        let output_tokens = parsed["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0) as u32;
        let finish_reason = parsed["candidates"][0]["finishReason"].as_str().map(str::to_string);

        Ok(GenerateResponse {
            content,
            input_tokens,
            output_tokens,
            model: self.default_model.clone(),
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
    fn build_body_nests_system_instruction_and_maps_roles() {
        std::env::set_var("CONCLAVE_TEST_GEMINI_KEY", "test-key");
        let cfg = ProviderConfig {
            provider: "gemini".to_string(),
            base_url: None,
            default_model: "gemini-1.5-pro".to_string(),
            auth: Some(conclave_domain::config::AuthConfig {
                api_key_env: "CONCLAVE_TEST_GEMINI_KEY".to_string(),
            }),
            timeout_ms: 30_000,
        };
        let adapter = GeminiAdapter::from_config("gemini-1", &cfg).unwrap();
        let req = GenerateRequest {
            messages: vec![ChatMessage::system("be terse"), ChatMessage::assistant("ok"), ChatMessage::user("hi")],
            max_tokens: 50,
            temperature: 0.7,
        };
        let body = adapter.build_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"][0]["role"], "model");
        assert_eq!(body["contents"][1]["role"], "user");
    }
}

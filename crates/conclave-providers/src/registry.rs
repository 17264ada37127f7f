//! Adapter registry keyed by `(provider, api_key_handle, model)`.
//!
//! Adapters are constructed once at startup from `ProviderConfig`
//! entries and shared read-only afterward — matching the teacher's
//! per-call-stateless/shared-safely registry design.

use std::collections::HashMap;
use std::sync::Arc;

use conclave_domain::config::ProviderConfig;
use conclave_domain::error::{Error, Result};

use crate::adapters::claude::ClaudeAdapter;
use crate::adapters::gemini::GeminiAdapter;
use crate::adapters::openai_compat::OpenAiCompatAdapter;
use crate::traits::ProviderAdapter;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    pub provider: String,
    pub api_key_handle: String,
    pub model: String,
}

#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<RegistryKey, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one adapter per `ProviderConfig` entry, keyed by its own
    /// auth env var as the `api_key_handle` (this system never sees
    /// the raw key — only the handle that names where it lives).
    pub fn from_configs(configs: &[ProviderConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for cfg in configs {
            let handle = cfg
                .auth
                .as_ref()
                .map(|a| a.api_key_env.clone())
                .unwrap_or_else(|| "none".to_string());
            let id = format!("{}:{}", cfg.provider, cfg.default_model);
            let adapter = build_adapter(&id, cfg)?;
            registry.insert(
                RegistryKey {
                    provider: cfg.provider.clone(),
                    api_key_handle: handle,
                    model: cfg.default_model.clone(),
                },
                adapter,
            );
        }
        Ok(registry)
    }

    pub fn insert(&mut self, key: RegistryKey, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(key, adapter);
    }

    pub fn get(&self, key: &RegistryKey) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(key).cloned()
    }

    pub fn get_by_provider_and_model(
        &self,
        provider: &str,
        model: &str,
    ) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters
            .iter()
            .find(|(k, _)| k.provider == provider && k.model == model)
            .map(|(_, v)| v.clone())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

fn build_adapter(id: &str, cfg: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>> {
    match cfg.provider.as_str() {
        "claude" => Ok(Arc::new(ClaudeAdapter::from_config(id, cfg)?)),
        "openai" | "groq" => Ok(Arc::new(OpenAiCompatAdapter::from_config(id, cfg)?)),
        "gemini" => Ok(Arc::new(GeminiAdapter::from_config(id, cfg)?)),
        "mock" => Ok(Arc::new(
            crate::adapters::mock::MockAdapter::new(id.to_string(), vec![], vec![]),
        )),
        other => Err(Error::Config(format!("unknown provider: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_domain::config::AuthConfig;

    fn mock_config() -> ProviderConfig {
        ProviderConfig {
            provider: "mock".to_string(),
            base_url: None,
            default_model: "mock-1".to_string(),
            auth: None,
            timeout_ms: 1000,
        }
    }

    #[test]
    fn from_configs_builds_one_adapter_per_entry() {
        let registry = ProviderRegistry::from_configs(&[mock_config()]).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let cfg = ProviderConfig {
            provider: "carrier-pigeon".to_string(),
            ..mock_config()
        };
        assert!(ProviderRegistry::from_configs(&[cfg]).is_err());
    }

    #[test]
    fn get_by_provider_and_model_finds_registered_adapter() {
        let registry = ProviderRegistry::from_configs(&[mock_config()]).unwrap();
        let found = registry.get_by_provider_and_model("mock", "mock-1");
        assert!(found.is_some());
        assert_eq!(found.unwrap().provider_id(), "mock:mock-1");
    }

    #[test]
    fn claude_provider_without_auth_errors() {
        let cfg = ProviderConfig {
            provider: "claude".to_string(),
            auth: None,
            ..mock_config()
        };
        assert!(ProviderRegistry::from_configs(&[cfg]).is_err());
    }

    #[test]
    fn claude_provider_with_auth_registers() {
        std::env::set_var("CONCLAVE_TEST_REGISTRY_CLAUDE_KEY", "sk-ant-test");
        let cfg = ProviderConfig {
            provider: "claude".to_string(),
            auth: Some(AuthConfig {
                api_key_env: "CONCLAVE_TEST_REGISTRY_CLAUDE_KEY".to_string(),
            }),
            ..mock_config()
        };
        let registry = ProviderRegistry::from_configs(&[cfg]).unwrap();
        assert_eq!(registry.len(), 1);
    }
}

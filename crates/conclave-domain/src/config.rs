//! Typed configuration, loaded from TOML and validated once at
//! startup (teacher convention: `Config::validate() -> Vec<ConfigError>`
//! rather than failing fast on the first bad field, so `config
//! validate` can report everything wrong in one pass).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub path: String,
    pub message: String,
    pub severity: ConfigSeverity,
}

impl ConfigError {
    fn error(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
            severity: ConfigSeverity::Error,
        }
    }

    fn warning(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
            severity: ConfigSeverity::Warning,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.path, self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bidding engine config (spec §4.B)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BiddingConfig {
    pub weight_relevance: f64,
    pub weight_confidence: f64,
    pub weight_novelty: f64,
    pub weight_urgency: f64,
    pub recency_penalty_weight: f64,
    pub cooldown_turns: u32,
    pub participation_balance_weight: f64,
    pub max_consecutive_turns: u32,
    pub deferral_bonus: f64,
    pub bid_collection_ms: u64,
    pub min_bids_required: u32,
}

impl Default for BiddingConfig {
    fn default() -> Self {
        Self {
            weight_relevance: 0.35,
            weight_confidence: 0.25,
            weight_novelty: 0.20,
            weight_urgency: 0.20,
            recency_penalty_weight: 0.15,
            cooldown_turns: 3,
            participation_balance_weight: 0.10,
            max_consecutive_turns: 2,
            deferral_bonus: 0.1,
            bid_collection_ms: 1000,
            min_bids_required: 1,
        }
    }
}

impl BiddingConfig {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let weight_sum = self.weight_relevance
            + self.weight_confidence
            + self.weight_novelty
            + self.weight_urgency;
        if (weight_sum - 1.0).abs() > 1e-6 {
            errors.push(ConfigError::error(
                "bidding.weights",
                format!("relevance+confidence+novelty+urgency must sum to 1.0, got {weight_sum}"),
            ));
        }
        if self.cooldown_turns == 0 {
            errors.push(ConfigError::error(
                "bidding.cooldown_turns",
                "must be at least 1",
            ));
        }
        if self.min_bids_required == 0 {
            errors.push(ConfigError::warning(
                "bidding.min_bids_required",
                "0 means a turn can proceed with zero bids collected",
            ));
        }
        if self.bid_collection_ms == 0 {
            errors.push(ConfigError::error(
                "bidding.bid_collection_ms",
                "must be greater than 0",
            ));
        }
        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context manager config (spec §4.C)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    pub max_summary_tokens: u32,
    pub summarize_every_n_turns: u32,
    pub max_recent_turns: usize,
    pub max_key_point_length: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_summary_tokens: 500,
            summarize_every_n_turns: 5,
            max_recent_turns: 5,
            max_key_point_length: 200,
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.summarize_every_n_turns == 0 {
            errors.push(ConfigError::error(
                "context.summarize_every_n_turns",
                "must be at least 1",
            ));
        }
        if self.max_recent_turns == 0 {
            errors.push(ConfigError::warning(
                "context.max_recent_turns",
                "0 means no recent-turn window is kept",
            ));
        }
        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// End-condition config (spec §4.D step 8)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndConditionConfig {
    pub natural_conclusion_phrases: Vec<String>,
    pub max_total_tokens: Option<u64>,
}

impl Default for EndConditionConfig {
    fn default() -> Self {
        Self {
            natural_conclusion_phrases: vec![
                "goodbye for now".to_string(),
                "let's wrap up".to_string(),
                "that concludes our discussion".to_string(),
            ],
            max_total_tokens: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider config (spec §4.A / §6 Provider interface)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider: String,
    pub base_url: Option<String>,
    pub default_model: String,
    pub auth: Option<AuthConfig>,
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            base_url: None,
            default_model: "mock-1".to_string(),
            auth: None,
            timeout_ms: 30_000,
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self, index: usize) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let path = format!("providers[{index}]");
        if self.provider.is_empty() {
            errors.push(ConfigError::error(&path, "provider name must not be empty"));
        }
        if self.timeout_ms == 0 {
            errors.push(ConfigError::error(
                &format!("{path}.timeout_ms"),
                "must be greater than 0",
            ));
        }
        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Push / delivery config (spec §4.F / §6 Push notifications)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub team_id: String,
    pub key_id: String,
    /// Name of the environment variable holding the PEM-encoded ES256 key.
    pub private_key_env: String,
    pub topic: String,
    pub max_concurrent_dispatches: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            team_id: String::new(),
            key_id: String::new(),
            private_key_env: "CONCLAVE_PUSH_PRIVATE_KEY".to_string(),
            topic: String::new(),
            max_concurrent_dispatches: 10,
        }
    }
}

impl PushConfig {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.enabled {
            if self.endpoint.is_empty() {
                errors.push(ConfigError::error("push.endpoint", "required when push is enabled"));
            }
            if self.team_id.is_empty() || self.key_id.is_empty() {
                errors.push(ConfigError::error(
                    "push",
                    "team_id and key_id are required when push is enabled",
                ));
            }
        }
        if self.max_concurrent_dispatches == 0 {
            errors.push(ConfigError::error(
                "push.max_concurrent_dispatches",
                "must be at least 1",
            ));
        }
        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server config (spec §6 "Configuration inputs")
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Opaque connection string for `ConversationStore`; `"memory"`
    /// selects the bundled in-memory implementation.
    pub store_dsn: String,
    pub response_timeout_ms: u64,
    pub ticket_ttl_ms: u64,
    pub session_idle_timeout_secs: u64,
    pub allowed_origins: Vec<String>,
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            store_dsn: "memory".to_string(),
            response_timeout_ms: 30_000,
            ticket_ttl_ms: 30_000,
            session_idle_timeout_secs: 90,
            allowed_origins: Vec::new(),
            max_concurrent_requests: 256,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.port == 0 {
            errors.push(ConfigError::error("server.port", "must be nonzero"));
        }
        if self.store_dsn.is_empty() {
            errors.push(ConfigError::error("server.store_dsn", "must not be empty"));
        }
        if self.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must be at least 1",
            ));
        }
        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub bidding: BiddingConfig,
    pub context: ContextConfig,
    pub end_conditions: EndConditionConfig,
    pub push: PushConfig,
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> crate::error::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::error::Error::Config(e.to_string()))
    }

    /// Validate every sub-config; never panics, returns every finding
    /// in one pass so `conclave config validate` can print them all.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.bidding.validate());
        errors.extend(self.context.validate());
        errors.extend(self.push.validate());
        if self.providers.is_empty() {
            errors.push(ConfigError::warning(
                "providers",
                "no providers configured; only the Mock adapter will be available",
            ));
        }
        for (i, provider) in self.providers.iter().enumerate() {
            errors.extend(provider.validate(i));
        }
        errors
    }

    pub fn has_fatal_errors(errors: &[ConfigError]) -> bool {
        errors.iter().any(|e| e.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bidding_config_weights_sum_to_one() {
        assert!(BiddingConfig::default().validate().is_empty());
    }

    #[test]
    fn bidding_config_rejects_bad_weight_sum() {
        let cfg = BiddingConfig {
            weight_relevance: 0.5,
            ..BiddingConfig::default()
        };
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.path == "bidding.weights"));
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let raw = toml::to_string(&cfg).expect("serialize");
        let parsed = Config::from_toml_str(&raw).expect("parse");
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn empty_providers_is_a_warning_not_an_error() {
        let cfg = Config::default();
        let errors = cfg.validate();
        assert!(!Config::has_fatal_errors(&errors));
    }

    #[test]
    fn server_config_rejects_zero_port() {
        let cfg = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        assert!(Config::has_fatal_errors(&cfg.validate()));
    }
}

//! Shared utility functions for provider adapters.

use conclave_domain::config::AuthConfig;
use conclave_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Transport(e.to_string())
    }
}

/// Resolve the API key from an [`AuthConfig`] via its named env var.
pub fn resolve_api_key(auth: &Option<AuthConfig>) -> Result<String> {
    let auth = auth
        .as_ref()
        .ok_or_else(|| Error::Auth("no auth configured for this provider".to_string()))?;
    std::env::var(&auth.api_key_env).map_err(|_| {
        Error::Auth(format!(
            "environment variable '{}' not set or not valid UTF-8",
            auth.api_key_env
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_reads_named_env_var() {
        std::env::set_var("CONCLAVE_TEST_KEY_1", "secret-value");
        let auth = Some(AuthConfig {
            api_key_env: "CONCLAVE_TEST_KEY_1".to_string(),
        });
        assert_eq!(resolve_api_key(&auth).unwrap(), "secret-value");
    }

    #[test]
    fn resolve_api_key_errors_when_unset() {
        let auth = Some(AuthConfig {
            api_key_env: "CONCLAVE_TEST_KEY_DOES_NOT_EXIST".to_string(),
        });
        assert!(resolve_api_key(&auth).is_err());
    }

    #[test]
    fn resolve_api_key_errors_when_no_auth_configured() {
        assert!(resolve_api_key(&None).is_err());
    }
}

/// Shared error type used across all Conclave crates.
///
/// Variants map to the error taxonomy in the orchestration spec: each
/// kind carries its own recovery policy, decided by the caller (the
/// orchestrator for turn-level errors, axum handlers for request-level
/// ones) rather than by this type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("upstream provider error: {0}")]
    Upstream(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("no valid bids: {0}")]
    NoValidBids(String),

    #[error("token budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("circuit open for {provider}: {reason}")]
    CircuitOpen { provider: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("config: {0}")]
    Config(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

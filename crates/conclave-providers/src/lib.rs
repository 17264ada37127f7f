//! Uniform interface over heterogeneous LLM backends: generates turn
//! responses and bid scores behind one trait, plus a registry that
//! builds and caches adapter instances from `ProviderConfig` entries.

pub mod adapters;
pub mod registry;
pub mod traits;
pub mod util;

pub use registry::{ProviderRegistry, RegistryKey};
pub use traits::{
    ChatMessage, GenerateRequest, GenerateResponse, ProviderAdapter, Role, FALLBACK_BID_SCORES,
};

pub use adapters::mock::MockAdapter;
pub use adapters::openai_compat::OpenAiCompatAdapter;

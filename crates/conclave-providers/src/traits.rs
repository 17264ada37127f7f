//! The `ProviderAdapter` trait and the provider-agnostic request/
//! response types every adapter speaks.

use async_trait::async_trait;
use conclave_domain::error::Result;
use conclave_domain::model::BidScores;

/// A message role in a `generate` request — alternating user/assistant
/// turns, with an optional leading system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Fallback bid returned by `generate_bid` when the model's response
/// can't be parsed as a balanced JSON object of four numeric fields.
pub const FALLBACK_BID_SCORES: BidScores = BidScores {
    relevance: 0.1,
    confidence: 0.1,
    novelty: 0.1,
    urgency: 0.0,
};

const BID_SYSTEM_PROMPT: &str = "You are scoring whether you should speak next in a \
multi-agent conversation. Reply with ONLY a JSON object of the form \
{\"relevance\": <0-1>, \"confidence\": <0-1>, \"novelty\": <0-1>, \"urgency\": <0-1>}. \
No other text.";

/// Recommended bid-generation temperature — lower than turn generation
/// to stabilize scoring (spec suggests 0.3 vs 0.7).
pub const BID_TEMPERATURE: f32 = 0.3;

/// Trait every LLM adapter implements. Implementations are stateless
/// per call and safe to share across conversations.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Send a generation request and wait for the full response.
    /// Fails with `Error::Upstream` on HTTP >= 400 or transport
    /// failure, `Error::Timeout` if the adapter's configured timeout
    /// elapses first.
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse>;

    /// Ask the model to self-report bid scores for the given rendered
    /// context. Never fails on malformed model output — falls back to
    /// `FALLBACK_BID_SCORES` instead, per spec §4.A.
    async fn generate_bid(&self, context: &str) -> Result<BidScores> {
        let req = GenerateRequest {
            messages: vec![
                ChatMessage::system(BID_SYSTEM_PROMPT),
                ChatMessage::user(context),
            ],
            max_tokens: 200,
            temperature: BID_TEMPERATURE,
        };
        match self.generate(&req).await {
            Ok(resp) => Ok(extract_bid_scores(&resp.content)),
            Err(err) => {
                tracing::warn!(provider = self.provider_id(), error = %err, "bid generation failed, using fallback scores");
                Ok(FALLBACK_BID_SCORES)
            }
        }
    }

    /// Send a minimal probe request; reports success/failure without
    /// raising.
    async fn health_check(&self) -> bool;

    /// Stable identifier for this adapter instance.
    fn provider_id(&self) -> &str;

    /// The model this adapter is currently configured to call.
    fn model(&self) -> &str;
}

/// Extract the first balanced `{...}` object from `text`, parse the
/// four bid fields as numbers in `[0,1]`, clamp out-of-range values,
/// and fall back to `FALLBACK_BID_SCORES` on any parse failure.
///
/// Grounded on the teacher's defensive streaming tool-call JSON
/// assembly (`runtime::turn::run_turn_inner`): parse-or-default, never
/// propagate the parse error, log a warning on failure.
pub fn extract_bid_scores(text: &str) -> BidScores {
    match find_balanced_json_object(text).and_then(|obj| serde_json::from_str::<RawBid>(obj).ok())
    {
        Some(raw) => BidScores {
            relevance: raw.relevance,
            confidence: raw.confidence,
            novelty: raw.novelty,
            urgency: raw.urgency,
        }
        .clamped(),
        None => {
            tracing::warn!("failed to parse bid scores from model output, using fallback");
            FALLBACK_BID_SCORES
        }
    }
}

#[derive(serde::Deserialize)]
struct RawBid {
    relevance: f64,
    confidence: f64,
    novelty: f64,
    urgency: f64,
}

fn find_balanced_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (i, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bid_scores_parses_clean_json() {
        let scores = extract_bid_scores(
            r#"{"relevance": 0.8, "confidence": 0.6, "novelty": 0.2, "urgency": 0.1}"#,
        );
        assert_eq!(scores.relevance, 0.8);
        assert_eq!(scores.urgency, 0.1);
    }

    #[test]
    fn extract_bid_scores_finds_json_amid_prose() {
        let scores = extract_bid_scores(
            "Sure, here you go: {\"relevance\": 1.0, \"confidence\": 1.0, \"novelty\": 1.0, \"urgency\": 1.0} thanks!",
        );
        assert_eq!(scores.relevance, 1.0);
    }

    #[test]
    fn extract_bid_scores_clamps_out_of_range_values() {
        let scores = extract_bid_scores(
            r#"{"relevance": 1.5, "confidence": -1.0, "novelty": 0.5, "urgency": 2.0}"#,
        );
        assert_eq!(scores.relevance, 1.0);
        assert_eq!(scores.confidence, 0.0);
        assert_eq!(scores.urgency, 1.0);
    }

    #[test]
    fn extract_bid_scores_falls_back_on_malformed_output() {
        let scores = extract_bid_scores("I refuse to answer in JSON.");
        assert_eq!(scores.relevance, FALLBACK_BID_SCORES.relevance);
        assert_eq!(scores.urgency, FALLBACK_BID_SCORES.urgency);
    }

    #[test]
    fn extract_bid_scores_falls_back_on_missing_field() {
        let scores = extract_bid_scores(r#"{"relevance": 0.5}"#);
        assert_eq!(scores.relevance, FALLBACK_BID_SCORES.relevance);
    }
}

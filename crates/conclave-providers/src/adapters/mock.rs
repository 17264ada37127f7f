//! A deterministic test adapter: cycles through fixed responses and/or
//! fixed bid scores, supports a configurable response delay and
//! failure rate, and records a call count.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use conclave_domain::error::{Error, Result};
use conclave_domain::model::BidScores;

use crate::traits::{GenerateRequest, GenerateResponse, ProviderAdapter};

pub struct MockAdapter {
    id: String,
    model: String,
    responses: Vec<String>,
    bid_scores: Vec<BidScores>,
    response_delay_ms: u64,
    failure_rate: f64,
    call_count: AtomicU32,
    bid_call_count: AtomicU32,
    rng_state: Mutex<u64>,
}

impl MockAdapter {
    pub fn new(id: impl Into<String>, responses: Vec<String>, bid_scores: Vec<BidScores>) -> Self {
        Self {
            id: id.into(),
            model: "mock-1".to_string(),
            responses,
            bid_scores,
            response_delay_ms: 0,
            failure_rate: 0.0,
            call_count: AtomicU32::new(0),
            bid_call_count: AtomicU32::new(0),
            rng_state: Mutex::new(0x2545_F491_4F6C_DD1D),
        }
    }

    pub fn with_response_delay_ms(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// xorshift64 — deterministic, no external RNG crate needed for a
    /// fixed-seed test double.
    fn next_unit_interval(&self) -> f64 {
        let mut state = self.rng_state.lock().unwrap();
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        (*state as f64) / (u64::MAX as f64)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    async fn generate(&self, _req: &GenerateRequest) -> Result<GenerateResponse> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) as usize;

        if self.response_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.response_delay_ms)).await;
        }

        if self.failure_rate > 0.0 && self.next_unit_interval() < self.failure_rate {
            return Err(Error::Upstream(format!("{}: simulated failure", self.id)));
        }

        let content = if self.responses.is_empty() {
            String::new()
        } else {
            self.responses[call % self.responses.len()].clone()
        };

        Ok(GenerateResponse {
            input_tokens: 10,
            output_tokens: content.len() as u32 / 4,
            content,
            model: self.model.clone(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn generate_bid(&self, _context: &str) -> Result<BidScores> {
        let call = self.bid_call_count.fetch_add(1, Ordering::SeqCst) as usize;
        if self.bid_scores.is_empty() {
            return Ok(crate::traits::FALLBACK_BID_SCORES);
        }
        Ok(self.bid_scores[call % self.bid_scores.len()])
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }
}

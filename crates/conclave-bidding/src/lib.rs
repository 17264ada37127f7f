//! The sealed-bid auction: scores bids, applies fairness adjustments,
//! and selects a winner for one turn round.
//!
//! `evaluate_bids` is a pure function of its inputs — no I/O, no
//! shared state — so the orchestrator can call it synchronously
//! between suspension points and this crate can be tested without a
//! runtime.

use std::collections::HashMap;

use conclave_domain::config::BiddingConfig;
use conclave_domain::error::{Error, Result};
use conclave_domain::model::{Bid, BidDecision, ParticipantStats};
use rand::seq::SliceRandom;

/// A fixed bonus added to a deferral target's final score, per turn.
pub const DEFERRAL_BONUS: f64 = 0.1;

/// The method by which a tie among equal-scoring candidates was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreaker {
    FewerTurnsTaken,
    Random,
}

impl TieBreaker {
    fn label(self) -> &'static str {
        match self {
            TieBreaker::FewerTurnsTaken => "fewer_turns_taken",
            TieBreaker::Random => "random",
        }
    }
}

/// A `participationBonus − recencyPenalty` pair for one agent, kept
/// for observability/debugging rather than recomputation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FairnessAdjustment {
    pub recency_penalty: f64,
    pub participation_bonus: f64,
}

#[derive(Debug, Clone)]
pub struct BidResult {
    pub winner: String,
    pub final_scores: HashMap<String, f64>,
    pub tie_breaker_used: Option<&'static str>,
    pub fairness_adjustments: HashMap<String, FairnessAdjustment>,
}

/// Everything `evaluate_bids` needs to know about one candidate agent
/// beyond its submitted bid.
#[derive(Debug, Clone)]
pub struct AgentRoundContext {
    pub stats: ParticipantStats,
    /// `true` if this agent holds each of the last `maxConsecutiveTurns`
    /// turns (i.e. is mid-streak and must be excluded this round).
    pub just_finished_max_consecutive_turns: bool,
}

/// Run the 9-step auction described by `BiddingConfig` over the
/// collected `bids` (including explicit passes) for `current_turn`.
///
/// `contexts` must contain an entry for every agent present in
/// `bids`; `num_participants`/`total_turns_taken` feed the
/// participation-balance term.
pub fn evaluate_bids(
    bids: &HashMap<String, Bid>,
    contexts: &HashMap<String, AgentRoundContext>,
    current_turn: u32,
    num_participants: usize,
    total_turns_taken: u32,
    config: &BiddingConfig,
) -> Result<BidResult> {
    let mut base_scores: HashMap<String, f64> = HashMap::new();
    let mut adjustments: HashMap<String, FairnessAdjustment> = HashMap::new();
    let mut final_scores: HashMap<String, f64> = HashMap::new();

    let avg_turns = if num_participants == 0 {
        0.0
    } else {
        total_turns_taken as f64 / num_participants as f64
    };

    for (agent_id, bid) in bids {
        // Step 1: passes never receive a final score.
        if matches!(bid.decision, BidDecision::Pass) {
            continue;
        }
        let Some(ctx) = contexts.get(agent_id) else {
            continue;
        };
        // Step 5: hard consecutive-turn exclusion.
        if ctx.just_finished_max_consecutive_turns {
            continue;
        }

        // Step 2: base score.
        let base = config.weight_relevance * bid.scores.relevance
            + config.weight_confidence * bid.scores.confidence
            + config.weight_novelty * bid.scores.novelty
            + config.weight_urgency * bid.scores.urgency;
        base_scores.insert(agent_id.clone(), base);

        // Step 3: recency penalty.
        let turns_taken = ctx.stats.turns_taken;
        let r = (1.0
            - (current_turn as f64 - turns_taken as f64) / config.cooldown_turns as f64)
            .max(0.0);
        let recency_penalty = r * config.recency_penalty_weight;

        // Step 4: participation bonus.
        let ratio = if avg_turns == 0.0 {
            0.0
        } else {
            turns_taken as f64 / avg_turns
        };
        let participation_bonus = (1.0 - ratio) * config.participation_balance_weight;

        // Step 6: combine.
        let final_score = base - recency_penalty + participation_bonus;
        final_scores.insert(agent_id.clone(), final_score);
        adjustments.insert(
            agent_id.clone(),
            FairnessAdjustment {
                recency_penalty,
                participation_bonus,
            },
        );
    }

    // Step 7: deferrals. Defers from passing agents still count;
    // defers to excluded/passed agents (no entry in final_scores) are
    // ignored.
    for bid in bids.values() {
        if let BidDecision::Defer { target_agent_id } = &bid.decision {
            if let Some(score) = final_scores.get_mut(target_agent_id) {
                *score += DEFERRAL_BONUS;
            }
        }
    }

    // Step 8: pick the winner set, tie-break if needed.
    let Some(&max_score) = final_scores
        .values()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    else {
        // Step 9: empty winner set.
        return Err(Error::NoValidBids(
            "no agent produced a valid bid this round".to_string(),
        ));
    };

    let mut candidates: Vec<&String> = final_scores
        .iter()
        .filter(|(_, &score)| (score - max_score).abs() < 0.001)
        .map(|(agent_id, _)| agent_id)
        .collect();
    candidates.sort();

    let (winner, tie_breaker_used) = if candidates.len() == 1 {
        (candidates[0].clone(), None)
    } else {
        // (a) higher trust/reputation: not tracked by this system, so
        // fall straight to (b).
        let min_turns = candidates
            .iter()
            .filter_map(|id| contexts.get(*id).map(|c| c.stats.turns_taken))
            .min()
            .unwrap_or(0);
        let fewest: Vec<&String> = candidates
            .iter()
            .copied()
            .filter(|id| {
                contexts
                    .get(*id)
                    .map(|c| c.stats.turns_taken == min_turns)
                    .unwrap_or(false)
            })
            .collect();
        if fewest.len() == 1 {
            (fewest[0].clone(), Some(TieBreaker::FewerTurnsTaken.label()))
        } else {
            let chosen = fewest
                .choose(&mut rand::thread_rng())
                .expect("fewest is non-empty when candidates is non-empty");
            ((*chosen).clone(), Some(TieBreaker::Random.label()))
        }
    };

    Ok(BidResult {
        winner,
        final_scores,
        tie_breaker_used,
        fairness_adjustments: adjustments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_domain::model::{BidScores, ParticipantStats};
    use chrono::Utc;

    fn bid(agent_id: &str, scores: BidScores, decision: BidDecision) -> (String, Bid) {
        (
            agent_id.to_string(),
            Bid::new("c1".into(), 5, agent_id.to_string(), scores, decision),
        )
    }

    fn fresh_ctx(turns_taken: u32) -> AgentRoundContext {
        AgentRoundContext {
            stats: ParticipantStats {
                turns_taken,
                tokens_used: 0,
                avg_bid_score: 0.0,
                last_spoke_at: Some(Utc::now()),
            },
            just_finished_max_consecutive_turns: false,
        }
    }

    fn equal_scores(v: f64) -> BidScores {
        BidScores {
            relevance: v,
            confidence: v,
            novelty: v,
            urgency: v,
        }
    }

    #[test]
    fn symmetric_bid_tie_breaks_by_fewer_turns_taken() {
        let config = BiddingConfig::default();
        // Raw scores differ (0.75 vs 0.60) to offset the differing
        // recency/participation adjustments and land on a genuine tie.
        let bids = HashMap::from([
            bid("a1", equal_scores(0.75), BidDecision::Bid),
            bid("a2", equal_scores(0.60), BidDecision::Bid),
        ]);
        let contexts = HashMap::from([
            ("a1".to_string(), fresh_ctx(3)),
            ("a2".to_string(), fresh_ctx(1)),
        ]);
        let result = evaluate_bids(&bids, &contexts, 5, 2, 4, &config).unwrap();
        assert_eq!(result.winner, "a2");
        assert_eq!(result.tie_breaker_used, Some("fewer_turns_taken"));
    }

    #[test]
    fn all_pass_yields_no_valid_bids_error() {
        let config = BiddingConfig::default();
        let bids = HashMap::from([
            bid("a1", equal_scores(0.8), BidDecision::Pass),
            bid("a2", equal_scores(0.8), BidDecision::Pass),
        ]);
        let contexts = HashMap::from([
            ("a1".to_string(), fresh_ctx(0)),
            ("a2".to_string(), fresh_ctx(0)),
        ]);
        let err = evaluate_bids(&bids, &contexts, 1, 2, 0, &config).unwrap_err();
        assert!(matches!(err, Error::NoValidBids(_)));
    }

    #[test]
    fn single_non_pass_wins_even_with_low_score() {
        let config = BiddingConfig::default();
        let bids = HashMap::from([
            bid("a1", equal_scores(0.1), BidDecision::Bid),
            bid("a2", equal_scores(0.9), BidDecision::Pass),
        ]);
        let contexts = HashMap::from([
            ("a1".to_string(), fresh_ctx(0)),
            ("a2".to_string(), fresh_ctx(0)),
        ]);
        let result = evaluate_bids(&bids, &contexts, 1, 2, 0, &config).unwrap();
        assert_eq!(result.winner, "a1");
    }

    #[test]
    fn recency_penalty_suppresses_recent_speaker() {
        let config = BiddingConfig::default();
        // a1 just spoke (turnsTaken close to currentTurn); a2 has been
        // quiet far longer, so a2 should win despite an equal base bid.
        let bids = HashMap::from([
            bid("a1", equal_scores(0.6), BidDecision::Bid),
            bid("a2", equal_scores(0.6), BidDecision::Bid),
        ]);
        let contexts = HashMap::from([
            ("a1".to_string(), fresh_ctx(9)),
            ("a2".to_string(), fresh_ctx(1)),
        ]);
        let result = evaluate_bids(&bids, &contexts, 10, 2, 10, &config).unwrap();
        assert_eq!(result.winner, "a2");
    }

    #[test]
    fn deferral_bonus_can_change_the_winner() {
        let config = BiddingConfig::default();
        let bids = HashMap::from([
            bid("a1", equal_scores(0.5), BidDecision::Bid),
            bid(
                "a2",
                equal_scores(0.0),
                BidDecision::Defer {
                    target_agent_id: "a1".to_string(),
                },
            ),
            bid("a3", equal_scores(0.55), BidDecision::Bid),
        ]);
        let contexts = HashMap::from([
            ("a1".to_string(), fresh_ctx(0)),
            ("a2".to_string(), fresh_ctx(0)),
            ("a3".to_string(), fresh_ctx(0)),
        ]);
        let result = evaluate_bids(&bids, &contexts, 1, 3, 0, &config).unwrap();
        // a1's base score (0.5) plus the deferral bonus (0.1) beats a3 (0.55).
        assert_eq!(result.winner, "a1");
    }

    #[test]
    fn hard_consecutive_turn_exclusion_removes_candidate() {
        let config = BiddingConfig::default();
        let bids = HashMap::from([
            bid("a1", equal_scores(0.9), BidDecision::Bid),
            bid("a2", equal_scores(0.2), BidDecision::Bid),
        ]);
        let mut a1_ctx = fresh_ctx(4);
        a1_ctx.just_finished_max_consecutive_turns = true;
        let contexts = HashMap::from([("a1".to_string(), a1_ctx), ("a2".to_string(), fresh_ctx(0))]);
        let result = evaluate_bids(&bids, &contexts, 5, 2, 4, &config).unwrap();
        assert_eq!(result.winner, "a2");
    }

    #[test]
    fn final_score_matches_weighted_sum_formula() {
        let config = BiddingConfig::default();
        let scores = BidScores {
            relevance: 0.8,
            confidence: 0.6,
            novelty: 0.4,
            urgency: 0.2,
        };
        let bids = HashMap::from([bid("a1", scores, BidDecision::Bid)]);
        let contexts = HashMap::from([("a1".to_string(), fresh_ctx(0))]);
        let result = evaluate_bids(&bids, &contexts, 1, 1, 0, &config).unwrap();
        let expected_base = config.weight_relevance * 0.8
            + config.weight_confidence * 0.6
            + config.weight_novelty * 0.4
            + config.weight_urgency * 0.2;
        let recency = (1.0 - (1.0 - 0.0) / config.cooldown_turns as f64).max(0.0)
            * config.recency_penalty_weight;
        // num_participants=1, total_turns_taken=0 => avg=0 => ratio defined as 0.
        let participation_bonus = (1.0 - 0.0) * config.participation_balance_weight;
        let expected = expected_base - recency + participation_bonus;
        assert!((result.final_scores["a1"] - expected).abs() < 1e-6);
    }
}

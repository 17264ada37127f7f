//! The per-conversation turn-round driver.
//!
//! Grounded on the teacher's `runtime::turn::run_turn`/`run_turn_inner`:
//! one `tokio::spawn`'d task per conversation, a `tracing::info_span!`
//! wrapping the whole run, and the "cleanup on every exit path"
//! discipline (`finalize_turn_stalled`/`finalize_turn_completed` here
//! standing in for the teacher's `handle_cancellation`/
//! `finalize_run_success`).

use std::collections::HashMap;
use std::time::Duration;

use conclave_bidding::{evaluate_bids, AgentRoundContext};
use conclave_context::{create_initial_context, estimate_context_tokens, update_context};
use conclave_domain::config::{BiddingConfig, EndConditionConfig};
use conclave_domain::model::{
    Bid, BidDecision, BidScores, Conversation, ConversationStatus, TurnMessage,
};
use conclave_domain::trace::TraceEvent;
use conclave_providers::{ChatMessage, GenerateRequest};
use futures_util::future::join_all;
use tracing::Instrument;

use crate::state::AppState;

/// Why a conversation run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxTurnsReached,
    TokenBudgetExceeded,
    NaturalConclusion,
    Stalled,
    Cancelled,
}

impl StopReason {
    fn label(self) -> &'static str {
        match self {
            StopReason::MaxTurnsReached => "max_turns_reached",
            StopReason::TokenBudgetExceeded => "token_budget_exceeded",
            StopReason::NaturalConclusion => "natural_conclusion",
            StopReason::Stalled => "stalled",
            StopReason::Cancelled => "cancelled",
        }
    }
}

/// Drive `conversation_id` from `active` to a terminal state, running
/// turn rounds until an end condition or cancellation fires. Spawned as
/// its own task by `POST /conversations/{id}/start`; this function
/// never returns until the conversation is done.
pub async fn run(state: AppState, conversation_id: String) {
    let span = tracing::info_span!("conversation", conversation_id = %conversation_id);
    run_inner(state, conversation_id).instrument(span).await;
}

async fn run_inner(state: AppState, conversation_id: String) {
    let Some(token) = state.control.get(&conversation_id) else {
        tracing::error!("orchestrator started without a registered control token");
        return;
    };

    let mut conversation = match state.store.get(&conversation_id) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(error = %err, "failed to load conversation at orchestrator start");
            return;
        }
    };

    let mut ctx = create_initial_context(
        conversation.conversation_id.clone(),
        conversation.topic.clone(),
        conversation.goal.clone(),
        conversation.participant_ids(),
    );

    loop {
        // Safe point: honor pause/cancel between turn rounds only.
        if token.is_cancelled() {
            finalize(&state, &mut conversation, StopReason::Cancelled);
            return;
        }
        if token.is_paused() {
            conversation.status = ConversationStatus::Paused;
            let _ = state.store.put(conversation.clone());
            tokio::time::sleep(Duration::from_millis(200)).await;
            continue;
        }
        if conversation.status == ConversationStatus::Paused {
            conversation.status = ConversationStatus::Active;
        }

        match run_one_turn_round(&state, &mut conversation, &mut ctx).await {
            Ok(TurnOutcome::Continued) => {}
            Ok(TurnOutcome::Stalled) => {
                finalize(&state, &mut conversation, StopReason::Stalled);
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "turn round failed, treating as stalled");
                finalize(&state, &mut conversation, StopReason::Stalled);
                return;
            }
        }

        if let Some(reason) = check_end_conditions(&conversation, &state.config.end_conditions) {
            finalize(&state, &mut conversation, reason);
            return;
        }

        let _ = state.store.put(conversation.clone());
    }
}

enum TurnOutcome {
    Continued,
    Stalled,
}

/// Run steps 1–7 of one turn round (spec.md §4.D). Step 8 (end
/// conditions) is checked by the caller so it has a uniform place to
/// run regardless of how the round finished.
async fn run_one_turn_round(
    state: &AppState,
    conversation: &mut Conversation,
    ctx: &mut conclave_domain::model::CompactContext,
) -> conclave_domain::Result<TurnOutcome> {
    let turn_number = conversation.current_turn + 1;
    let total_turns_taken: u32 = conversation
        .participants
        .iter()
        .map(|p| p.stats.turns_taken)
        .sum();

    // Step 4 retries once per turn on response timeout/failure.
    for attempt in 0..2 {
        // Step 1+2: build bid context and collect bids concurrently.
        let bid_context = render_bid_context(conversation, ctx);
        let bids = collect_bids(state, conversation, &bid_context, turn_number).await;

        let non_pass = bids
            .values()
            .filter(|b| !matches!(b.decision, BidDecision::Pass))
            .count();
        if non_pass < state.config.bidding.min_bids_required as usize {
            TraceEvent::TurnSkipped {
                conversation_id: conversation.conversation_id.clone(),
                turn_number,
                reason: "not enough non-pass bids".to_string(),
            }
            .emit();
            return Ok(TurnOutcome::Stalled);
        }

        // Step 3: evaluate.
        let contexts = build_round_contexts(conversation, turn_number, &state.config.bidding);
        let bids_by_agent: HashMap<String, Bid> = bids.into_iter().collect();
        let result = match evaluate_bids(
            &bids_by_agent,
            &contexts,
            turn_number,
            conversation.participants.len(),
            total_turns_taken,
            &state.config.bidding,
        ) {
            Ok(r) => r,
            Err(_) => {
                TraceEvent::TurnSkipped {
                    conversation_id: conversation.conversation_id.clone(),
                    turn_number,
                    reason: "no valid bids".to_string(),
                }
                .emit();
                return Ok(TurnOutcome::Stalled);
            }
        };
        TraceEvent::TurnWon {
            conversation_id: conversation.conversation_id.clone(),
            turn_number,
            agent_id: result.winner.clone(),
            final_score: result
                .final_scores
                .get(&result.winner)
                .copied()
                .unwrap_or(0.0),
            tie_break: result.tie_breaker_used.map(str::to_string),
        }
        .emit();

        // Step 4: request the winner's response.
        let Some(participant) = conversation.find_participant(&result.winner).cloned() else {
            return Ok(TurnOutcome::Stalled);
        };
        let Some(agent) = state.agents.get(&participant.agent_id) else {
            return Ok(TurnOutcome::Stalled);
        };
        let Some(adapter) = state
            .providers
            .get_by_provider_and_model(agent.provider.registry_key(), &agent.model_id)
        else {
            return Ok(TurnOutcome::Stalled);
        };

        let request = GenerateRequest {
            messages: render_generate_messages(&agent, conversation, ctx),
            max_tokens: agent.max_tokens,
            temperature: agent.temperature,
        };
        let deadline = Duration::from_millis(state.config.server.response_timeout_ms);
        let call_start = std::time::Instant::now();
        let response = tokio::time::timeout(deadline, adapter.generate(&request)).await;
        let latency_ms = call_start.elapsed().as_millis() as u64;

        let response = match response {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => {
                tracing::warn!(agent_id = %agent.agent_id, error = %err, "winner's turn generation failed");
                if attempt == 0 {
                    continue;
                }
                return Ok(TurnOutcome::Stalled);
            }
            Err(_) => {
                tracing::warn!(agent_id = %agent.agent_id, "winner's turn generation timed out");
                if attempt == 0 {
                    continue;
                }
                return Ok(TurnOutcome::Stalled);
            }
        };

        // Step 5: process the response into a durable message.
        let message = TurnMessage::new(
            conversation.conversation_id.clone(),
            turn_number,
            agent.agent_id.clone(),
            agent.display_name.clone(),
            response.content.clone(),
            response.input_tokens,
            response.output_tokens,
            latency_ms,
        );
        let tokens = (response.input_tokens + response.output_tokens) as u64;
        let avg_score = result
            .final_scores
            .get(&agent.agent_id)
            .copied()
            .unwrap_or(0.0);
        if let Some(p) = conversation.find_participant_mut(&agent.agent_id) {
            p.stats.record_turn(avg_score, tokens, message.created_at);
        }
        conversation.append_message(message.clone());
        let _ = state.store.put(conversation.clone());
        TraceEvent::TurnCompleted {
            conversation_id: conversation.conversation_id.clone(),
            turn_number,
            agent_id: agent.agent_id.clone(),
            duration_ms: latency_ms,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        }
        .emit();

        // Step 6: update the rolling context.
        let summary_before = ctx.sum.clone();
        update_context(ctx, &message, &state.config.context, None);
        if ctx.sum != summary_before {
            TraceEvent::ContextCompacted {
                conversation_id: conversation.conversation_id.clone(),
                current_turn: ctx.current_turn,
                summary_chars: ctx.sum.len(),
            }
            .emit();
        }

        // Step 7: deliver to every subscriber.
        let user_ids = crate::state::participant_user_ids(&conversation.participants);
        let results = state
            .delivery
            .deliver(&conversation.conversation_id, &message, &user_ids)
            .await;
        for r in &results {
            tracing::debug!(user_id = %r.user_id, via = ?r.via, "turn delivery");
            TraceEvent::DeliveryResult {
                conversation_id: conversation.conversation_id.clone(),
                message_id: message.message_id.clone(),
                user_id: r.user_id.clone(),
                via: format!("{:?}", r.via),
            }
            .emit();
        }

        return Ok(TurnOutcome::Continued);
    }

    Ok(TurnOutcome::Stalled)
}

fn render_bid_context(
    conversation: &Conversation,
    ctx: &conclave_domain::model::CompactContext,
) -> String {
    let mut out = format!("Topic: {}\n", conversation.topic);
    if let Some(goal) = &conversation.goal {
        out.push_str(&format!("Goal: {goal}\n"));
    }
    if !ctx.sum.is_empty() {
        out.push_str(&format!("Summary so far: {}\n", ctx.sum));
    }
    out.push_str("Recent turns:\n");
    for kp in &ctx.last {
        out.push_str(&format!("- [{}] {}\n", kp.agent_id, kp.key_point));
    }
    out
}

fn render_generate_messages(
    agent: &conclave_domain::model::Agent,
    conversation: &Conversation,
    ctx: &conclave_domain::model::CompactContext,
) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if let Some(prompt) = &agent.system_prompt {
        messages.push(ChatMessage::system(prompt.clone()));
    }
    messages.push(ChatMessage::system(render_bid_context(conversation, ctx)));
    messages.push(ChatMessage::user(conversation.topic.clone()));
    messages
}

/// Collect bids concurrently from every active participant, recording
/// unresponsive/failing adapters as implicit passes (spec.md §4.D
/// step 2).
async fn collect_bids(
    state: &AppState,
    conversation: &Conversation,
    bid_context: &str,
    turn_number: u32,
) -> HashMap<String, Bid> {
    let deadline = Duration::from_millis(state.config.bidding.bid_collection_ms);
    let futures: Vec<_> = conversation
        .participants
        .iter()
        .map(|p| {
            let agent_id = p.agent_id.clone();
            let conversation_id = conversation.conversation_id.clone();
            async move {
                let agent = state.agents.get(&agent_id);
                let adapter = agent.as_ref().and_then(|a| {
                    state
                        .providers
                        .get_by_provider_and_model(a.provider.registry_key(), &a.model_id)
                });
                let decision_scores = match adapter {
                    Some(adapter) => {
                        match tokio::time::timeout(deadline, adapter.generate_bid(bid_context)).await
                        {
                            Ok(Ok(scores)) => Some(scores),
                            Ok(Err(err)) => {
                                tracing::warn!(agent_id = %agent_id, error = %err, "bid call failed, implicit pass");
                                None
                            }
                            Err(_) => {
                                tracing::warn!(agent_id = %agent_id, "bid call timed out, implicit pass");
                                TraceEvent::BidTimedOut {
                                    conversation_id: conversation_id.clone(),
                                    turn_number,
                                    agent_id: agent_id.clone(),
                                }
                                .emit();
                                None
                            }
                        }
                    }
                    None => None,
                };
                let (scores, decision) = match decision_scores {
                    Some(scores) => (scores, BidDecision::Bid),
                    None => (BidScores::default(), BidDecision::Pass),
                };
                TraceEvent::BidCollected {
                    conversation_id: conversation_id.clone(),
                    turn_number,
                    agent_id: agent_id.clone(),
                    decision: match decision {
                        BidDecision::Bid => "bid".to_string(),
                        BidDecision::Pass => "pass".to_string(),
                        BidDecision::Defer { .. } => "defer".to_string(),
                    },
                }
                .emit();
                (
                    agent_id.clone(),
                    Bid::new(conversation_id, turn_number, agent_id, scores, decision),
                )
            }
        })
        .collect();

    join_all(futures).await.into_iter().collect()
}

fn build_round_contexts(
    conversation: &Conversation,
    turn_number: u32,
    bidding: &BiddingConfig,
) -> HashMap<String, AgentRoundContext> {
    conversation
        .participants
        .iter()
        .map(|p| {
            let just_finished_max_consecutive_turns =
                is_on_a_max_consecutive_streak(conversation, &p.agent_id, turn_number, bidding);
            (
                p.agent_id.clone(),
                AgentRoundContext {
                    stats: p.stats.clone(),
                    just_finished_max_consecutive_turns,
                },
            )
        })
        .collect()
}

/// `true` if `agent_id` holds each of the last `maxConsecutiveTurns`
/// completed turns, meaning it must sit this round out.
fn is_on_a_max_consecutive_streak(
    conversation: &Conversation,
    agent_id: &str,
    _turn_number: u32,
    bidding: &BiddingConfig,
) -> bool {
    let n = bidding.max_consecutive_turns as usize;
    if n == 0 || conversation.messages.len() < n {
        return false;
    }
    conversation.messages[conversation.messages.len() - n..]
        .iter()
        .all(|m| m.agent_id == agent_id)
}

/// Step 8: evaluate end conditions after a completed round.
fn check_end_conditions(
    conversation: &Conversation,
    end_conditions: &EndConditionConfig,
) -> Option<StopReason> {
    if conversation.current_turn >= conversation.max_turns {
        return Some(StopReason::MaxTurnsReached);
    }
    if let Some(budget) = end_conditions.max_total_tokens {
        let used: u64 = conversation
            .messages
            .iter()
            .map(|m| (m.input_tokens + m.output_tokens) as u64)
            .sum();
        if used >= budget {
            return Some(StopReason::TokenBudgetExceeded);
        }
    }
    if let Some(last) = conversation.messages.last() {
        let lower = last.content.to_lowercase();
        if end_conditions
            .natural_conclusion_phrases
            .iter()
            .any(|phrase| lower.contains(&phrase.to_lowercase()))
        {
            return Some(StopReason::NaturalConclusion);
        }
    }
    None
}

fn finalize(state: &AppState, conversation: &mut Conversation, reason: StopReason) {
    conversation.status = if reason == StopReason::Cancelled {
        ConversationStatus::Cancelled
    } else {
        ConversationStatus::Completed
    };
    let _ = state.store.put(conversation.clone());
    state.control.remove(&conversation.conversation_id);
    tracing::info!(
        conversation_id = %conversation.conversation_id,
        reason = reason.label(),
        turns = conversation.current_turn,
        "conversation finished"
    );
}

/// Exposed for the `context` estimator used by the token-budget check
/// in integration tests; kept out of the hot path above to avoid
/// recomputing it every round when no budget is configured.
pub fn context_token_estimate(ctx: &conclave_domain::model::CompactContext) -> usize {
    estimate_context_tokens(ctx)
}

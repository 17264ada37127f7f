//! Maintains a compact rolling context (summary + last-N key points)
//! per conversation.
//!
//! The summarizer is an external collaborator (typically another
//! provider adapter call) passed in as a closure rather than owned —
//! the same "take a collaborator handle, don't hold network state"
//! shape the teacher's transcript-compaction module uses for its LLM
//! provider argument.

use std::collections::HashMap;

use conclave_domain::config::ContextConfig;
use conclave_domain::model::{CompactContext, KeyPoint, TurnMessage};

/// How much of a `CompactContext` a given role is handed before a call.
#[derive(Debug, Clone, Copy)]
pub struct RoleRule {
    pub include_summary: bool,
    /// `None` keeps every entry currently in `ctx.last`.
    pub max_recent_turns: Option<usize>,
}

impl Default for RoleRule {
    fn default() -> Self {
        Self {
            include_summary: true,
            max_recent_turns: None,
        }
    }
}

/// Table-driven role routing: data, not a match-statement wall, so new
/// roles are added by inserting a row rather than a new branch.
#[derive(Debug, Clone)]
pub struct RoleRoutingConfig {
    pub rules: HashMap<String, RoleRule>,
    pub default_rule: RoleRule,
}

impl Default for RoleRoutingConfig {
    fn default() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            "critic".to_string(),
            RoleRule {
                include_summary: false,
                max_recent_turns: Some(1),
            },
        );
        rules.insert(
            "synthesizer".to_string(),
            RoleRule {
                include_summary: true,
                max_recent_turns: Some(10),
            },
        );
        Self {
            rules,
            default_rule: RoleRule::default(),
        }
    }
}

/// The reduced view of a `CompactContext` handed to one agent call.
#[derive(Debug, Clone)]
pub struct RoutedContext<'a> {
    pub summary: Option<&'a str>,
    pub last: &'a [KeyPoint],
}

pub fn create_initial_context(
    conversation_id: String,
    topic: String,
    goal: Option<String>,
    participant_ids: Vec<String>,
) -> CompactContext {
    CompactContext {
        conversation_id,
        current_turn: 0,
        sum: String::new(),
        last: Vec::new(),
        topic,
        goal,
        participant_ids,
    }
}

/// Take the first 1–2 sentences of `content`, split on `.`/`!`/`?`,
/// truncated to `max_len` with a trailing ellipsis if cut short.
pub fn extract_key_point(content: &str, max_len: usize) -> String {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, c) in content.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let sentence = content[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
            if sentences.len() == 2 {
                break;
            }
        }
    }
    if sentences.is_empty() {
        let remainder = content[start..].trim();
        if !remainder.is_empty() {
            sentences.push(remainder);
        }
    }
    let joined = sentences.join(" ");
    truncate_with_ellipsis(&joined, max_len)
}

fn truncate_with_ellipsis(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(max_len.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

/// Advance `ctx` by one completed turn, per spec §4.C `updateContext`.
///
/// `summarizer` is called with `(existing_summary, last)` only when
/// `current_turn % summarize_every_n_turns == 0`; its result replaces
/// `ctx.sum`.
pub fn update_context(
    ctx: &mut CompactContext,
    new_turn: &TurnMessage,
    config: &ContextConfig,
    summarizer: Option<&dyn Fn(&str, &[KeyPoint]) -> String>,
) {
    let key_point = extract_key_point(&new_turn.content, config.max_key_point_length);
    ctx.last.push(KeyPoint {
        turn_number: new_turn.turn_number,
        agent_id: new_turn.agent_id.clone(),
        key_point,
    });
    if ctx.last.len() > config.max_recent_turns {
        let excess = ctx.last.len() - config.max_recent_turns;
        ctx.last.drain(0..excess);
    }

    ctx.current_turn += 1;

    if let Some(summarizer) = summarizer {
        if config.summarize_every_n_turns > 0
            && ctx.current_turn % config.summarize_every_n_turns == 0
        {
            let new_summary = summarizer(&ctx.sum, &ctx.last);
            tracing::debug!(
                conversation_id = %ctx.conversation_id,
                current_turn = ctx.current_turn,
                summary_chars = new_summary.len(),
                "context summary regenerated"
            );
            ctx.sum = new_summary;
        }
    }
}

/// Produce the reduced view of `ctx` a given `role` should see.
pub fn route_context_for_role<'a>(
    ctx: &'a CompactContext,
    role: &str,
    config: &RoleRoutingConfig,
) -> RoutedContext<'a> {
    let rule = config.rules.get(role).copied().unwrap_or(config.default_rule);
    let summary = if rule.include_summary {
        Some(ctx.sum.as_str())
    } else {
        None
    };
    let last = match rule.max_recent_turns {
        Some(n) if n < ctx.last.len() => &ctx.last[ctx.last.len() - n..],
        _ => &ctx.last[..],
    };
    RoutedContext { summary, last }
}

/// `ceil(|sum|/4) + Σ ceil(|keyPoint|/4) + 50` — a cheap token estimate
/// (4 chars/token), not a tokenizer call.
pub fn estimate_context_tokens(ctx: &CompactContext) -> usize {
    let ceil_div4 = |len: usize| len.div_ceil(4);
    let summary_tokens = ceil_div4(ctx.sum.len());
    let key_point_tokens: usize = ctx.last.iter().map(|kp| ceil_div4(kp.key_point.len())).sum();
    summary_tokens + key_point_tokens + 50
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_turn(turn_number: u32, agent_id: &str, content: &str) -> TurnMessage {
        TurnMessage::new(
            "c1".into(),
            turn_number,
            agent_id.into(),
            "Agent".into(),
            content.into(),
            10,
            5,
            50,
        )
    }

    #[test]
    fn extract_key_point_takes_first_two_sentences() {
        let kp = extract_key_point("First sentence. Second sentence. Third sentence.", 200);
        assert_eq!(kp, "First sentence. Second sentence.");
    }

    #[test]
    fn extract_key_point_truncates_long_single_sentence() {
        let long = "a".repeat(300);
        let kp = extract_key_point(&long, 50);
        assert_eq!(kp.chars().count(), 50);
        assert!(kp.ends_with('…'));
    }

    #[test]
    fn update_context_retains_only_trailing_max_recent_turns() {
        let mut ctx = create_initial_context("c1".into(), "t".into(), None, vec![]);
        let config = ContextConfig {
            max_recent_turns: 2,
            ..ContextConfig::default()
        };
        for i in 1..=5 {
            update_context(&mut ctx, &sample_turn(i, "a1", "hello there."), &config, None);
        }
        assert_eq!(ctx.last.len(), 2);
        assert_eq!(ctx.last.last().unwrap().turn_number, 5);
        assert_eq!(ctx.current_turn, 5);
    }

    #[test]
    fn update_context_summarizes_on_the_configured_cadence() {
        let mut ctx = create_initial_context("c1".into(), "t".into(), None, vec![]);
        let config = ContextConfig {
            summarize_every_n_turns: 2,
            ..ContextConfig::default()
        };
        let summarizer = |_existing: &str, _last: &[KeyPoint]| "new summary".to_string();
        update_context(&mut ctx, &sample_turn(1, "a1", "hi."), &config, Some(&summarizer));
        assert_eq!(ctx.sum, "");
        update_context(&mut ctx, &sample_turn(2, "a1", "hi again."), &config, Some(&summarizer));
        assert_eq!(ctx.sum, "new summary");
    }

    #[test]
    fn route_context_for_role_critic_drops_summary_and_keeps_last_one() {
        let mut ctx = create_initial_context("c1".into(), "t".into(), None, vec![]);
        ctx.sum = "a big summary".into();
        ctx.last = vec![
            KeyPoint { turn_number: 1, agent_id: "a1".into(), key_point: "one".into() },
            KeyPoint { turn_number: 2, agent_id: "a2".into(), key_point: "two".into() },
        ];
        let routing = RoleRoutingConfig::default();
        let routed = route_context_for_role(&ctx, "critic", &routing);
        assert!(routed.summary.is_none());
        assert_eq!(routed.last.len(), 1);
        assert_eq!(routed.last[0].key_point, "two");
    }

    #[test]
    fn route_context_for_role_unknown_role_uses_default_rule() {
        let mut ctx = create_initial_context("c1".into(), "t".into(), None, vec![]);
        ctx.sum = "summary".into();
        let routing = RoleRoutingConfig::default();
        let routed = route_context_for_role(&ctx, "responder", &routing);
        assert_eq!(routed.summary, Some("summary"));
    }

    #[test]
    fn estimate_context_tokens_matches_formula() {
        let mut ctx = create_initial_context("c1".into(), "t".into(), None, vec![]);
        ctx.sum = "a".repeat(40);
        ctx.last = vec![KeyPoint {
            turn_number: 1,
            agent_id: "a1".into(),
            key_point: "b".repeat(8),
        }];
        assert_eq!(estimate_context_tokens(&ctx), 10 + 2 + 50);
    }
}

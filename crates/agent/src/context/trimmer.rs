//! Context window trimming.
//!
//! Keeps the conversation sent to the model inside a token budget without
//! ever separating a tool call from its results. History is cut only at
//! turn-group boundaries:
//!
//! | Group | Contents |
//! |-------|----------|
//! | Turn group | a human message and every assistant/tool message after it, up to the next human message |
//! | Leading group | anything before the first human message (dropped first) |
//!
//! Groups are kept newest-first as a contiguous suffix. The newest group is
//! always kept, even when it alone exceeds the budget, because it holds the
//! question being answered.

use serde::{Deserialize, Serialize};
use sqlpilot_core::message::{Message, Role};
use std::collections::HashSet;
use std::ops::Range;

use super::token::estimate_message_tokens;

/// A broken message sequence.
///
/// These are programming errors in whatever assembled the history, never
/// something the model caused, so the turn that hits one is aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    #[error("message sequence does not start with the system message")]
    MissingSystem,

    #[error("system message found at position {index}, only position 0 is allowed")]
    MisplacedSystem { index: usize },

    #[error("tool message at position {index} has no tool_call_id")]
    MissingToolCallId { index: usize },

    #[error("tool result at position {index} answers unknown call id '{call_id}'")]
    OrphanToolResult { index: usize, call_id: String },

    #[error("tool calls {ids:?} requested at position {index} have no result")]
    UnansweredToolCalls { index: usize, ids: Vec<String> },

    #[error("tool call id '{id}' is used twice in the message at position {index}")]
    DuplicateToolCallId { index: usize, id: String },

    #[error("tool call at position {index} has an empty id")]
    EmptyToolCallId { index: usize },
}

/// What a trim pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimReport {
    /// Token budget given for history (system excluded).
    pub budget: usize,
    /// Estimated tokens of the history that was kept.
    pub estimated_tokens: usize,
    pub groups_total: usize,
    pub groups_kept: usize,
    pub messages_dropped: usize,
    /// True when the newest group alone is larger than the budget.
    pub over_budget: bool,
    /// False when trimming was switched off and history passed through.
    pub enabled: bool,
}

impl TrimReport {
    pub fn groups_dropped(&self) -> usize {
        self.groups_total - self.groups_kept
    }
}

/// Split history into turn groups, returned as index ranges in order.
///
/// `history` excludes the system message; the caller supplies it
/// separately.
pub fn turn_groups(history: &[Message]) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut start = 0;
    for (i, msg) in history.iter().enumerate() {
        if msg.is_human() && i > start {
            groups.push(start..i);
            start = i;
        }
    }
    if start < history.len() {
        groups.push(start..history.len());
    }
    groups
}

/// Produce the bounded context for one model call.
///
/// Returns `system` followed by the newest turn groups of `history` whose
/// estimated size fits in `budget`. With `enabled == false` the whole
/// history is passed through. Either way the output is validated, and a
/// broken sequence is returned as an error instead of being sent.
///
/// A system message inside `history` is rejected with
/// [`StructureError::MisplacedSystem`], indexed as if `system` came first.
pub fn trim(
    system: &Message,
    history: &[Message],
    budget: usize,
    enabled: bool,
) -> Result<(Vec<Message>, TrimReport), StructureError> {
    if let Some(i) = history.iter().position(|m| m.role == Role::System) {
        return Err(StructureError::MisplacedSystem { index: i + 1 });
    }
    let costs: Vec<usize> = history.iter().map(estimate_message_tokens).collect();
    let groups = turn_groups(history);

    let mut report = TrimReport {
        budget,
        groups_total: groups.len(),
        enabled,
        ..TrimReport::default()
    };

    let keep_from = if enabled {
        let mut used = 0;
        let mut keep_from = history.len();
        for (n, group) in groups.iter().rev().enumerate() {
            let cost: usize = costs[group.clone()].iter().sum();
            if n > 0 && used + cost > budget {
                break;
            }
            if n == 0 && cost > budget {
                report.over_budget = true;
            }
            used += cost;
            keep_from = group.start;
            report.groups_kept += 1;
        }
        keep_from
    } else {
        report.groups_kept = groups.len();
        0
    };

    report.messages_dropped = keep_from;
    report.estimated_tokens = costs[keep_from..].iter().sum();

    let mut out = Vec::with_capacity(history.len() - keep_from + 1);
    out.push(system.clone());
    out.extend_from_slice(&history[keep_from..]);

    validate_sequence(&out)?;
    Ok((out, report))
}

/// Check a model-bound sequence against the tool pairing rules.
///
/// - position 0 is the system message, and no other message is
/// - every tool message answers an open call of the latest assistant message
/// - every call is answered before the next human or assistant message
/// - call ids within one assistant message are unique and non-empty
pub fn validate_sequence(messages: &[Message]) -> Result<(), StructureError> {
    match messages.first() {
        Some(first) if first.role == Role::System => {}
        _ => return Err(StructureError::MissingSystem),
    }

    let mut open: HashSet<&str> = HashSet::new();
    let mut open_at = 0;

    for (index, msg) in messages.iter().enumerate().skip(1) {
        match msg.role {
            Role::System => return Err(StructureError::MisplacedSystem { index }),
            Role::Tool => {
                let call_id = msg
                    .tool_call_id
                    .as_deref()
                    .ok_or(StructureError::MissingToolCallId { index })?;
                if !open.remove(call_id) {
                    return Err(StructureError::OrphanToolResult {
                        index,
                        call_id: call_id.to_string(),
                    });
                }
            }
            Role::User | Role::Assistant => {
                if !open.is_empty() {
                    return Err(unanswered(open_at, &open));
                }
                if msg.role == Role::Assistant {
                    check_tool_call_ids(msg, index)?;
                    open = msg.tool_calls.iter().map(|tc| tc.id.as_str()).collect();
                    open_at = index;
                }
            }
        }
    }

    if open.is_empty() {
        Ok(())
    } else {
        Err(unanswered(open_at, &open))
    }
}

/// Reject empty or repeated call ids in one assistant message.
pub fn check_tool_call_ids(message: &Message, index: usize) -> Result<(), StructureError> {
    let mut seen = HashSet::new();
    for call in &message.tool_calls {
        if call.id.is_empty() {
            return Err(StructureError::EmptyToolCallId { index });
        }
        if !seen.insert(call.id.as_str()) {
            return Err(StructureError::DuplicateToolCallId {
                index,
                id: call.id.clone(),
            });
        }
    }
    Ok(())
}

fn unanswered(index: usize, open: &HashSet<&str>) -> StructureError {
    let mut ids: Vec<String> = open.iter().map(|s| s.to_string()).collect();
    ids.sort();
    StructureError::UnansweredToolCalls { index, ids }
}

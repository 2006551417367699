//! Cumulative token counters for one session.

use serde::{Deserialize, Serialize};
use sqlpilot_core::Usage;

/// A read-only snapshot of the session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Accumulates usage reports across every model call of a session.
///
/// Counters only grow. The only way to reset them is to start a new session,
/// which creates a new accountant.
#[derive(Debug, Clone, Default)]
pub struct TokenAccountant {
    input_tokens: u64,
    output_tokens: u64,
    calls: u64,
}

impl TokenAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one model response's usage into the totals.
    ///
    /// A response without a usage report counts as zero tokens.
    pub fn update(&mut self, usage: Option<&Usage>) {
        self.calls += 1;
        let Some(usage) = usage else {
            tracing::debug!("Model response carried no usage report");
            return;
        };
        self.input_tokens = self.input_tokens.saturating_add(usage.input_tokens as u64);
        self.output_tokens = self.output_tokens.saturating_add(usage.output_tokens as u64);
        tracing::debug!(
            input = usage.input_tokens,
            output = usage.output_tokens,
            session_total = self.input_tokens + self.output_tokens,
            "Token usage recorded"
        );
    }

    pub fn report(&self) -> TokenTotals {
        TokenTotals {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.input_tokens.saturating_add(self.output_tokens),
        }
    }

    /// Number of model responses folded in so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Human-readable usage block shown after an answer.
    pub fn summary(&self) -> String {
        let totals = self.report();
        format!(
            "Token usage for this session:\n- Input tokens: {}\n- Output tokens: {}\n- Total tokens: {}\n- Model calls: {}",
            totals.input_tokens, totals.output_tokens, totals.total_tokens, self.calls
        )
    }
}

//! Bounded context assembly for model calls.
//!
//! | Part | Source | Trim strategy |
//! |------|--------|---------------|
//! | System prompt | Session settings | Never trimmed |
//! | Tool catalog | Tool registry | Never trimmed, reserved up front |
//! | Conversation history | Session + current turn | Oldest turn groups dropped |

pub mod token;
pub mod trimmer;

pub use token::{estimate_message_tokens, estimate_messages_tokens, estimate_tokens, estimate_tools_tokens};
pub use trimmer::{StructureError, TrimReport, trim, turn_groups, validate_sequence};

//! The conversational turn controller for SQLPilot.
//!
//! A turn follows an **ask → act → observe** cycle:
//!
//! 1. **Receive** a human question for a session
//! 2. **Trim** the history to the model's context budget (whole turn groups only)
//! 3. **Send to the model** with the full tool catalog, streaming text back
//! 4. **If tool calls**: run them, append one result per call, loop back to step 2
//! 5. **If text**: commit the turn to the session and return the answer
//!
//! The loop ends on a text answer or when the tool round ceiling is hit.

pub mod context;
pub mod loop_runner;
pub mod prompt;
pub mod session;
pub mod store;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use context::{StructureError, TrimReport};
pub use loop_runner::{SettingsError, TurnController, TurnError, TurnOutcome};
pub use prompt::{PromptCatalog, PromptError};
pub use session::Session;
pub use store::{SessionHandle, SessionStore};
pub use stream_event::TurnEvent;

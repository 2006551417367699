//! Conversation state for one user thread.

use sqlpilot_config::SessionSettings;
use sqlpilot_core::message::{Message, ThreadId};
use sqlpilot_telemetry::{TokenAccountant, TokenTotals};

/// One conversation thread.
///
/// History only grows, and only through a committed turn. The system
/// message is held apart from history and is always sent first.
#[derive(Debug, Clone)]
pub struct Session {
    thread_id: ThreadId,
    settings: SessionSettings,
    system: Message,
    history: Vec<Message>,
    accountant: TokenAccountant,
}

impl Session {
    pub fn new(settings: SessionSettings, system: Message) -> Self {
        Self {
            thread_id: ThreadId::new(),
            settings,
            system,
            history: Vec::new(),
            accountant: TokenAccountant::new(),
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn system(&self) -> &Message {
        &self.system
    }

    /// Committed history, without the system message.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn token_totals(&self) -> TokenTotals {
        self.accountant.report()
    }

    pub fn accountant(&self) -> &TokenAccountant {
        &self.accountant
    }

    pub(crate) fn accountant_mut(&mut self) -> &mut TokenAccountant {
        &mut self.accountant
    }

    /// Swap settings and system message together. History and token
    /// totals are kept.
    pub(crate) fn apply_settings(&mut self, settings: SessionSettings, system: Message) {
        self.settings = settings;
        self.system = system;
    }

    /// Append the messages of a finished turn.
    pub(crate) fn commit(&mut self, turn: Vec<Message>) {
        self.history.extend(turn);
    }
}

//! In-process session registry.
//!
//! Sessions live for the lifetime of the process. Each one sits behind its
//! own async mutex, so turns for different threads run concurrently while
//! a thread only ever runs one turn at a time.

use sqlpilot_config::SessionSettings;
use sqlpilot_core::message::ThreadId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::loop_runner::{TurnController, TurnError, TurnOutcome};
use crate::session::Session;
use crate::stream_event::TurnEvent;

pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ThreadId, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Session) -> ThreadId {
        let id = session.thread_id().clone();
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        id
    }

    pub async fn get(&self, id: &ThreadId) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &ThreadId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Run a turn on the session `id`.
    ///
    /// Fails with [`TurnError::SessionBusy`] instead of waiting when the
    /// session is already running a turn.
    pub async fn submit(
        &self,
        controller: &TurnController,
        id: &ThreadId,
        input: &str,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let handle = self
            .get(id)
            .await
            .ok_or_else(|| TurnError::UnknownSession(id.clone()))?;
        let mut session = handle
            .try_lock()
            .map_err(|_| TurnError::SessionBusy(id.clone()))?;
        controller.run_turn(&mut session, input, events, cancel).await
    }

    /// Apply new settings between turns. Waits for a running turn to finish.
    pub async fn update_settings(
        &self,
        controller: &TurnController,
        id: &ThreadId,
        settings: SessionSettings,
    ) -> Result<(), TurnError> {
        let handle = self
            .get(id)
            .await
            .ok_or_else(|| TurnError::UnknownSession(id.clone()))?;
        let mut session = handle.lock().await;
        controller.update_settings(&mut session, settings)?;
        Ok(())
    }
}

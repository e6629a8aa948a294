//! Per-session state: conversation history, mode controller and the
//! bookkeeping that keeps superseded queries from ever being answered.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

use crate::errors::{EngineError, EngineResult};
use crate::history::{ConversationHistory, ConversationTurn, TurnRole};
use crate::mode::{ModeController, ModeSnapshot};
use crate::network::{ListenerGuard, NetworkStatusMonitor};
use crate::types::Feature;

struct SessionState {
    history: ConversationHistory,
    /// Bumped by every submission and reset; only the current generation
    /// may commit an answer.
    generation: u64,
    in_flight: Option<AbortHandle>,
    updated_at: DateTime<Utc>,
}

/// Summary of a session for host applications
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub feature: Feature,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turns: usize,
    pub mode: ModeSnapshot,
}

pub struct Session {
    id: String,
    feature: Feature,
    created_at: DateTime<Utc>,
    mode: Arc<ModeController>,
    state: Mutex<SessionState>,
    _connectivity: ListenerGuard,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        feature: Feature,
        history_max_turns: usize,
        monitor: &NetworkStatusMonitor,
    ) -> Self {
        let mode = Arc::new(ModeController::new(monitor.is_online()));
        let connectivity = mode.bind(monitor);

        let now = Utc::now();
        Self {
            id: id.into(),
            feature,
            created_at: now,
            mode,
            state: Mutex::new(SessionState {
                history: ConversationHistory::new(feature.system_prompt(), history_max_turns),
                generation: 0,
                in_flight: None,
                updated_at: now,
            }),
            _connectivity: connectivity,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn feature(&self) -> Feature {
        self.feature
    }

    pub fn mode(&self) -> &Arc<ModeController> {
        &self.mode
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|e| EngineError::Internal(format!("Session state poisoned: {}", e)))
    }

    /// Starts a new query generation. Any query still in flight is aborted;
    /// `launch` receives a copy of the history and returns the spawned
    /// dispatch task.
    pub(crate) fn start<T, F>(&self, launch: F) -> EngineResult<(u64, JoinHandle<T>)>
    where
        F: FnOnce(Vec<ConversationTurn>) -> JoinHandle<T>,
    {
        let mut state = self.lock()?;
        state.generation += 1;
        if let Some(previous) = state.in_flight.take() {
            debug!(session_id = %self.id, "Aborting superseded query");
            previous.abort();
        }

        let handle = launch(state.history.snapshot());
        state.in_flight = Some(handle.abort_handle());
        Ok((state.generation, handle))
    }

    /// Records a finished exchange if `generation` is still current.
    pub(crate) fn commit(&self, generation: u64, user: &str, assistant: &str) -> EngineResult<()> {
        let mut state = self.lock()?;
        if state.generation != generation {
            return Err(EngineError::Superseded);
        }
        state.in_flight = None;
        state.history.append(TurnRole::User, user)?;
        state.history.append(TurnRole::Assistant, assistant)?;
        state.updated_at = Utc::now();
        Ok(())
    }

    /// Clears the in-flight marker after a failed dispatch. Returns whether
    /// the generation was still current.
    pub(crate) fn finish_failed(&self, generation: u64) -> EngineResult<bool> {
        let mut state = self.lock()?;
        if state.generation != generation {
            return Ok(false);
        }
        state.in_flight = None;
        Ok(true)
    }

    /// Cancels in-flight work and truncates history to the system turn
    pub fn reset(&self) -> EngineResult<()> {
        let mut state = self.lock()?;
        Self::invalidate(&mut state);
        state.history.reset();
        state.updated_at = Utc::now();
        debug!(session_id = %self.id, "Session reset");
        Ok(())
    }

    /// Cancels in-flight work without touching history
    pub fn cancel(&self) -> EngineResult<()> {
        let mut state = self.lock()?;
        Self::invalidate(&mut state);
        Ok(())
    }

    fn invalidate(state: &mut SessionState) {
        state.generation += 1;
        if let Some(previous) = state.in_flight.take() {
            previous.abort();
        }
    }

    pub fn history(&self) -> EngineResult<Vec<ConversationTurn>> {
        Ok(self.lock()?.history.snapshot())
    }

    /// Replaces history with `turns`. Any query in flight was built on the
    /// old history and is cancelled.
    pub fn restore_history(&self, turns: Vec<ConversationTurn>) -> EngineResult<()> {
        let mut state = self.lock()?;
        Self::invalidate(&mut state);
        state.history.restore(turns)?;
        state.updated_at = Utc::now();
        Ok(())
    }

    pub fn info(&self) -> EngineResult<SessionInfo> {
        let state = self.lock()?;
        Ok(SessionInfo {
            id: self.id.clone(),
            feature: self.feature,
            created_at: self.created_at,
            updated_at: state.updated_at,
            turns: state.history.len(),
            mode: self.mode.snapshot(),
        })
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};

use super::types::{HistoryEntry, SessionView, WorkerCommand};
use crate::domain::SessionId;

#[derive(Debug, Clone)]
pub(super) struct SessionEntry {
    pub(super) command_tx: mpsc::Sender<WorkerCommand>,
    pub(super) view_rx: watch::Receiver<SessionView>,
}

impl SessionEntry {
    pub(super) fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }
}

#[derive(Debug)]
struct RegistryInner {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_capacity: usize,
}

/// Active sessions plus the bounded record of finished ones. Locks are held
/// only for map operations, never across an await.
#[derive(Debug, Clone)]
pub(super) struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub(super) fn new(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                history_capacity,
            }),
        }
    }

    /// Insert a new session; returns false if the id is taken.
    pub(super) fn insert(&self, session_id: SessionId, entry: SessionEntry) -> bool {
        let mut sessions = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&session_id) {
            return false;
        }
        sessions.insert(session_id, entry);
        true
    }

    pub(super) fn get(&self, session_id: &SessionId) -> Option<SessionEntry> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub(super) fn remove(&self, session_id: &SessionId) -> Option<SessionEntry> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    pub(super) fn views(&self) -> Vec<SessionView> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(SessionEntry::view)
            .collect()
    }

    pub(super) fn record_history(&self, entry: HistoryEntry) {
        let mut history = self
            .inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        history.push_front(entry);
        history.truncate(self.inner.history_capacity);
    }

    pub(super) fn history(&self) -> Vec<HistoryEntry> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

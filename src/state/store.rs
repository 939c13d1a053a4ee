use super::session::{EventEffect, SessionState};
use crate::types::StreamEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Outcome of asking the store to start a stream for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// State was reset and marked active; the caller owns the stream.
    Started,
    /// A stream for this subject is already running.
    AlreadyActive,
    /// Not forced and a result exists; served from cache.
    Cached,
}

/// Shared map of subject id to session state.
///
/// Every write is keyed by subject, so streams for different subjects can
/// interleave freely. The lock is never held across an await point.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SessionState>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionState>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of a subject's state.
    pub fn get(&self, subject_id: &str) -> Option<SessionState> {
        self.lock().get(subject_id).cloned()
    }

    pub fn set(&self, subject_id: &str, state: SessionState) {
        self.lock().insert(subject_id.to_string(), state);
    }

    /// Replaces a subject's state with an empty one.
    pub fn reset(&self, subject_id: &str) {
        self.set(subject_id, SessionState::new());
    }

    pub fn contains(&self, subject_id: &str) -> bool {
        self.lock().contains_key(subject_id)
    }

    pub fn is_active(&self, subject_id: &str) -> bool {
        self.lock()
            .get(subject_id)
            .is_some_and(|state| state.is_active)
    }

    pub fn subject_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Runs `f` against a subject's state, if it exists.
    pub fn update<R>(&self, subject_id: &str, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        self.lock().get_mut(subject_id).map(f)
    }

    /// Atomically checks the active/cache guards and, when allowed, resets the
    /// subject to a fresh active session.
    pub fn begin(&self, subject_id: &str, force: bool) -> BeginOutcome {
        let mut sessions = self.lock();
        match sessions.get(subject_id) {
            Some(state) if state.is_active => return BeginOutcome::AlreadyActive,
            Some(_) if !force => return BeginOutcome::Cached,
            _ => {}
        }
        let mut fresh = SessionState::new();
        fresh.is_active = true;
        sessions.insert(subject_id.to_string(), fresh);
        BeginOutcome::Started
    }

    pub fn apply(&self, subject_id: &str, event: &StreamEvent) -> Option<EventEffect> {
        self.update(subject_id, |state| state.apply(event))
    }

    /// Clears the active flag unconditionally, keeping whatever was committed.
    pub fn finish(&self, subject_id: &str, error: Option<String>) {
        self.update(subject_id, |state| state.finish(error));
    }
}

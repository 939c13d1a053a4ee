use crate::api::stream::StreamParser;
use crate::api::{AgentTransport, ByteStream};
use crate::config::Config;
use crate::state::{
    BeginOutcome, CaseStatus, EventEffect, SessionProjection, SessionStore, TextUpdate,
    TimelineEvent,
};
use crate::types::Verdict;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Change notifications for whoever renders a subject.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StreamOpened {
        subject_id: String,
    },
    TextAppended {
        subject_id: String,
        delta: String,
    },
    /// Visible text regressed; redraw the whole thing.
    TextReplaced {
        subject_id: String,
        text: String,
    },
    TimelineChanged {
        subject_id: String,
        len: usize,
        latest: Option<TimelineEvent>,
    },
    VerdictChanged {
        subject_id: String,
        verdict: Verdict,
    },
    StreamClosed {
        subject_id: String,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("no data received for {}s", .0.as_secs())]
    IdleTimeout(Duration),
    #[error("stream cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaseError {
    #[error("no session for subject '{0}'")]
    UnknownSubject(String),
    #[error("subject '{0}' still has an active stream")]
    StreamActive(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Completed,
    AlreadyActive,
    Cached,
}

#[derive(Debug)]
pub struct BatchResult {
    pub subject_id: String,
    pub result: Result<OpenOutcome, StreamError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkbenchSettings {
    pub batch_delay: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for WorkbenchSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for WorkbenchSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch_delay: config.batch_delay,
            idle_timeout: config.stream_idle_timeout,
        }
    }
}

#[derive(Debug, Default)]
struct Selection {
    viewed: Option<String>,
    /// Insertion-ordered, no duplicates.
    batch: Vec<String>,
}

/// Drives adjudication streams into the session store.
pub struct Workbench<T: AgentTransport> {
    transport: Arc<T>,
    store: SessionStore,
    settings: WorkbenchSettings,
    updates: Option<mpsc::UnboundedSender<SessionUpdate>>,
    selection: Arc<Mutex<Selection>>,
}

impl<T: AgentTransport> Clone for Workbench<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            store: self.store.clone(),
            settings: self.settings,
            updates: self.updates.clone(),
            selection: Arc::clone(&self.selection),
        }
    }
}

impl<T: AgentTransport> Workbench<T> {
    pub fn new(transport: T, store: SessionStore, settings: WorkbenchSettings) -> Self {
        Self {
            transport: Arc::new(transport),
            store,
            settings,
            updates: None,
            selection: Arc::new(Mutex::new(Selection::default())),
        }
    }

    /// Returns a receiver for every [`SessionUpdate`] published from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.updates = Some(tx);
        rx
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn settings(&self) -> WorkbenchSettings {
        self.settings
    }

    pub fn projection(&self, subject_id: &str) -> Option<SessionProjection> {
        self.store.get(subject_id).map(|state| state.projection())
    }

    pub async fn open_stream(
        &self,
        subject_id: &str,
        force: bool,
    ) -> Result<OpenOutcome, StreamError> {
        self.open_stream_with_cancel(subject_id, force, CancellationToken::new())
            .await
    }

    /// Runs one subject's stream to completion, failure, timeout or cancellation.
    ///
    /// Partial text and timeline survive a failed stream; the active flag is
    /// always cleared before returning, and also when the future is dropped
    /// mid-stream.
    pub async fn open_stream_with_cancel(
        &self,
        subject_id: &str,
        force: bool,
        cancel: CancellationToken,
    ) -> Result<OpenOutcome, StreamError> {
        match self.store.begin(subject_id, force) {
            BeginOutcome::Started => {}
            BeginOutcome::AlreadyActive => {
                tracing::debug!(subject_id, "stream already active; not reopening");
                return Ok(OpenOutcome::AlreadyActive);
            }
            BeginOutcome::Cached => {
                tracing::debug!(subject_id, "serving cached result");
                return Ok(OpenOutcome::Cached);
            }
        }

        tracing::info!(subject_id, force, "adjudication started");
        self.emit(SessionUpdate::StreamOpened {
            subject_id: subject_id.to_string(),
        });
        let lease = StreamLease {
            workbench: self,
            subject_id,
            settled: false,
        };

        let result = self.consume(subject_id, &cancel).await;
        match &result {
            Ok(()) => tracing::info!(subject_id, "adjudication finished"),
            Err(StreamError::Cancelled) => tracing::info!(subject_id, "adjudication cancelled"),
            Err(err) => tracing::warn!(subject_id, error = %err, "adjudication stream failed"),
        }
        lease.settle(result.as_ref().err().map(ToString::to_string));

        result.map(|()| OpenOutcome::Completed)
    }

    /// Clears the active flag and announces the close.
    fn close_stream(&self, subject_id: &str, error: Option<String>) {
        self.store.finish(subject_id, error.clone());
        self.emit(SessionUpdate::StreamClosed {
            subject_id: subject_id.to_string(),
            error,
        });
    }

    async fn consume(&self, subject_id: &str, cancel: &CancellationToken) -> Result<(), StreamError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            opened = self.transport.open_adjudication(subject_id) => {
                opened.map_err(|err| StreamError::Transport(format!("{err:#}")))?
            }
        };

        let mut parser = StreamParser::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                next = next_chunk(&mut stream, self.settings.idle_timeout) => next?,
            };
            let Some(chunk) = chunk else {
                break;
            };
            for event in parser.process(&chunk) {
                if let Some(effect) = self.store.apply(subject_id, &event) {
                    self.publish(subject_id, effect);
                }
            }
        }

        let remainder = parser.flush();
        if !remainder.trim().is_empty() {
            tracing::debug!(
                subject_id,
                bytes = remainder.len(),
                "stream ended inside an unterminated frame"
            );
        }
        Ok(())
    }

    /// Spawns the stream on the runtime; streams for different subjects run concurrently.
    pub fn spawn_stream(
        &self,
        subject_id: &str,
        force: bool,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<OpenOutcome, StreamError>>
    where
        T: 'static,
    {
        let workbench = self.clone();
        let subject_id = subject_id.to_string();
        tokio::spawn(async move {
            workbench
                .open_stream_with_cancel(&subject_id, force, cancel)
                .await
        })
    }

    /// Forced re-run of each subject in order, pausing between subjects.
    ///
    /// A failing subject is recorded and the batch moves on.
    pub async fn run_batch(&self, subject_ids: &[String]) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(subject_ids.len());
        for (index, subject_id) in subject_ids.iter().enumerate() {
            self.select(subject_id);
            let result = self.open_stream(subject_id, true).await;
            results.push(BatchResult {
                subject_id: subject_id.clone(),
                result,
            });
            let more = index + 1 < subject_ids.len();
            if more && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
        }
        results
    }

    pub async fn run_selected(&self) -> Vec<BatchResult> {
        let ids = self.selected_ids();
        self.run_batch(&ids).await
    }

    fn selection(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks a subject as the one being viewed.
    pub fn select(&self, subject_id: &str) {
        self.selection().viewed = Some(subject_id.to_string());
    }

    /// Views a subject: marks it viewed and streams it unless a result is
    /// already cached or a stream is in flight.
    pub async fn view_subject(&self, subject_id: &str) -> Result<OpenOutcome, StreamError> {
        self.select(subject_id);
        self.open_stream(subject_id, false).await
    }

    pub fn viewed(&self) -> Option<String> {
        self.selection().viewed.clone()
    }

    /// Returns whether the subject is selected after the toggle.
    pub fn toggle_selection(&self, subject_id: &str) -> bool {
        let mut selection = self.selection();
        if let Some(pos) = selection.batch.iter().position(|id| id == subject_id) {
            selection.batch.remove(pos);
            false
        } else {
            selection.batch.push(subject_id.to_string());
            true
        }
    }

    /// Selects every id, or clears the selection when all are already selected.
    pub fn select_all(&self, subject_ids: &[String]) {
        let mut selection = self.selection();
        let all_selected = !subject_ids.is_empty()
            && subject_ids.iter().all(|id| selection.batch.contains(id));
        selection.batch.clear();
        if !all_selected {
            for id in subject_ids {
                if !selection.batch.contains(id) {
                    selection.batch.push(id.clone());
                }
            }
        }
    }

    pub fn selected_ids(&self) -> Vec<String> {
        self.selection().batch.clone()
    }

    pub fn close_case(&self, subject_id: &str) -> Result<(), CaseError> {
        self.set_case_status(subject_id, CaseStatus::Closed)
    }

    pub fn escalate(&self, subject_id: &str) -> Result<(), CaseError> {
        self.set_case_status(subject_id, CaseStatus::Escalated)
    }

    fn set_case_status(&self, subject_id: &str, status: CaseStatus) -> Result<(), CaseError> {
        let outcome = self.store.update(subject_id, |state| {
            if state.is_active {
                return Err(CaseError::StreamActive(subject_id.to_string()));
            }
            state.case_status = status;
            Ok(())
        });
        let outcome = outcome.unwrap_or_else(|| Err(CaseError::UnknownSubject(subject_id.to_string())));
        if outcome.is_ok() {
            tracing::info!(subject_id, ?status, "case status changed");
        }
        outcome
    }

    fn publish(&self, subject_id: &str, effect: EventEffect) {
        if effect.is_empty() || self.updates.is_none() {
            return;
        }
        match effect.text {
            Some(TextUpdate::Append(delta)) => self.emit(SessionUpdate::TextAppended {
                subject_id: subject_id.to_string(),
                delta,
            }),
            Some(TextUpdate::Replace(text)) => self.emit(SessionUpdate::TextReplaced {
                subject_id: subject_id.to_string(),
                text,
            }),
            Some(TextUpdate::Unchanged) | None => {}
        }
        if effect.timeline_changed {
            let (len, latest) = self
                .store
                .update(subject_id, |state| {
                    (state.timeline.len(), state.timeline.last().cloned())
                })
                .unwrap_or_default();
            self.emit(SessionUpdate::TimelineChanged {
                subject_id: subject_id.to_string(),
                len,
                latest,
            });
        }
        if let Some(verdict) = effect.verdict {
            self.emit(SessionUpdate::VerdictChanged {
                subject_id: subject_id.to_string(),
                verdict,
            });
        }
    }

    fn emit(&self, update: SessionUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }
}

const ABANDONED: &str = "stream abandoned";

/// Owns a subject's active flag for the lifetime of one stream.
///
/// Dropping it unsettled (the stream future was dropped or its task aborted)
/// records the stream as abandoned so the subject can be reopened.
struct StreamLease<'a, T: AgentTransport> {
    workbench: &'a Workbench<T>,
    subject_id: &'a str,
    settled: bool,
}

impl<T: AgentTransport> StreamLease<'_, T> {
    fn settle(mut self, error: Option<String>) {
        self.settled = true;
        self.workbench.close_stream(self.subject_id, error);
    }
}

impl<T: AgentTransport> Drop for StreamLease<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::warn!(subject_id = self.subject_id, "adjudication future dropped mid-stream");
        self.workbench
            .close_stream(self.subject_id, Some(ABANDONED.to_string()));
    }
}

async fn next_chunk(
    stream: &mut ByteStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<Bytes>, StreamError> {
    let item = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| StreamError::IdleTimeout(limit))?,
        None => stream.next().await,
    };
    item.transpose()
        .map_err(|err| StreamError::Transport(format!("{err:#}")))
}

#[cfg(test)]
mod tests;

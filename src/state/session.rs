use super::reconciler::{TextReconciler, TextUpdate};
use super::timeline::{Timeline, TimelineEvent};
use super::verdict::VerdictStatus;
use crate::tool_titles::humanize_tool_name;
use crate::types::{Article, EventKind, StreamEvent, Verdict};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    #[default]
    Open,
    Closed,
    Escalated,
}

/// Everything one event changed, for publishing to subscribers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventEffect {
    pub text: Option<TextUpdate>,
    pub timeline_changed: bool,
    pub verdict: Option<Verdict>,
}

impl EventEffect {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && !self.timeline_changed && self.verdict.is_none()
    }
}

/// Read-only view handed to presentation code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionProjection {
    pub visible_text: String,
    pub verdict: Option<Verdict>,
    pub verdict_status: VerdictStatus,
    pub articles: Vec<Article>,
    pub timeline: Vec<TimelineEvent>,
    pub is_active: bool,
    pub case_status: CaseStatus,
    pub last_error: Option<String>,
}

/// Per-subject analysis state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    reconciler: TextReconciler,
    pub articles: Vec<Article>,
    pub timeline: Timeline,
    pub is_active: bool,
    pub case_status: CaseStatus,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible_text(&self) -> &str {
        self.reconciler.visible_text()
    }

    pub fn raw_text(&self) -> &str {
        self.reconciler.raw_text()
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.reconciler.verdict()
    }

    pub fn verdict_status(&self) -> &VerdictStatus {
        self.reconciler.verdict_status()
    }

    pub fn projection(&self) -> SessionProjection {
        SessionProjection {
            visible_text: self.visible_text().to_string(),
            verdict: self.verdict().cloned(),
            verdict_status: self.verdict_status().clone(),
            articles: self.articles.clone(),
            timeline: self.timeline.events().to_vec(),
            is_active: self.is_active,
            case_status: self.case_status,
            last_error: self.last_error.clone(),
        }
    }

    /// Reduces one event into the state in place.
    pub fn apply(&mut self, event: &StreamEvent) -> EventEffect {
        let mut effect = EventEffect::default();
        match &event.kind {
            EventKind::Token => {
                let Some(delta) = event.delta() else {
                    tracing::debug!(payload = ?event.payload, "token event without a string delta");
                    return effect;
                };
                let outcome = self.reconciler.push_delta(delta);
                effect.timeline_changed = self.timeline.apply_text(&outcome.text, event.received_at);
                if outcome.text != TextUpdate::Unchanged {
                    effect.text = Some(outcome.text);
                }
                if let Some(verdict) = outcome.verdict {
                    if let Some(articles) = &verdict.articles {
                        self.articles = articles.clone();
                    }
                    effect.verdict = Some(verdict);
                }
            }
            EventKind::ToolCallStarted => {
                let tool = event.tool_name().unwrap_or("tool").to_string();
                let id = event
                    .effective_id()
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        let prefix = format!("{tool}-{}", event.received_at.timestamp_millis());
                        self.timeline.next_id(&prefix)
                    });
                let title = humanize_tool_name(&tool);
                effect.timeline_changed =
                    self.timeline
                        .push_tool(id, title, tool, event.received_at);
            }
            EventKind::RunStarted => {
                let started_at = event
                    .payload
                    .f64_field("ts")
                    .and_then(epoch_seconds)
                    .unwrap_or(event.received_at);
                self.timeline.start_run(started_at);
                effect.timeline_changed = true;
            }
            EventKind::RunFinished => {
                effect.timeline_changed = self.timeline.finish_run(event.received_at);
            }
            EventKind::Message | EventKind::Other(_) => {
                tracing::debug!(
                    kind = event.kind.as_str(),
                    payload = ?event.payload,
                    "passthrough event"
                );
            }
        }
        effect
    }

    /// Settles end-of-stream state; a never-closed verdict fence becomes malformed.
    pub fn finish(&mut self, error: Option<String>) {
        self.reconciler.finish();
        self.is_active = false;
        self.last_error = error;
    }
}

/// Pure reducer form of [`SessionState::apply`].
pub fn reduce(mut state: SessionState, event: &StreamEvent) -> SessionState {
    state.apply(event);
    state
}

fn epoch_seconds(ts: f64) -> Option<DateTime<Utc>> {
    if !ts.is_finite() {
        return None;
    }
    let millis = (ts * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

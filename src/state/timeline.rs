use super::reconciler::TextUpdate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEvent {
    /// A tool invocation announced by the agent.
    Tool {
        id: String,
        title: String,
        tool: String,
        timestamp: DateTime<Utc>,
    },
    /// Narrative text. Only the trailing entry grows.
    Text {
        id: String,
        markdown: String,
        timestamp: DateTime<Utc>,
    },
    Run {
        id: String,
        status: RunStatus,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
    },
}

impl TimelineEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::Tool { id, .. } | Self::Text { id, .. } | Self::Run { id, .. } => id,
        }
    }
}

/// Ordered, deduplicated UI events for one subject's session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
    next_seq: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&TimelineEvent> {
        self.events.last()
    }

    fn contains_id(&self, id: &str) -> bool {
        self.events.iter().any(|event| event.id() == id)
    }

    pub(crate) fn next_id(&mut self, prefix: &str) -> String {
        self.next_seq += 1;
        format!("{prefix}-{}", self.next_seq)
    }

    /// Appends a tool entry. Returns false when the id is already present.
    pub fn push_tool(
        &mut self,
        id: String,
        title: String,
        tool: String,
        timestamp: DateTime<Utc>,
    ) -> bool {
        if self.contains_id(&id) {
            return false;
        }
        self.events.push(TimelineEvent::Tool {
            id,
            title,
            tool,
            timestamp,
        });
        true
    }

    pub fn start_run(&mut self, started_at: DateTime<Utc>) -> String {
        let id = self.next_id("run");
        self.events.push(TimelineEvent::Run {
            id: id.clone(),
            status: RunStatus::Running,
            started_at,
            finished_at: None,
        });
        id
    }

    /// Completes the most recent running marker. Returns false when none is open.
    pub fn finish_run(&mut self, finished_at: DateTime<Utc>) -> bool {
        let open = self.events.iter_mut().rev().find_map(|event| match event {
            TimelineEvent::Run {
                status,
                finished_at: finished,
                ..
            } if *status == RunStatus::Running => Some((status, finished)),
            _ => None,
        });
        match open {
            Some((status, finished)) => {
                *status = RunStatus::Complete;
                *finished = Some(finished_at);
                true
            }
            None => false,
        }
    }

    /// Routes a reconciler update into the trailing text entry.
    ///
    /// Text entries are consecutive slices of the visible text. A replacement
    /// rewrites only the trailing slice; earlier entries stay as they were.
    pub fn apply_text(&mut self, update: &TextUpdate, timestamp: DateTime<Utc>) -> bool {
        match update {
            TextUpdate::Unchanged => false,
            TextUpdate::Append(suffix) => {
                self.active_text(timestamp).push_str(suffix);
                true
            }
            TextUpdate::Replace(full) => {
                let trailing_text = matches!(self.events.last(), Some(TimelineEvent::Text { .. }));
                let settled = self.settled_text(trailing_text);
                let tail = &full[settled_end(&settled, full)..];
                if !trailing_text && tail.is_empty() {
                    return false;
                }
                let markdown = self.active_text(timestamp);
                markdown.clear();
                markdown.push_str(tail);
                true
            }
        }
    }

    /// Text shown by every entry a replacement must leave alone.
    fn settled_text(&self, trailing_text: bool) -> String {
        let end = if trailing_text {
            self.events.len() - 1
        } else {
            self.events.len()
        };
        self.events[..end]
            .iter()
            .filter_map(|event| match event {
                TimelineEvent::Text { markdown, .. } => Some(markdown.as_str()),
                _ => None,
            })
            .collect()
    }

    fn active_text(&mut self, timestamp: DateTime<Utc>) -> &mut String {
        if !matches!(self.events.last(), Some(TimelineEvent::Text { .. })) {
            let id = self.next_id("text");
            self.events.push(TimelineEvent::Text {
                id,
                markdown: String::new(),
                timestamp,
            });
        }
        match self.events.last_mut() {
            Some(TimelineEvent::Text { markdown, .. }) => markdown,
            _ => unreachable!("trailing text entry was just ensured"),
        }
    }
}

/// Byte offset in `full` where text not covered by `settled` begins.
///
/// The visible text is trimmed once a verdict block closes, so leading
/// whitespace that settled entries still show may be gone from `full`.
fn settled_end(settled: &str, full: &str) -> usize {
    if full.starts_with(settled) {
        return settled.len();
    }
    let lead = full.len() - full.trim_start().len();
    let settled = settled.trim_start();
    let common: usize = settled
        .chars()
        .zip(full[lead..].chars())
        .take_while(|(a, b)| a == b)
        .map(|(ch, _)| ch.len_utf8())
        .sum();
    if common < settled.len() {
        tracing::debug!(
            settled_len = settled.len(),
            common,
            "replacement cuts into settled timeline text"
        );
    }
    lead + common
}

use super::verdict::{excise, Extraction, FenceScanner, VerdictStatus};
use crate::types::Verdict;

/// What a text region showing the previous visible text must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextUpdate {
    Unchanged,
    /// New visible text extends the shown text by this suffix.
    Append(String),
    /// Shown text is no longer a prefix; redraw the region with this text.
    Replace(String),
}

/// Turns the growing token accumulator into incremental visible-text updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextReconciler {
    raw: String,
    shown: String,
    scanner: FenceScanner,
    verdict: Option<Verdict>,
    status: VerdictStatus,
}

/// Everything a single delta changed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaOutcome {
    pub text: TextUpdate,
    /// Set when this delta produced a newly parsed verdict.
    pub verdict: Option<Verdict>,
}

impl TextReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_delta(&mut self, delta: &str) -> DeltaOutcome {
        self.raw.push_str(delta);
        let fence = self.scanner.scan(&self.raw);
        let Extraction {
            visible,
            verdict,
            status,
        } = excise(&self.raw, fence);

        let fresh_verdict = match verdict {
            Some(verdict) if self.verdict.as_ref() != Some(&verdict) => {
                self.verdict = Some(verdict.clone());
                Some(verdict)
            }
            _ => None,
        };
        // A parsed verdict is kept even when the latest scan has none.
        if self.verdict.is_none() || status == VerdictStatus::Parsed {
            self.status = status;
        }

        let text = diff_visible(&self.shown, &visible);
        self.shown = visible;
        DeltaOutcome {
            text,
            verdict: fresh_verdict,
        }
    }

    /// Settles the verdict state once no more deltas will arrive.
    pub fn finish(&mut self) -> &VerdictStatus {
        if self.status == VerdictStatus::Pending {
            self.status = VerdictStatus::Malformed {
                error: "verdict block was never closed".to_string(),
            };
        }
        &self.status
    }

    pub fn raw_text(&self) -> &str {
        &self.raw
    }

    pub fn visible_text(&self) -> &str {
        &self.shown
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    pub fn verdict_status(&self) -> &VerdictStatus {
        &self.status
    }
}

pub fn diff_visible(shown: &str, visible: &str) -> TextUpdate {
    if visible == shown {
        return TextUpdate::Unchanged;
    }
    match visible.strip_prefix(shown) {
        Some(suffix) => TextUpdate::Append(suffix.to_string()),
        None => TextUpdate::Replace(visible.to_string()),
    }
}

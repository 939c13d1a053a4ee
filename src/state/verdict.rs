use crate::types::Verdict;
use serde::{Deserialize, Serialize};

const OPEN_MARKER: &str = "```json";
const CLOSE_MARKER: &str = "\n```";

/// Where the verdict block stands for one subject's accumulated text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VerdictStatus {
    /// No fence seen.
    #[default]
    Absent,
    /// Fence opened and still being written.
    Pending,
    /// Fence closed (or the stream ended) without a usable verdict.
    Malformed { error: String },
    Parsed,
}

/// Byte spans of a detected fence within the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fence {
    /// Marker found at `start`; the closing fence has not arrived.
    Open { start: usize },
    /// Whole block including both fences, plus the interior body.
    Closed { start: usize, end: usize, body: (usize, usize) },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Outside { resume_at: usize },
    Inside { start: usize, body_at: usize, resume_at: usize },
    Closed { start: usize, end: usize, body_at: usize, body_end: usize },
}

/// Two-state fence scanner that resumes where the previous call stopped.
///
/// Equivalent to taking the first match of `` ```json\n(.*?)\n``` `` over the
/// whole accumulator, without rescanning text that cannot start a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceScanner {
    state: ScanState,
}

impl Default for FenceScanner {
    fn default() -> Self {
        Self {
            state: ScanState::Outside { resume_at: 0 },
        }
    }
}

impl FenceScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances over `text`, which must extend the text of every previous call.
    pub fn scan(&mut self, text: &str) -> Option<Fence> {
        loop {
            match self.state {
                ScanState::Outside { resume_at } => {
                    let Some(found) = text[resume_at..].find(OPEN_MARKER) else {
                        self.state = ScanState::Outside {
                            resume_at: overlap_start(text, resume_at, OPEN_MARKER.len()),
                        };
                        return None;
                    };
                    let start = resume_at + found;
                    let after = start + OPEN_MARKER.len();
                    match text.as_bytes().get(after) {
                        None => {
                            // Marker at the very end: may still become an opener.
                            self.state = ScanState::Outside { resume_at: start };
                            return Some(Fence::Open { start });
                        }
                        Some(b'\n') => {
                            self.state = ScanState::Inside {
                                start,
                                body_at: after + 1,
                                resume_at: after + 1,
                            };
                        }
                        Some(_) => {
                            self.state = ScanState::Outside { resume_at: start + 1 };
                        }
                    }
                }
                ScanState::Inside {
                    start,
                    body_at,
                    resume_at,
                } => {
                    let Some(found) = text[resume_at..].find(CLOSE_MARKER) else {
                        self.state = ScanState::Inside {
                            start,
                            body_at,
                            resume_at: overlap_start(text, resume_at, CLOSE_MARKER.len()),
                        };
                        return Some(Fence::Open { start });
                    };
                    let body_end = resume_at + found;
                    self.state = ScanState::Closed {
                        start,
                        end: body_end + CLOSE_MARKER.len(),
                        body_at,
                        body_end,
                    };
                }
                ScanState::Closed {
                    start,
                    end,
                    body_at,
                    body_end,
                } => {
                    return Some(Fence::Closed {
                        start,
                        end,
                        body: (body_at, body_end),
                    });
                }
            }
        }
    }
}

/// Earliest offset where a marker of `marker_len` bytes could still begin,
/// given that nothing before `floor` can.
fn overlap_start(text: &str, floor: usize, marker_len: usize) -> usize {
    let mut at = text.len().saturating_sub(marker_len - 1).max(floor);
    while !text.is_char_boundary(at) {
        at -= 1;
    }
    at.max(floor)
}

/// Result of excising the verdict fence from an accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub visible: String,
    pub verdict: Option<Verdict>,
    pub status: VerdictStatus,
}

/// Computes visible text and verdict for `raw` given an already-advanced fence.
pub fn excise(raw: &str, fence: Option<Fence>) -> Extraction {
    match fence {
        None => Extraction {
            visible: raw.to_string(),
            verdict: None,
            status: VerdictStatus::Absent,
        },
        Some(Fence::Open { start }) => Extraction {
            visible: raw[..start].to_string(),
            verdict: None,
            status: VerdictStatus::Pending,
        },
        Some(Fence::Closed { start, end, body }) => {
            let mut visible = String::with_capacity(raw.len() - (end - start));
            visible.push_str(&raw[..start]);
            visible.push_str(&raw[end..]);
            let visible = visible.trim().to_string();
            match parse_verdict(&raw[body.0..body.1]) {
                Ok(verdict) => Extraction {
                    visible,
                    verdict: Some(verdict),
                    status: VerdictStatus::Parsed,
                },
                Err(error) => Extraction {
                    visible,
                    verdict: None,
                    status: VerdictStatus::Malformed { error },
                },
            }
        }
    }
}

/// Stateless extraction over a whole accumulator. Repeated calls on the same
/// input always agree.
pub fn extract(raw: &str) -> Extraction {
    let fence = FenceScanner::new().scan(raw);
    excise(raw, fence)
}

/// Parses a fence body. Only JSON objects qualify as verdicts.
pub fn parse_verdict(body: &str) -> Result<Verdict, String> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("verdict block is not a JSON object".to_string());
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

mod events;
mod verdict;

pub use events::{EventKind, Payload, StreamEvent};
pub use verdict::{Article, MatchScore, MatchStatus, Sentiment, Verdict};

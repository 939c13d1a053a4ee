pub mod reconciler;
pub mod session;
pub mod store;
pub mod timeline;
pub mod verdict;

pub use reconciler::{TextReconciler, TextUpdate};
pub use session::{reduce, CaseStatus, EventEffect, SessionProjection, SessionState};
pub use store::{BeginOutcome, SessionStore};
pub use timeline::{RunStatus, Timeline, TimelineEvent};
pub use verdict::{extract, Extraction, VerdictStatus};

pub mod api;
pub mod config;
pub mod profile;
pub mod state;
pub mod tool_titles;
pub mod types;
pub mod util;
pub mod workbench;

#[cfg(test)]
mod test_support;

pub use workbench::{
    BatchResult, CaseError, OpenOutcome, SessionUpdate, StreamError, Workbench, WorkbenchSettings,
};

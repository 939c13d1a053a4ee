use crate::api::client::{AgentTransport, ByteStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One scripted item of a mock stream.
#[derive(Debug, Clone)]
pub enum MockChunk {
    Data(String),
    /// Transport failure surfaced mid-stream.
    Fail(String),
    /// Never yields again; used to exercise idle timeouts.
    Stall,
}

/// Scripted transport: each subject replays its chunks on every open.
#[derive(Clone, Default)]
pub struct MockTransport {
    scripts: Arc<Mutex<HashMap<String, Vec<MockChunk>>>>,
    opens: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts plain data chunks, passed through byte for byte.
    pub fn with_chunks<I, S>(self, subject_id: &str, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = chunks
            .into_iter()
            .map(|chunk| MockChunk::Data(chunk.into()))
            .collect();
        self.with_script(subject_id, script)
    }

    pub fn with_script(self, subject_id: &str, script: Vec<MockChunk>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subject_id.to_string(), script);
        self
    }

    /// Subject ids in the order their streams were opened.
    pub fn opened(&self) -> Vec<String> {
        self.opens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn open_count(&self, subject_id: &str) -> usize {
        self.opened().iter().filter(|id| *id == subject_id).count()
    }
}

#[async_trait]
impl AgentTransport for MockTransport {
    async fn open_adjudication(&self, subject_id: &str) -> Result<ByteStream> {
        self.opens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subject_id.to_string());
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject_id)
            .cloned()
            .ok_or_else(|| anyhow!("MockTransport: no script for subject '{subject_id}'"))?;

        let items = stream::iter(script).flat_map(|chunk| match chunk {
            MockChunk::Data(text) => stream::iter(vec![Ok(Bytes::from(text))]).boxed(),
            MockChunk::Fail(message) => stream::iter(vec![Err(anyhow!(message))]).boxed(),
            MockChunk::Stall => stream::pending().boxed(),
        });
        Ok(Box::pin(items))
    }
}

/// Formats one server-push frame.
pub fn sse_frame(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// A `token` frame whose delta is JSON-escaped.
pub fn token_frame(delta: &str) -> String {
    sse_frame("token", &serde_json::json!({ "delta": delta }).to_string())
}

pub fn tool_frame(tool: &str, id: &str) -> String {
    format!(
        "event: tool_call_started\nid: {id}\ndata: {}\n\n",
        serde_json::json!({ "tool": tool })
    )
}

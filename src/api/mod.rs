pub mod client;
pub mod logging;
pub mod mock_client;
pub mod stream;

pub use client::{AgentTransport, ApiClient, ByteStream};
pub use mock_client::{MockChunk, MockTransport};

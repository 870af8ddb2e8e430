//! Downstream transport adapters.
//!
//! The stdio, SSE and streamable HTTP clients speak MCP's JSON-RPC dialect
//! to real servers; the in-memory client is a deterministic stand-in for
//! tests and local wiring.

mod event_stream;
mod factory;
mod jsonrpc;
pub mod memory;
mod sse;
mod stdio;
mod streamable_http;

pub use factory::TransportClientFactory;
pub use memory::{InMemoryClientFactory, InMemoryDownstreamClient};
pub use sse::SseClient;
pub use stdio::StdioClient;
pub use streamable_http::StreamableHttpClient;

//! GenAI client instrumentation as an explicit decorator.
//!
//! Instead of patching a client library's method table at runtime,
//! [`InstrumentedClient`] wraps any [`ChatClient`] behind the same trait and
//! is composed at construction time. Spans are emitted through the span
//! bridge's [`span_bridge::TraceBackend`] boundary with GenAI
//! semantic-convention attributes.

pub mod attributes;
mod client;
mod instrumented;

/// Log target for content capture and this crate's diagnostics.
pub const TARGET_NAME: &str = "span-bridge-genai";

pub use client::{
    ChatClient, ChatRequest, ChatResponse, ClientError, EmbeddingRequest, EmbeddingResponse,
    Message,
};
pub use instrumented::InstrumentedClient;

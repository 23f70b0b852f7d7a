//! External service clients
//!
//! Provides the completion provider client and the web search sidecar
//! client, each behind a trait so the orchestrator and tools can be
//! tested against scripted backends.

pub mod llm;
pub mod search;

pub use llm::{
    Completion, CompletionBackend, CompletionClient, TextDeltaStream, ToolChoice,
    DEFAULT_CHAT_TITLE,
};
pub use search::{SearchBackend, SearchClient, SearchResult};

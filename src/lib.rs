//! Hermes - Multi-Agent Conversation Orchestrator
//!
//! An LLM-driven chat service whose core is an iterative tool-calling
//! loop: given a user prompt, the model decides whether to call tools
//! (web search, page reads, URL fetches, and a persisted registry of
//! prompt-specialized sub-agents) and iterates under token and iteration
//! budgets until it produces a final answer, persisting every step to
//! chat history.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Types**: Core data structures (ChatMessage, SubAgent, StreamFrame)
//! - **Storage**: libsql-backed persistence for chats, messages, and the
//!   sub-agent registry with prompt revision history
//! - **Services**: Completion provider and web search clients, each
//!   behind a trait
//! - **Tools**: Schemas and dispatch for the eight model-callable tools
//! - **Orchestration**: The budget-bounded turn state machine
//! - **API**: Axum HTTP surface streaming turns over SSE
//!
//! # Example
//!
//! ```ignore
//! use hermes_core::{
//!     CompletionClient, HermesConfig, LibsqlStorage, Orchestrator, SearchClient,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> hermes_core::Result<()> {
//!     let config = HermesConfig::load(&HermesConfig::default_path())?;
//!     let storage = Arc::new(LibsqlStorage::new_local("hermes.db").await?);
//!     let completions = Arc::new(CompletionClient::new(config.llm.clone())?);
//!     let search = Arc::new(SearchClient::new(config.search.clone())?);
//!
//!     let orchestrator = Orchestrator::new(
//!         storage,
//!         completions,
//!         search,
//!         config.limits,
//!         config.sub_agents.clone(),
//!     );
//!
//!     let (chat_id, mut frames) = orchestrator
//!         .start_chat(user_id, "search for today's weather in Seoul".into())
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod orchestration;
pub mod services;
pub mod storage;
pub mod tools;
pub mod types;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, IdentityProvider, StaticTokenIdentity};
pub use config::HermesConfig;
pub use error::{HermesError, Result};
pub use orchestration::{Directive, FrameStream, Orchestrator};
pub use services::{
    Completion, CompletionBackend, CompletionClient, SearchBackend, SearchClient, SearchResult,
    ToolChoice,
};
pub use storage::{ConnectionMode, LibsqlStorage, StorageBackend};
pub use tools::{ToolOutcome, ToolRegistry};
pub use types::{
    Chat, ChatId, ChatMessage, MessageRecord, PromptUpdatePolicy, StreamFrame, SubAgent,
    SubAgentId, SubAgentRevision, TokenUsage, ToolCallRecord, UserId, UserRecord,
};

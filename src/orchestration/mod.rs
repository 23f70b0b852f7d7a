//! Conversation orchestration
//!
//! One turn of a chat is an LLM-driven tool-calling loop bounded by
//! iteration and token budgets. The loop lives in [`orchestrator`];
//! [`directives`] handles `@mention` and command-marker preprocessing of
//! the raw prompt before the first model call.

pub mod directives;
pub mod orchestrator;

pub use directives::Directive;
pub use orchestrator::{FrameStream, Orchestrator};

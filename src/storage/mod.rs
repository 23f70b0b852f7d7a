//! Storage layer for the Hermes orchestration service
//!
//! Provides the persistence abstraction and the libsql implementation for
//! users, chats, append-only message history, sub-agents, and sub-agent
//! prompt revisions.

pub mod libsql;

pub use libsql::{ConnectionMode, LibsqlStorage};

use crate::error::Result;
use crate::types::{
    Chat, ChatId, ChatMessage, MessageRecord, PromptUpdatePolicy, SubAgent, SubAgentId,
    SubAgentRevision, UserId, UserRecord,
};
use async_trait::async_trait;

/// Storage backend trait defining all required operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create a new user
    async fn create_user(&self, email: &str, display_name: &str) -> Result<UserRecord>;

    /// Retrieve a non-deleted user by ID
    async fn get_user(&self, id: UserId) -> Result<UserRecord>;

    /// Create a new chat owned by `author_id`
    async fn create_chat(&self, author_id: UserId, title: Option<String>) -> Result<Chat>;

    /// Retrieve a chat by ID
    async fn get_chat(&self, id: ChatId) -> Result<Chat>;

    /// Retrieve a chat, verifying it belongs to `author_id`
    async fn get_owned_chat(&self, id: ChatId, author_id: UserId) -> Result<Chat>;

    /// List a user's chats, most recently updated first
    async fn list_chats(&self, author_id: UserId) -> Result<Vec<Chat>>;

    /// Assign a chat's title
    async fn set_chat_title(&self, id: ChatId, title: &str) -> Result<()>;

    /// Append one message to a chat's history
    async fn append_message(&self, chat_id: ChatId, message: &ChatMessage)
        -> Result<MessageRecord>;

    /// Full message history of a chat, in append order
    async fn chat_history(&self, chat_id: ChatId) -> Result<Vec<MessageRecord>>;

    /// Create a sub-agent, or update the prompt of the non-deleted one with
    /// this name; a prompt change records a revision
    async fn upsert_sub_agent(&self, chat_id: ChatId, name: &str, prompt: &str)
        -> Result<SubAgent>;

    /// Retrieve a non-deleted sub-agent by ID
    async fn get_sub_agent(&self, id: SubAgentId) -> Result<SubAgent>;

    /// Look up a non-deleted sub-agent by exact name
    async fn find_sub_agent_by_name(&self, name: &str) -> Result<Option<SubAgent>>;

    /// List non-deleted sub-agents, newest first
    async fn list_sub_agents(&self) -> Result<Vec<SubAgent>>;

    /// The non-deleted sub-agent with the latest prompt mutation, if any
    async fn most_recently_updated_sub_agent(&self) -> Result<Option<SubAgent>>;

    /// Mutate a sub-agent's prompt under `policy`, recording a revision;
    /// the read, revision insert, and update commit atomically
    async fn update_sub_agent_prompt(
        &self,
        id: SubAgentId,
        incoming: &str,
        policy: PromptUpdatePolicy,
    ) -> Result<SubAgent>;

    /// Soft-delete a sub-agent; deleting an already-deleted one is a no-op
    async fn delete_sub_agent(&self, id: SubAgentId) -> Result<()>;

    /// Clear a sub-agent's soft-delete marker
    async fn restore_sub_agent(&self, id: SubAgentId) -> Result<()>;

    /// Revision rows for a sub-agent, ascending by creation time
    async fn sub_agent_revisions(&self, id: SubAgentId) -> Result<Vec<SubAgentRevision>>;
}

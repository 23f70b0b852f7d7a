//! Core data types for the Hermes orchestration service
//!
//! This module defines the fundamental data structures used throughout hermes:
//! chats, chat messages, tool calls, sub-agents and their revision history,
//! and the frames streamed back to callers during a turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users
///
/// Wraps a UUID to provide type safety and prevent mixing user IDs with
/// other UUID-based identifiers in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Create a new random user ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a user ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for chats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub Uuid);

impl ChatId {
    /// Create a new random chat ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a chat ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for sub-agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubAgentId(pub Uuid);

impl SubAgentId {
    /// Create a new random sub-agent ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a sub-agent ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SubAgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubAgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One model-emitted tool invocation
///
/// `arguments` is the raw JSON string exactly as the model produced it.
/// Handlers parse it defensively; a malformed payload becomes a structured
/// error result, never a panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Provider-assigned call id, echoed back on the tool-result message
    pub id: String,

    /// Tool function name
    pub name: String,

    /// Raw JSON arguments string
    pub arguments: String,
}

/// One element of a chat turn, tagged by role
///
/// Each variant carries only the fields valid for that role. A `tool`
/// message's `tool_call_id` must match a `tool_calls[].id` from the
/// immediately preceding assistant message in the same turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "role")]
pub enum ChatMessage {
    /// Orchestrator- or directive-injected instruction
    System {
        /// Instruction text
        content: String,
    },

    /// The user's literal prompt
    User {
        /// Prompt text
        content: String,
    },

    /// Model output: text, tool invocations, or both
    Assistant {
        /// Answer text, possibly empty when only tools were invoked
        content: String,

        /// Tool invocations, in model order
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRecord>,
    },

    /// Result of one tool invocation
    Tool {
        /// JSON result payload (or `{"error": …}` on handler failure)
        content: String,

        /// Id of the invoking tool call
        tool_call_id: String,

        /// Name of the tool that ran
        name: String,
    },
}

impl ChatMessage {
    /// Build a system message
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System {
            content: content.into(),
        }
    }

    /// Build a user message
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: content.into(),
        }
    }

    /// Build a plain-text assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Build an assistant message that invokes tools
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRecord>) -> Self {
        ChatMessage::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    /// Build a tool-result message linked to its invoking call
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        ChatMessage::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            name: name.into(),
        }
    }

    /// Wire role string for this message
    pub fn role(&self) -> &'static str {
        match self {
            ChatMessage::System { .. } => "system",
            ChatMessage::User { .. } => "user",
            ChatMessage::Assistant { .. } => "assistant",
            ChatMessage::Tool { .. } => "tool",
        }
    }

    /// Text content of this message
    pub fn content(&self) -> &str {
        match self {
            ChatMessage::System { content }
            | ChatMessage::User { content }
            | ChatMessage::Assistant { content, .. }
            | ChatMessage::Tool { content, .. } => content,
        }
    }

    /// Tool invocations carried by this message (empty for non-assistant roles)
    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        match self {
            ChatMessage::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Token usage reported by one completion call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the request messages
    #[serde(default)]
    pub prompt_tokens: u64,

    /// Tokens produced by the model
    #[serde(default)]
    pub completion_tokens: u64,

    /// Provider-reported total for the call
    #[serde(default)]
    pub total_tokens: u64,
}

/// A conversation owned by one user
///
/// Holds an ordered, append-only message history. Never deleted; the title
/// is assigned once from a model-generated summary of the first prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Unique chat id
    pub id: ChatId,

    /// Owning user
    pub author_id: UserId,

    /// Model-generated title, `None` until assigned
    pub title: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last append timestamp
    pub updated_at: DateTime<Utc>,
}

/// One persisted history row: a message plus its storage metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Monotonic row id, orders the history
    pub id: i64,

    /// Owning chat
    pub chat_id: ChatId,

    /// The message itself
    #[serde(flatten)]
    pub message: ChatMessage,

    /// Persist timestamp
    pub created_at: DateTime<Utc>,
}

/// A registered owner of chats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique user id
    pub id: UserId,

    /// Contact address, unique
    pub email: String,

    /// Presentation name
    pub display_name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Soft-delete marker; deleted users cannot start turns
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A persisted, named prompt specialization
///
/// Sub-agents are created and refined by the model during turns. `name` is
/// unique among non-deleted records; `chat_id` records provenance only and
/// is not an ownership boundary for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgent {
    /// Unique sub-agent id
    pub id: SubAgentId,

    /// Originating chat
    pub chat_id: ChatId,

    /// Unique name among non-deleted sub-agents
    pub name: String,

    /// Specialization prompt, mutable
    pub prompt: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last prompt-mutation timestamp
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SubAgent {
    /// Truncated prompt for listings, capped at `max_len` characters
    pub fn prompt_preview(&self, max_len: usize) -> String {
        self.prompt.chars().take(max_len).collect()
    }

    /// True when the record has not been soft-deleted
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// One pre-mutation snapshot of a sub-agent's prompt
///
/// Rows ordered ascending by `created_at`, followed by the current prompt,
/// reconstruct the full version chain. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentRevision {
    /// Monotonic row id
    pub id: i64,

    /// Owning sub-agent
    pub sub_agent_id: SubAgentId,

    /// Prompt value before the mutation
    pub old_prompt: String,

    /// Mutation timestamp
    pub created_at: DateTime<Utc>,
}

/// How `update_sub_agent` combines the incoming prompt with the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptUpdatePolicy {
    /// Join the new text onto the existing prompt (additive refinement)
    Append,

    /// Discard the existing prompt and store the new text
    Replace,
}

impl Default for PromptUpdatePolicy {
    fn default() -> Self {
        PromptUpdatePolicy::Append
    }
}

impl PromptUpdatePolicy {
    /// Combine an existing prompt with incoming text under this policy
    pub fn apply(&self, existing: &str, incoming: &str) -> String {
        match self {
            PromptUpdatePolicy::Append => {
                if existing.is_empty() {
                    incoming.to_string()
                } else {
                    format!("{}\n\n{}", existing, incoming)
                }
            }
            PromptUpdatePolicy::Replace => incoming.to_string(),
        }
    }
}

/// One frame of a turn's output stream
///
/// `chat_created` is only ever the first frame and only for new chats.
/// `done` is the end-of-turn sentinel; over SSE it maps to the literal
/// `[DONE]` data line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StreamFrame {
    /// Control frame carrying the id of a freshly created chat
    ChatCreated {
        /// The new chat's id
        chat_id: ChatId,
    },

    /// Content fragment of the final answer
    Delta {
        /// Text chunk
        text: String,
    },

    /// Provider failure that terminated the turn
    Error {
        /// Human-readable cause
        message: String,
    },

    /// End-of-turn sentinel
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation() {
        let id1 = SubAgentId::new();
        let id2 = SubAgentId::new();
        assert_ne!(id1, id2);

        let parsed = ChatId::from_string(&id1.to_string());
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_message_role_tagging() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");

        let msg = ChatMessage::assistant("done");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_tool_message_linkage() {
        let call = ToolCallRecord {
            id: "call_1".to_string(),
            name: "web_search".to_string(),
            arguments: r#"{"query":"weather"}"#.to_string(),
        };
        let assistant = ChatMessage::assistant_with_calls("", vec![call.clone()]);
        let result = ChatMessage::tool_result(&call.id, &call.name, r#"{"results":[]}"#);

        assert_eq!(assistant.tool_calls().len(), 1);
        match result {
            ChatMessage::Tool {
                tool_call_id, name, ..
            } => {
                assert_eq!(tool_call_id, assistant.tool_calls()[0].id);
                assert_eq!(name, "web_search");
            }
            _ => panic!("expected tool message"),
        }
    }

    #[test]
    fn test_message_round_trip() {
        let original = ChatMessage::assistant_with_calls(
            "checking",
            vec![ToolCallRecord {
                id: "call_9".to_string(),
                name: "fetch".to_string(),
                arguments: r#"{"url":"https://example.com"}"#.to_string(),
            }],
        );
        let json = serde_json::to_string(&original).unwrap();
        let restored: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_prompt_preview_truncation() {
        let mut agent = SubAgent {
            id: SubAgentId::new(),
            chat_id: ChatId::new(),
            name: "research bot".to_string(),
            prompt: "short".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        assert_eq!(agent.prompt_preview(200), "short");

        agent.prompt = "x".repeat(300);
        let preview = agent.prompt_preview(200);
        assert_eq!(preview.chars().count(), 200);
    }

    #[test]
    fn test_update_policy_apply() {
        let append = PromptUpdatePolicy::Append;
        assert_eq!(append.apply("old", "new"), "old\n\nnew");
        assert_eq!(append.apply("", "new"), "new");

        let replace = PromptUpdatePolicy::Replace;
        assert_eq!(replace.apply("old", "new"), "new");
    }

    #[test]
    fn test_stream_frame_tagging() {
        let frame = StreamFrame::Done;
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "done");

        let frame = StreamFrame::Delta {
            text: "hi".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["text"], "hi");
    }
}

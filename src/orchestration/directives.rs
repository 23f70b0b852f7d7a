//! Prompt directive preprocessing
//!
//! Detects command markers in the raw user prompt before the first model
//! call of a turn: `@name` mentions of stored sub-agents, `/edit`, and
//! `/search`. Each detected directive becomes an injected system
//! instruction forcing the corresponding tool call; the user's literal
//! prompt is persisted unmodified.

use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::{SubAgent, SubAgentId};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_-]+)").expect("Valid mention regex"));

/// One detected prompt directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `@name` resolved to a stored sub-agent; forces `run_sub_agent`
    MentionSubAgent { id: SubAgentId, name: String },

    /// `/edit` marker; forces `update_sub_agent`
    ForceUpdate,

    /// `/search` marker; forces `web_search`
    ForceSearch,
}

impl Directive {
    /// The system instruction injected for this directive
    pub fn instruction(&self) -> String {
        match self {
            Directive::MentionSubAgent { id, name } => format!(
                "The user mentioned the sub-agent '{}'. You must call the run_sub_agent \
                 tool with id '{}' and the user's request as the input before answering.",
                name, id
            ),
            Directive::ForceUpdate => {
                "The user asked to edit a sub-agent. You must call the update_sub_agent \
                 tool to apply the requested change before answering."
                    .to_string()
            }
            Directive::ForceSearch => {
                "The user asked for a web search. You must call the web_search tool \
                 before answering."
                    .to_string()
            }
        }
    }
}

/// Detect directives in a raw prompt
///
/// Mention tokens that resolve to no stored sub-agent are ignored, so
/// stray `@` characters (email addresses, handles) cost nothing.
pub async fn detect(storage: &dyn StorageBackend, prompt: &str) -> Result<Vec<Directive>> {
    let mut directives = Vec::new();

    for capture in MENTION.captures_iter(prompt) {
        let token = &capture[1];
        match resolve_mention(storage, token).await? {
            Some(agent) => directives.push(Directive::MentionSubAgent {
                id: agent.id,
                name: agent.name,
            }),
            None => debug!("Mention '@{}' matches no sub-agent, ignoring", token),
        }
    }

    if prompt.contains("/edit") {
        directives.push(Directive::ForceUpdate);
    }
    if prompt.contains("/search") {
        directives.push(Directive::ForceSearch);
    }

    Ok(directives)
}

/// Resolve a mention token against stored names
///
/// Names may contain spaces that mention tokens cannot, so a second
/// lookup retries with underscores mapped to spaces.
async fn resolve_mention(storage: &dyn StorageBackend, token: &str) -> Result<Option<SubAgent>> {
    if let Some(agent) = storage.find_sub_agent_by_name(token).await? {
        return Ok(Some(agent));
    }

    let spaced = token.replace('_', " ");
    if spaced != token {
        return storage.find_sub_agent_by_name(&spaced).await;
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ConnectionMode, LibsqlStorage};

    async fn storage_with(names: &[&str]) -> LibsqlStorage {
        // File-backed temp database: with libsql, each `:memory:` connection
        // opens a fresh empty database (see tests/common/mod.rs).
        let db_path = format!("/tmp/hermes_test_{}.db", uuid::Uuid::new_v4());
        let storage = LibsqlStorage::new_with_validation(ConnectionMode::Local(db_path), true)
            .await
            .expect("storage");
        let user = storage
            .create_user("directives@example.com", "Directives")
            .await
            .expect("user");
        let chat = storage
            .create_chat(user.id, Some("test".to_string()))
            .await
            .expect("chat");
        for name in names {
            storage
                .upsert_sub_agent(chat.id, name, "You are helpful.")
                .await
                .expect("agent");
        }
        storage
    }

    #[tokio::test]
    async fn test_mention_resolves_underscores_to_spaces() {
        let storage = storage_with(&["research bot"]).await;
        let directives = detect(&storage, "@research_bot summarize this")
            .await
            .expect("detect");

        assert_eq!(directives.len(), 1);
        match &directives[0] {
            Directive::MentionSubAgent { name, .. } => assert_eq!(name, "research bot"),
            other => panic!("unexpected directive: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mention_exact_name_wins() {
        let storage = storage_with(&["research_bot", "research bot"]).await;
        let directives = detect(&storage, "@research_bot go").await.expect("detect");

        assert_eq!(directives.len(), 1);
        match &directives[0] {
            Directive::MentionSubAgent { name, .. } => assert_eq!(name, "research_bot"),
            other => panic!("unexpected directive: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unresolved_mention_is_ignored() {
        let storage = storage_with(&[]).await;
        let directives = detect(&storage, "mail me at someone@example.com")
            .await
            .expect("detect");
        assert!(directives.is_empty());
    }

    #[tokio::test]
    async fn test_command_markers() {
        let storage = storage_with(&[]).await;

        let directives = detect(&storage, "/edit the helper to be terser")
            .await
            .expect("detect");
        assert_eq!(directives, vec![Directive::ForceUpdate]);

        let directives = detect(&storage, "/search rust 1.80 release notes")
            .await
            .expect("detect");
        assert_eq!(directives, vec![Directive::ForceSearch]);
    }

    #[test]
    fn test_instruction_names_the_tool() {
        assert!(Directive::ForceSearch.instruction().contains("web_search"));
        assert!(Directive::ForceUpdate
            .instruction()
            .contains("update_sub_agent"));

        let mention = Directive::MentionSubAgent {
            id: SubAgentId::new(),
            name: "research bot".to_string(),
        };
        assert!(mention.instruction().contains("run_sub_agent"));
    }
}

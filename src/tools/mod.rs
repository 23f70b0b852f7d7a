//! Tool schemas and dispatch
//!
//! The registry is built once per turn with explicit references to its
//! dependencies, so handlers stay testable in isolation. Dispatch never
//! raises: handler failures become `{"error": ...}` payloads fed back to
//! the model as tool results, and one failing call does not prevent its
//! siblings from executing.

pub mod http;
pub mod sub_agent;
pub mod web;

use crate::error::{HermesError, Result};
use crate::services::SearchBackend;
use crate::storage::StorageBackend;
use crate::types::{ChatId, PromptUpdatePolicy, SubAgent, ToolCallRecord};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Result of dispatching one tool call
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// JSON payload for the tool-result message
    pub content: String,

    /// The sub-agent loaded by a successful `run_sub_agent` call
    pub ran_sub_agent: Option<SubAgent>,
}

/// Per-turn tool registry
pub struct ToolRegistry {
    storage: Arc<dyn StorageBackend>,
    search: Arc<dyn SearchBackend>,
    http: reqwest::Client,
    chat_id: ChatId,
    update_policy: PromptUpdatePolicy,
    preview_len: usize,
}

impl ToolRegistry {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        search: Arc<dyn SearchBackend>,
        chat_id: ChatId,
        update_policy: PromptUpdatePolicy,
        preview_len: usize,
    ) -> Self {
        Self {
            storage,
            search,
            http: reqwest::Client::new(),
            chat_id,
            update_policy,
            preview_len,
        }
    }

    /// Schemas for every available tool
    pub fn schemas() -> Vec<Value> {
        vec![
            http::schema(),
            web::search_schema(),
            web::read_schema(),
            sub_agent::create_schema(),
            sub_agent::find_schema(),
            sub_agent::run_schema(),
            sub_agent::update_schema(),
            sub_agent::delete_schema(),
        ]
    }

    /// Schemas offered during the self-critique pass
    pub fn critique_schemas() -> Vec<Value> {
        vec![sub_agent::update_schema()]
    }

    /// Execute one tool call, converting any failure into an error payload
    pub async fn dispatch(&self, call: &ToolCallRecord) -> ToolOutcome {
        match self.execute(call).await {
            Ok((value, ran_sub_agent)) => ToolOutcome {
                content: value.to_string(),
                ran_sub_agent,
            },
            Err(e) => {
                warn!("Tool '{}' failed: {}", call.name, e);
                ToolOutcome {
                    content: json!({ "error": e.to_string() }).to_string(),
                    ran_sub_agent: None,
                }
            }
        }
    }

    async fn execute(&self, call: &ToolCallRecord) -> Result<(Value, Option<SubAgent>)> {
        match call.name.as_str() {
            "fetch" => {
                let args = parse_args(&call.arguments)?;
                Ok((http::execute(&self.http, args).await?, None))
            }
            "web_search" => {
                let args = parse_args(&call.arguments)?;
                Ok((web::execute_search(self.search.as_ref(), args).await?, None))
            }
            "web_read" => {
                let args = parse_args(&call.arguments)?;
                Ok((web::execute_read(self.search.as_ref(), args).await, None))
            }
            "create_sub_agent" => {
                let args = parse_args(&call.arguments)?;
                let value =
                    sub_agent::execute_create(self.storage.as_ref(), self.chat_id, args).await?;
                Ok((value, None))
            }
            // Arguments are ignored; the listing is always global
            "find_sub_agent" => {
                let value =
                    sub_agent::execute_find(self.storage.as_ref(), self.preview_len).await?;
                Ok((value, None))
            }
            "run_sub_agent" => {
                let args = parse_args(&call.arguments)?;
                let (value, agent) = sub_agent::execute_run(self.storage.as_ref(), args).await?;
                Ok((value, Some(agent)))
            }
            "update_sub_agent" => {
                let args = parse_args(&call.arguments)?;
                let value =
                    sub_agent::execute_update(self.storage.as_ref(), self.update_policy, args)
                        .await?;
                Ok((value, None))
            }
            "delete_sub_agent" => {
                let args = parse_args(&call.arguments)?;
                let value = sub_agent::execute_delete(self.storage.as_ref(), args).await?;
                Ok((value, None))
            }
            other => Err(HermesError::InvalidToolArgs(format!(
                "Unknown tool: {}",
                other
            ))),
        }
    }
}

fn parse_args<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| HermesError::InvalidToolArgs(e.to_string()))
}

//! Sub-agent registry tools
//!
//! Five tools over the persisted sub-agent registry: create (upsert by
//! name), find (list active agents), run (load a stored prompt for
//! execution), update (policy-driven prompt refinement), and delete
//! (soft). Prompt mutations record a revision holding the pre-mutation
//! text, so an agent's full version chain can be replayed.

use crate::error::{HermesError, Result};
use crate::storage::StorageBackend;
use crate::types::{ChatId, PromptUpdatePolicy, SubAgent, SubAgentId};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct CreateArgs {
    pub prompt: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RunArgs {
    pub id: String,
    pub input: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateArgs {
    pub id: String,
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteArgs {
    pub id: String,
}

pub fn create_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "create_sub_agent",
            "description": "Create a new sub-agent that handles a class of questions. If a sub-agent with the same name already exists, its prompt is updated instead.",
            "parameters": {
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "The prompt for the sub-agent. Describe the problem it handles and how it should resolve it."
                    },
                    "name": {
                        "type": "string",
                        "description": "The name for the sub-agent"
                    }
                },
                "required": ["prompt", "name"]
            }
        }
    })
}

pub fn find_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "find_sub_agent",
            "description": "List all sub-agents so the main agent can choose by name or prompt preview.",
            "parameters": {
                "type": "object",
                "properties": {},
                "required": []
            }
        }
    })
}

pub fn run_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "run_sub_agent",
            "description": "Execute a stored sub-agent's prompt with a given input to produce an output. After running, ALWAYS post-process with LLM to synthesize specialized, user-ready results. Chain additional tools if the sub-agent output requires verification or enrichment.",
            "parameters": {
                "type": "object",
                "properties": {
                    "id": {
                        "type": "string",
                        "description": "The sub-agent id to run"
                    },
                    "input": {
                        "type": "string",
                        "description": "The input/instruction for the sub-agent"
                    }
                },
                "required": ["id", "input"]
            }
        }
    })
}

pub fn update_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "update_sub_agent",
            "description": "Refine an existing sub-agent's prompt by id. The refinement is folded into the stored prompt; the previous version is kept in the revision history.",
            "parameters": {
                "type": "object",
                "properties": {
                    "id": {
                        "type": "string",
                        "description": "The sub-agent id to update"
                    },
                    "prompt": {
                        "type": "string",
                        "description": "The refinement to apply to the sub-agent's prompt"
                    }
                },
                "required": ["id", "prompt"]
            }
        }
    })
}

pub fn delete_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "delete_sub_agent",
            "description": "Delete a sub-agent by id.",
            "parameters": {
                "type": "object",
                "properties": {
                    "id": {
                        "type": "string",
                        "description": "The sub-agent id to delete"
                    }
                },
                "required": ["id"]
            }
        }
    })
}

/// Upsert a sub-agent by name
pub async fn execute_create(
    storage: &dyn StorageBackend,
    chat_id: ChatId,
    args: CreateArgs,
) -> Result<Value> {
    debug!("create_sub_agent '{}' in chat {}", args.name, chat_id);
    let agent = storage
        .upsert_sub_agent(chat_id, &args.name, &args.prompt)
        .await?;
    Ok(json!({ "sub_agent": agent }))
}

/// List active sub-agents with truncated prompt previews
pub async fn execute_find(storage: &dyn StorageBackend, preview_len: usize) -> Result<Value> {
    let agents = storage.list_sub_agents().await?;
    let items: Vec<Value> = agents
        .iter()
        .map(|agent| {
            json!({
                "id": agent.id,
                "name": agent.name,
                "prompt_preview": agent.prompt_preview(preview_len),
                "created_at": agent.created_at,
            })
        })
        .collect();
    Ok(json!({ "sub_agents": items }))
}

/// Load a sub-agent for execution; fails with NotFound when absent or deleted
///
/// Returns the payload plus the loaded record so the caller can remember
/// which agent ran this turn.
pub async fn execute_run(
    storage: &dyn StorageBackend,
    args: RunArgs,
) -> Result<(Value, SubAgent)> {
    let id = parse_id(&args.id)?;
    let agent = storage.get_sub_agent(id).await?;
    debug!("run_sub_agent '{}' ({})", agent.name, agent.id);

    let payload = json!({
        "sub_agent": {
            "id": agent.id,
            "name": agent.name,
            "prompt": agent.prompt,
        },
        "input": args.input,
    });
    Ok((payload, agent))
}

/// Apply a prompt refinement under the configured policy
///
/// The target is resolved by id first, then by name, since the model may
/// pass either.
pub async fn execute_update(
    storage: &dyn StorageBackend,
    policy: PromptUpdatePolicy,
    args: UpdateArgs,
) -> Result<Value> {
    let agent = resolve(storage, &args.id).await?;
    let updated = storage
        .update_sub_agent_prompt(agent.id, &args.prompt, policy)
        .await?;
    Ok(json!({ "sub_agent": updated }))
}

/// Soft-delete a sub-agent
pub async fn execute_delete(storage: &dyn StorageBackend, args: DeleteArgs) -> Result<Value> {
    let id = parse_id(&args.id)?;
    storage.delete_sub_agent(id).await?;
    Ok(json!({ "ok": true }))
}

fn parse_id(token: &str) -> Result<SubAgentId> {
    SubAgentId::from_string(token)
        .map_err(|_| HermesError::NotFound(format!("sub-agent {}", token)))
}

async fn resolve(storage: &dyn StorageBackend, token: &str) -> Result<SubAgent> {
    if let Ok(id) = SubAgentId::from_string(token) {
        match storage.get_sub_agent(id).await {
            Ok(agent) => return Ok(agent),
            Err(HermesError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    storage
        .find_sub_agent_by_name(token)
        .await?
        .ok_or_else(|| HermesError::NotFound(format!("sub-agent {}", token)))
}

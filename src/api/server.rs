//! HTTP API server with SSE chat streaming
//!
//! Exposes the orchestrator over REST: chat turns stream back as
//! Server-Sent Events (one JSON frame per event, closed by a literal
//! `[DONE]` sentinel), while chat listing, history, and the sub-agent
//! management surface are plain JSON.

use super::identity::IdentityProvider;
use crate::config::SubAgentSettings;
use crate::error::{HermesError, Result};
use crate::orchestration::{FrameStream, Orchestrator};
use crate::storage::StorageBackend;
use crate::types::{Chat, ChatId, MessageRecord, SubAgent, SubAgentId, SubAgentRevision, UserId};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tokio_stream::StreamExt as _;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Listen address, e.g. `127.0.0.1:8787`
    pub listen_addr: String,
}

/// API server state shared across handlers
#[derive(Clone)]
struct AppState {
    storage: Arc<dyn StorageBackend>,
    orchestrator: Arc<Orchestrator>,
    identity: Arc<dyn IdentityProvider>,
    sub_agents: SubAgentSettings,
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        storage: Arc<dyn StorageBackend>,
        orchestrator: Arc<Orchestrator>,
        identity: Arc<dyn IdentityProvider>,
        sub_agents: SubAgentSettings,
    ) -> Self {
        Self {
            config,
            state: AppState {
                storage,
                orchestrator,
                identity,
                sub_agents,
            },
        }
    }

    /// Build router
    fn build_router(state: AppState) -> Router {
        Router::new()
            // Chat turns (SSE)
            .route("/ai/chat", post(create_chat_handler))
            .route("/ai/chat/:id", post(continue_chat_handler))
            // Chat records
            .route("/ai/chat", get(list_chats_handler))
            .route("/ai/chat/:id", get(chat_history_handler))
            // Sub-agent management
            .route("/agents", get(list_agents_handler))
            .route("/agents/recent", get(recent_agent_handler))
            .route("/agents/:id", get(get_agent_handler))
            .route("/agents/:id", patch(update_agent_prompt_handler))
            // Health check
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown
    pub async fn serve(self) -> Result<()> {
        let router = Self::build_router(self.state);

        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr).await?;
        info!("API server listening on http://{}", self.config.listen_addr);
        axum::serve(listener, router).await?;
        Ok(())
    }
}

impl IntoResponse for HermesError {
    fn into_response(self) -> Response {
        let status = match &self {
            HermesError::NotFound(_) => StatusCode::NOT_FOUND,
            HermesError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            HermesError::InvalidToolArgs(_) | HermesError::InvalidId(_) => StatusCode::BAD_REQUEST,
            HermesError::LlmApi(_) | HermesError::SearchApi(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| HermesError::Unauthorized("Invalid tokens".to_string()))
}

async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<UserId> {
    state.identity.resolve(bearer_token(headers)?).await
}

/// Turn request body
#[derive(Debug, Deserialize)]
struct ChatRequest {
    prompt: String,
}

/// Serialize orchestrator frames as SSE, closing with `[DONE]`
fn sse_response(
    frames: FrameStream,
) -> Sse<impl tokio_stream::Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let frame_events = frames.filter_map(|frame| {
        let data = serde_json::to_string(&frame).ok()?;
        Some(Ok(SseEvent::default().data(data)))
    });
    let done = tokio_stream::once(Ok(SseEvent::default().data("[DONE]")));

    Sse::new(frame_events.chain(done)).keep_alive(KeepAlive::default())
}

/// Start a new chat; the first SSE frame carries the chat id
async fn create_chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse> {
    let user_id = authorize(&state, &headers).await?;
    debug!("New chat turn for user {}", user_id);

    let (_chat_id, frames) = state.orchestrator.start_chat(user_id, req.prompt).await?;
    Ok(sse_response(frames))
}

/// Run one more turn of an existing chat
async fn continue_chat_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse> {
    let user_id = authorize(&state, &headers).await?;
    let chat_id = ChatId::from_string(&id)?;
    debug!("Continuing chat {} for user {}", chat_id, user_id);

    let frames = state
        .orchestrator
        .continue_chat(user_id, chat_id, req.prompt)
        .await?;
    Ok(sse_response(frames))
}

async fn list_chats_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Chat>>> {
    let user_id = authorize(&state, &headers).await?;
    Ok(Json(state.storage.list_chats(user_id).await?))
}

#[derive(Debug, Serialize)]
struct ChatHistoryResponse {
    chat: Chat,
    messages: Vec<MessageRecord>,
}

async fn chat_history_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ChatHistoryResponse>> {
    let user_id = authorize(&state, &headers).await?;
    let chat_id = ChatId::from_string(&id)?;

    let chat = state.storage.get_owned_chat(chat_id, user_id).await?;
    let messages = state.storage.chat_history(chat_id).await?;
    Ok(Json(ChatHistoryResponse { chat, messages }))
}

async fn list_agents_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SubAgent>>> {
    authorize(&state, &headers).await?;
    Ok(Json(state.storage.list_sub_agents().await?))
}

async fn recent_agent_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Option<SubAgent>>> {
    authorize(&state, &headers).await?;
    Ok(Json(
        state.storage.most_recently_updated_sub_agent().await?,
    ))
}

#[derive(Debug, Serialize)]
struct AgentDetailResponse {
    agent: SubAgent,
    /// Pre-mutation prompt snapshots, newest first
    revisions: Vec<SubAgentRevision>,
}

async fn get_agent_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AgentDetailResponse>> {
    authorize(&state, &headers).await?;
    let agent_id = SubAgentId::from_string(&id)?;

    let agent = state.storage.get_sub_agent(agent_id).await?;
    let mut revisions = state.storage.sub_agent_revisions(agent_id).await?;
    revisions.reverse();
    Ok(Json(AgentDetailResponse { agent, revisions }))
}

#[derive(Debug, Deserialize)]
struct UpdateAgentPromptRequest {
    prompt: String,
}

async fn update_agent_prompt_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateAgentPromptRequest>,
) -> Result<Json<SubAgent>> {
    authorize(&state, &headers).await?;
    let agent_id = SubAgentId::from_string(&id)?;

    let updated = state
        .storage
        .update_sub_agent_prompt(agent_id, &req.prompt, state.sub_agents.update_policy)
        .await?;
    Ok(Json(updated))
}

/// Health check handler
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

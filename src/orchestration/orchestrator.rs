//! Conversation turn orchestration
//!
//! Drives one turn of a chat as an explicit state machine over
//! `iteration` and `total_tokens`:
//!
//! 1. Seed the working message list from persisted history, append the
//!    new user prompt, and inject system instructions for any detected
//!    prompt directives.
//! 2. Entry guard: past the iteration cap or the hard token limit, skip
//!    tools entirely and stream one finalize completion.
//! 3. Near the caps (one iteration of headroom, or past the soft token
//!    limit) the next call runs with tools disabled and an instruction
//!    to answer immediately.
//! 4. Otherwise call the model with the tool schemas; `tool_choice` is
//!    required on iteration 0 and auto afterwards.
//! 5. Tool calls execute sequentially in model order, each result
//!    appended as a tool message; plain text is the terminal branch.
//!
//! Running a sub-agent marks it as the turn's context agent; after the
//! terminal answer a best-effort self-critique pass may refine that
//! agent's stored prompt. Critique failures are logged and swallowed.

use crate::config::{SubAgentSettings, TurnLimits};
use crate::error::Result;
use crate::services::{CompletionBackend, SearchBackend, ToolChoice, DEFAULT_CHAT_TITLE};
use crate::storage::StorageBackend;
use crate::tools::ToolRegistry;
use crate::types::{Chat, ChatId, ChatMessage, StreamFrame, SubAgent, UserId};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Frames produced by one turn, ending with `Done` or `Error`
pub type FrameStream = Pin<Box<dyn tokio_stream::Stream<Item = StreamFrame> + Send>>;

const FRAME_BUFFER: usize = 64;

const SYSTEM_PROMPT: &str = "You are Hermes, an orchestration agent. You answer by \
gathering evidence with your tools: search the web, read pages, fetch URLs, and \
create, find, run, update, or delete stored sub-agents that specialize in recurring \
tasks. Prefer running an existing sub-agent over re-deriving its behavior. Synthesize \
tool results into a direct answer; never dump raw tool output.";

const ANSWER_NOW_INSTRUCTION: &str = "Answer the user now using what you already \
have. Do not request any further tool calls.";

/// Drives chat turns against pluggable storage, completion, and search
/// backends
pub struct Orchestrator {
    storage: Arc<dyn StorageBackend>,
    completions: Arc<dyn CompletionBackend>,
    search: Arc<dyn SearchBackend>,
    limits: TurnLimits,
    sub_agents: SubAgentSettings,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        completions: Arc<dyn CompletionBackend>,
        search: Arc<dyn SearchBackend>,
        limits: TurnLimits,
        sub_agents: SubAgentSettings,
    ) -> Self {
        Self {
            storage,
            completions,
            search,
            limits,
            sub_agents,
        }
    }

    /// Start a new chat for `user_id` and run its first turn
    ///
    /// The returned stream's first frame is a `ChatCreated` control frame
    /// so callers learn the id before any content arrives.
    pub async fn start_chat(
        &self,
        user_id: UserId,
        prompt: String,
    ) -> Result<(ChatId, FrameStream)> {
        let user = self.storage.get_user(user_id).await?;

        let title = match self.completions.generate_title(&prompt).await {
            Ok(title) => title,
            Err(e) => {
                warn!("Title generation failed, using default: {}", e);
                DEFAULT_CHAT_TITLE.to_string()
            }
        };

        let chat = self.storage.create_chat(user.id, Some(title)).await?;
        info!("Created chat {} for user {}", chat.id, user.id);

        let chat_id = chat.id;
        let stream = self.spawn_turn(chat, prompt, true).await?;
        Ok((chat_id, stream))
    }

    /// Run one turn of an existing chat owned by `user_id`
    pub async fn continue_chat(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        prompt: String,
    ) -> Result<FrameStream> {
        let user = self.storage.get_user(user_id).await?;
        let chat = self.storage.get_owned_chat(chat_id, user.id).await?;

        self.spawn_turn(chat, prompt, false).await
    }

    async fn spawn_turn(
        &self,
        chat: Chat,
        prompt: String,
        announce_chat: bool,
    ) -> Result<FrameStream> {
        let chat_id = chat.id;
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);

        if announce_chat {
            // Channel is empty and open, so this cannot fail
            let _ = tx.send(StreamFrame::ChatCreated { chat_id }).await;
        }

        let mut turn = Turn {
            storage: self.storage.clone(),
            completions: self.completions.clone(),
            registry: ToolRegistry::new(
                self.storage.clone(),
                self.search.clone(),
                chat_id,
                self.sub_agents.update_policy,
                self.sub_agents.preview_len,
            ),
            limits: self.limits,
            chat_id,
            messages: Vec::new(),
            total_tokens: 0,
            context_agent: None,
            tx,
        };

        tokio::spawn(async move {
            if let Err(e) = turn.run(prompt).await {
                error!("Turn failed for chat {}: {}", turn.chat_id, e);
                let _ = turn
                    .tx
                    .send(StreamFrame::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// State for one in-flight turn
struct Turn {
    storage: Arc<dyn StorageBackend>,
    completions: Arc<dyn CompletionBackend>,
    registry: ToolRegistry,
    limits: TurnLimits,
    chat_id: ChatId,
    messages: Vec<ChatMessage>,
    total_tokens: u64,
    context_agent: Option<SubAgent>,
    tx: mpsc::Sender<StreamFrame>,
}

impl Turn {
    async fn run(&mut self, prompt: String) -> Result<()> {
        self.seed_messages(&prompt).await?;

        let mut iteration: u32 = 0;
        loop {
            if iteration >= self.limits.max_iterations
                || self.total_tokens > self.limits.hard_token_limit
            {
                debug!(
                    "Budget exhausted for chat {} (iteration {}, {} tokens), finalizing",
                    self.chat_id, iteration, self.total_tokens
                );
                return self.finalize().await;
            }

            let force_finish = iteration + 1 >= self.limits.max_iterations
                || self.total_tokens >= self.limits.soft_token_limit;

            let (schemas, tool_choice) = if force_finish {
                (Vec::new(), ToolChoice::None)
            } else if iteration == 0 {
                (ToolRegistry::schemas(), ToolChoice::Required)
            } else {
                (ToolRegistry::schemas(), ToolChoice::Auto)
            };

            let mut call_messages = self.messages.clone();
            if force_finish {
                call_messages.push(ChatMessage::system(ANSWER_NOW_INSTRUCTION));
            }

            let completion = self
                .completions
                .complete(&call_messages, &schemas, tool_choice)
                .await?;
            self.total_tokens += completion.usage.total_tokens;
            debug!(
                "Iteration {} for chat {}: {} tool calls, {} total tokens",
                iteration,
                self.chat_id,
                completion.tool_calls.len(),
                self.total_tokens
            );

            if completion.tool_calls.is_empty() {
                return self.answer(completion.content).await;
            }

            let assistant = ChatMessage::assistant_with_calls(
                completion.content,
                completion.tool_calls.clone(),
            );
            self.append(assistant).await?;

            // Sequential, in model order, so each result stays paired
            // with its tool_call_id for the next model call
            for call in &completion.tool_calls {
                let outcome = self.registry.dispatch(call).await;
                if let Some(agent) = outcome.ran_sub_agent {
                    debug!("Turn context agent is now '{}'", agent.name);
                    self.context_agent = Some(agent);
                }
                self.append(ChatMessage::tool_result(&call.id, &call.name, outcome.content))
                    .await?;
            }

            if force_finish {
                return self.finalize().await;
            }
            iteration += 1;
        }
    }

    /// Seed the working list: system prompt, persisted history, new
    /// prompt, then directive instructions (turn-scoped, never persisted)
    async fn seed_messages(&mut self, prompt: &str) -> Result<()> {
        self.messages.push(ChatMessage::system(SYSTEM_PROMPT));

        let history = self.storage.chat_history(self.chat_id).await?;
        for record in history {
            self.messages.push(record.message);
        }

        self.append(ChatMessage::user(prompt)).await?;

        let directives = super::directives::detect(self.storage.as_ref(), prompt).await?;
        for directive in &directives {
            debug!("Applying directive {:?} to chat {}", directive, self.chat_id);
            self.messages
                .push(ChatMessage::system(directive.instruction()));
        }

        Ok(())
    }

    /// Append to the in-memory list and persist
    async fn append(&mut self, message: ChatMessage) -> Result<()> {
        self.storage.append_message(self.chat_id, &message).await?;
        self.messages.push(message);
        Ok(())
    }

    /// Terminal branch: the model answered in plain text
    async fn answer(&mut self, content: String) -> Result<()> {
        self.send(StreamFrame::Delta {
            text: content.clone(),
        })
        .await;
        self.append(ChatMessage::assistant(content)).await?;

        if let Some(agent) = self.context_agent.take() {
            self.run_critique(&agent).await;
        }

        self.send(StreamFrame::Done).await;
        Ok(())
    }

    /// Budget-exhaustion terminal state: one completion with tools
    /// disabled, streamed live
    async fn finalize(&mut self) -> Result<()> {
        let mut call_messages = self.messages.clone();
        call_messages.push(ChatMessage::system(ANSWER_NOW_INSTRUCTION));

        let mut deltas = self.completions.stream_text(&call_messages).await?;
        let mut answer = String::new();
        while let Some(delta) = deltas.next().await {
            let text = delta?;
            answer.push_str(&text);
            if !self.send(StreamFrame::Delta { text }).await {
                debug!("Client left chat {} mid-finalize, abandoning turn", self.chat_id);
                return Ok(());
            }
        }

        self.append(ChatMessage::assistant(answer)).await?;
        self.send(StreamFrame::Done).await;
        Ok(())
    }

    /// Best-effort prompt refinement for the sub-agent that ran this turn
    async fn run_critique(&mut self, agent: &SubAgent) {
        if let Err(e) = self.try_critique(agent).await {
            warn!(
                "Self-critique pass failed for sub-agent '{}': {}",
                agent.name, e
            );
        }
    }

    async fn try_critique(&mut self, agent: &SubAgent) -> Result<()> {
        let mut call_messages = self.messages.clone();
        call_messages.push(ChatMessage::system(format!(
            "Evaluate how well the sub-agent '{}' (id '{}') served the user in this \
             exchange, then call update_sub_agent with id '{}' and a concise \
             refinement to its prompt based on what you observed.",
            agent.name, agent.id, agent.id
        )));

        let completion = self
            .completions
            .complete(
                &call_messages,
                &ToolRegistry::critique_schemas(),
                ToolChoice::Required,
            )
            .await?;

        // At most one update is applied per turn
        if let Some(call) = completion
            .tool_calls
            .iter()
            .find(|call| call.name == "update_sub_agent")
        {
            let outcome = self.registry.dispatch(call).await;
            debug!(
                "Critique updated sub-agent '{}': {}",
                agent.name, outcome.content
            );
        }

        Ok(())
    }

    /// Send one frame; false means the client is gone
    async fn send(&self, frame: StreamFrame) -> bool {
        self.tx.send(frame).await.is_ok()
    }
}

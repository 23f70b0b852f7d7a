//! Completion provider client
//!
//! Speaks OpenAI-style chat completions for:
//! - Tool-selection iterations of the turn loop (non-streaming)
//! - Finalize calls streamed as text deltas
//! - Schema-constrained title generation
//!
//! Streamed tool-call fragments are merged by an explicit accumulator
//! keyed by call index; a partial call is promoted only once its name and
//! a valid JSON arguments payload are both present.

use crate::config::LlmSettings;
use crate::error::{HermesError, Result};
use crate::types::{ChatMessage, TokenUsage, ToolCallRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use uuid::Uuid;

/// Title used when generation fails or returns malformed output
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// How the model may use the supplied tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    /// Model decides freely
    Auto,
    /// Tools disabled for this call
    None,
    /// Model must emit at least one tool call
    Required,
}

impl ToolChoice {
    fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
            ToolChoice::Required => "required",
        }
    }
}

/// Result of one non-streaming completion call
#[derive(Debug, Clone)]
pub struct Completion {
    /// Answer text, possibly empty when only tools were invoked
    pub content: String,

    /// Complete tool calls, in model order
    pub tool_calls: Vec<ToolCallRecord>,

    /// Provider-reported usage for this call
    pub usage: TokenUsage,
}

/// Boxed stream of text deltas from a streaming completion
pub type TextDeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Abstraction over the completion provider
///
/// The orchestrator only sees this trait; tests script it with canned
/// completions.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// One completion call returning message content, tool calls, and usage
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
        tool_choice: ToolChoice,
    ) -> Result<Completion>;

    /// One completion call with tools disabled, yielding text deltas
    async fn stream_text(&self, messages: &[ChatMessage]) -> Result<TextDeltaStream>;

    /// Schema-constrained call producing a short chat title
    async fn generate_title(&self, prompt: &str) -> Result<String>;
}

// Wire format: OpenAI-style chat completions.

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Merges streamed tool-call fragments into complete calls
///
/// Fragments arrive keyed by call index, with the id and name usually in
/// the first fragment and the JSON arguments split across many. Partial
/// JSON is never parsed; an entry is promoted only when its name is known
/// and the accumulated arguments parse as JSON.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    partial: BTreeMap<usize, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments_buffer: String,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one fragment for the call at `index`
    pub fn absorb(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments_fragment: Option<&str>,
    ) {
        let entry = self.partial.entry(index).or_default();
        if let Some(id) = id {
            entry.id.get_or_insert_with(|| id.to_string());
        }
        if let Some(name) = name {
            entry.name.get_or_insert_with(|| name.to_string());
        }
        if let Some(fragment) = arguments_fragment {
            entry.arguments_buffer.push_str(fragment);
        }
    }

    /// True when no fragments have been absorbed
    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    /// Promote complete entries to records, in index order
    ///
    /// Entries missing a name or holding unparseable arguments are
    /// dropped with a warning. An empty arguments buffer counts as `{}`.
    pub fn finish(self) -> Vec<ToolCallRecord> {
        let mut records = Vec::new();
        for (index, partial) in self.partial {
            let name = match partial.name {
                Some(name) => name,
                None => {
                    warn!("Dropping tool-call fragment at index {}: no name", index);
                    continue;
                }
            };

            let arguments = if partial.arguments_buffer.trim().is_empty() {
                "{}".to_string()
            } else {
                partial.arguments_buffer
            };
            if serde_json::from_str::<serde_json::Value>(&arguments).is_err() {
                warn!(
                    "Dropping tool call '{}' at index {}: arguments are not valid JSON",
                    name, index
                );
                continue;
            }

            records.push(ToolCallRecord {
                id: partial
                    .id
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
                name,
                arguments,
            });
        }
        records
    }
}

/// HTTP client for the completion provider
pub struct CompletionClient {
    settings: LlmSettings,
    api_key: String,
    client: reqwest::Client,
}

impl CompletionClient {
    /// Create a new completion client, resolving the API key
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let api_key = settings.resolve_api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            settings,
            api_key,
            client,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    async fn post_completion(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(HermesError::LlmApi(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

fn to_wire(messages: &[ChatMessage]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|message| match message {
            ChatMessage::System { content } => WireMessage {
                role: "system",
                content: content.clone(),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            ChatMessage::User { content } => WireMessage {
                role: "user",
                content: content.clone(),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => WireMessage {
                role: "assistant",
                content: content.clone(),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        tool_calls
                            .iter()
                            .map(|call| WireToolCall {
                                id: Some(call.id.clone()),
                                kind: "function".to_string(),
                                function: WireFunction {
                                    name: call.name.clone(),
                                    arguments: call.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: None,
                name: None,
            },
            ChatMessage::Tool {
                content,
                tool_call_id,
                name,
            } => WireMessage {
                role: "tool",
                content: content.clone(),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
                name: Some(name.clone()),
            },
        })
        .collect()
}

fn wire_calls_to_records(calls: Vec<WireToolCall>) -> Vec<ToolCallRecord> {
    calls
        .into_iter()
        .map(|call| ToolCallRecord {
            id: call
                .id
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            name: call.function.name,
            arguments: if call.function.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                call.function.arguments
            },
        })
        .collect()
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
        tool_choice: ToolChoice,
    ) -> Result<Completion> {
        debug!(
            "Completion call: {} messages, {} tools, tool_choice={}",
            messages.len(),
            tools.len(),
            tool_choice.as_str()
        );

        let request = ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: to_wire(messages),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.to_vec())
            },
            tool_choice: if tools.is_empty() {
                None
            } else {
                Some(tool_choice.as_str())
            },
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: false,
            response_format: None,
        };

        let response = self.post_completion(&request).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| HermesError::LlmApi(format!("Failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| HermesError::LlmApi("Empty response from API".to_string()))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: wire_calls_to_records(choice.message.tool_calls.unwrap_or_default()),
            usage: parsed.usage.unwrap_or_default(),
        })
    }

    async fn stream_text(&self, messages: &[ChatMessage]) -> Result<TextDeltaStream> {
        debug!("Streaming completion call: {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: to_wire(messages),
            tools: None,
            tool_choice: None,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: true,
            response_format: None,
        };

        let response = self.post_completion(&request).await?;

        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        tokio::spawn(async move {
            let stream = response
                .bytes_stream()
                .map(|result| result.map_err(std::io::Error::other));
            let reader = StreamReader::new(stream);
            let mut lines = BufReader::new(reader).lines();

            // Tools are disabled on streaming calls; any fragments that
            // arrive anyway are merged and discarded.
            let mut stray_calls = ToolCallAccumulator::new();
            let mut current_data = String::new();

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx
                            .send(Err(HermesError::LlmApi(format!(
                                "Stream read failed: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };

                if line.is_empty() {
                    if current_data.is_empty() {
                        continue;
                    }
                    if current_data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&current_data) {
                        Ok(chunk) => {
                            for choice in chunk.choices {
                                if let Some(text) = choice.delta.content {
                                    if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                                        // Caller dropped the stream
                                        return;
                                    }
                                }
                                for delta in choice.delta.tool_calls.unwrap_or_default() {
                                    let function = delta.function.unwrap_or_default();
                                    stray_calls.absorb(
                                        delta.index,
                                        delta.id.as_deref(),
                                        function.name.as_deref(),
                                        function.arguments.as_deref(),
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            debug!("Skipping unparseable stream chunk: {}", e);
                        }
                    }
                    current_data.clear();
                } else if let Some(data) = line.strip_prefix("data: ") {
                    current_data.push_str(data);
                }
                // Ignore other SSE fields (id:, event:, retry:)
            }

            if !stray_calls.is_empty() {
                let dropped = stray_calls.finish();
                warn!(
                    "Provider emitted {} tool calls on a text-only stream; ignoring",
                    dropped.len()
                );
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn generate_title(&self, prompt: &str) -> Result<String> {
        debug!("Generating chat title");

        let schema = serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": "chat_title",
                "strict": true,
                "schema": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" }
                    },
                    "required": ["title"],
                    "additionalProperties": false
                }
            }
        });

        let instruction = format!(
            "Summarize the user's message into a chat title of at most six words. \
             Respond with JSON of the form {{\"title\": \"...\"}}.\n\nMessage:\n{}",
            prompt
        );

        let request = ChatCompletionRequest {
            model: self.settings.title_model.clone(),
            messages: vec![WireMessage {
                role: "user",
                content: instruction,
                tool_calls: None,
                tool_call_id: None,
                name: None,
            }],
            tools: None,
            tool_choice: None,
            max_tokens: 64,
            temperature: 0.2,
            stream: false,
            response_format: Some(schema),
        };

        let response = self.post_completion(&request).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| HermesError::LlmApi(format!("Failed to parse response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        #[derive(Deserialize)]
        struct TitlePayload {
            title: String,
        }

        match serde_json::from_str::<TitlePayload>(&content) {
            Ok(payload) if !payload.title.trim().is_empty() => Ok(payload.title),
            _ => {
                warn!("Title generation returned malformed output, using default");
                Ok(DEFAULT_CHAT_TITLE.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_merges_fragments() {
        let mut acc = ToolCallAccumulator::new();
        acc.absorb(0, Some("call_1"), Some("web_search"), None);
        acc.absorb(0, None, None, Some(r#"{"que"#));
        acc.absorb(0, None, None, Some(r#"ry":"seoul weather"}"#));

        let records = acc.finish();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "call_1");
        assert_eq!(records[0].name, "web_search");
        assert_eq!(records[0].arguments, r#"{"query":"seoul weather"}"#);
    }

    #[test]
    fn test_accumulator_orders_by_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.absorb(1, Some("call_b"), Some("web_read"), Some("{}"));
        acc.absorb(0, Some("call_a"), Some("web_search"), Some("{}"));

        let records = acc.finish();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "call_a");
        assert_eq!(records[1].id, "call_b");
    }

    #[test]
    fn test_accumulator_drops_incomplete() {
        let mut acc = ToolCallAccumulator::new();
        // No name
        acc.absorb(0, Some("call_1"), None, Some("{}"));
        // Truncated JSON
        acc.absorb(1, Some("call_2"), Some("fetch"), Some(r#"{"url":"#));

        assert!(acc.finish().is_empty());
    }

    #[test]
    fn test_accumulator_defaults_empty_arguments() {
        let mut acc = ToolCallAccumulator::new();
        acc.absorb(0, None, Some("find_sub_agent"), None);

        let records = acc.finish();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].arguments, "{}");
        assert!(records[0].id.starts_with("call_"));
    }

    #[test]
    fn test_wire_message_shapes() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant_with_calls(
                "",
                vec![ToolCallRecord {
                    id: "call_1".to_string(),
                    name: "fetch".to_string(),
                    arguments: r#"{"url":"https://example.com"}"#.to_string(),
                }],
            ),
            ChatMessage::tool_result("call_1", "fetch", r#"{"ok":true}"#),
        ];

        let wire = to_wire(&messages);
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(json[0]["role"], "user");
        assert!(json[0].get("tool_calls").is_none());

        assert_eq!(json[1]["role"], "assistant");
        assert_eq!(json[1]["tool_calls"][0]["type"], "function");
        assert_eq!(json[1]["tool_calls"][0]["function"]["name"], "fetch");

        assert_eq!(json[2]["role"], "tool");
        assert_eq!(json[2]["tool_call_id"], "call_1");
        assert_eq!(json[2]["name"], "fetch");
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));

        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"fetch","arguments":""}}]}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        let deltas = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(deltas[0].index, 0);
        assert_eq!(
            deltas[0].function.as_ref().unwrap().name.as_deref(),
            Some("fetch")
        );
    }

    #[test]
    fn test_wire_calls_fallback_ids() {
        let records = wire_calls_to_records(vec![WireToolCall {
            id: None,
            kind: "function".to_string(),
            function: WireFunction {
                name: "web_search".to_string(),
                arguments: String::new(),
            },
        }]);

        assert_eq!(records.len(), 1);
        assert!(records[0].id.starts_with("call_"));
        assert_eq!(records[0].arguments, "{}");
    }

    #[tokio::test]
    #[ignore] // Requires HERMES_API_KEY
    async fn test_live_completion() {
        let client = CompletionClient::new(LlmSettings::default()).unwrap();
        let completion = client
            .complete(&[ChatMessage::user("Say 'ok'")], &[], ToolChoice::None)
            .await
            .unwrap();
        assert!(!completion.content.is_empty());
    }
}

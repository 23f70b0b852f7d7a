//! Common test utilities and helpers

use async_trait::async_trait;
use hermes_core::services::TextDeltaStream;
use hermes_core::{
    ChatMessage, Completion, CompletionBackend, ConnectionMode, HermesError, LibsqlStorage,
    Result, SearchBackend, SearchResult, StorageBackend, TokenUsage, ToolCallRecord, ToolChoice,
    UserRecord,
};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Create a file-backed storage for testing
///
/// Uses a temporary file instead of :memory: so the database survives
/// reopen checks within a test. Files land in /tmp; the OS cleans up.
pub async fn create_test_storage() -> LibsqlStorage {
    let temp_file = format!("/tmp/hermes_test_{}.db", uuid::Uuid::new_v4());
    LibsqlStorage::new_with_validation(
        ConnectionMode::Local(temp_file),
        true, // create_if_missing - required for test databases
    )
    .await
    .expect("Failed to create test storage")
}

/// Register the user every test turn runs as
pub async fn seed_user(storage: &dyn StorageBackend) -> UserRecord {
    storage
        .create_user("test@example.com", "Test User")
        .await
        .expect("Failed to create test user")
}

/// One completion call as the orchestrator saw it
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub schema_count: usize,
    pub tool_choice: ToolChoice,
}

/// Completion backend that replays a queue of canned responses
///
/// `complete` pops from the completion queue, `stream_text` pops a delta
/// script from the stream queue. Every call is recorded for assertions.
/// An exhausted queue yields an error, which surfaces as an `error` frame
/// in the turn under test.
#[derive(Default)]
pub struct ScriptedCompletions {
    completions: Mutex<VecDeque<Completion>>,
    streams: Mutex<VecDeque<Vec<String>>>,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl ScriptedCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain-text completion
    pub fn push_text(&self, content: &str, total_tokens: u64) {
        self.push_completion(Completion {
            content: content.to_string(),
            tool_calls: Vec::new(),
            usage: usage(total_tokens),
        });
    }

    /// Queue a completion invoking a single tool
    pub fn push_tool_call(
        &self,
        call_id: &str,
        name: &str,
        arguments: serde_json::Value,
        total_tokens: u64,
    ) {
        self.push_completion(Completion {
            content: String::new(),
            tool_calls: vec![ToolCallRecord {
                id: call_id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
            usage: usage(total_tokens),
        });
    }

    pub fn push_completion(&self, completion: Completion) {
        self.completions.lock().unwrap().push_back(completion);
    }

    /// Queue a finalize-stream script
    pub fn push_stream(&self, deltas: &[&str]) {
        self.streams
            .lock()
            .unwrap()
            .push_back(deltas.iter().map(|d| d.to_string()).collect());
    }

    /// Calls made so far, in order
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().unwrap().clone()
    }
}

fn usage(total_tokens: u64) -> TokenUsage {
    TokenUsage {
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens,
    }
}

#[async_trait]
impl CompletionBackend for ScriptedCompletions {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
        tool_choice: ToolChoice,
    ) -> Result<Completion> {
        self.recorded.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            schema_count: tools.len(),
            tool_choice,
        });

        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| HermesError::LlmApi("Completion script exhausted".to_string()))
    }

    async fn stream_text(&self, messages: &[ChatMessage]) -> Result<TextDeltaStream> {
        self.recorded.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            schema_count: 0,
            tool_choice: ToolChoice::None,
        });

        let deltas = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| HermesError::LlmApi("Stream script exhausted".to_string()))?;

        Ok(Box::pin(tokio_stream::iter(
            deltas.into_iter().map(Ok).collect::<Vec<_>>(),
        )))
    }

    async fn generate_title(&self, _prompt: &str) -> Result<String> {
        Ok("Scripted Chat".to_string())
    }
}

/// Search backend returning fixed results
pub struct StubSearch {
    pub results: Vec<SearchResult>,
    pub page_text: String,
}

impl Default for StubSearch {
    fn default() -> Self {
        Self {
            results: vec![SearchResult {
                title: "Example Domain".to_string(),
                url: "https://example.com".to_string(),
                snippet: "Illustrative example page".to_string(),
            }],
            page_text: "Example page body text".to_string(),
        }
    }
}

#[async_trait]
impl SearchBackend for StubSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
        Ok(self.results.clone())
    }

    async fn read(&self, _url: &str) -> Result<String> {
        Ok(self.page_text.clone())
    }
}

//! End-to-end tests for the turn loop
//!
//! Each test drives the orchestrator against scripted completion and
//! search backends and a real file-backed store, then asserts on the
//! emitted frames, the recorded provider calls, and the persisted
//! history.

mod common;

use common::{create_test_storage, seed_user, ScriptedCompletions, StubSearch};
use hermes_core::config::{SubAgentSettings, TurnLimits};
use hermes_core::{
    ChatMessage, FrameStream, MessageRecord, Orchestrator, PromptUpdatePolicy, StorageBackend,
    StreamFrame, ToolChoice,
};
use std::sync::Arc;
use tokio_stream::StreamExt;

fn default_limits() -> TurnLimits {
    TurnLimits {
        max_iterations: 12,
        soft_token_limit: 140_000,
        hard_token_limit: 150_000,
    }
}

fn agent_settings() -> SubAgentSettings {
    SubAgentSettings {
        update_policy: PromptUpdatePolicy::Append,
        preview_len: 200,
    }
}

fn orchestrator(
    storage: Arc<dyn StorageBackend>,
    completions: Arc<ScriptedCompletions>,
    limits: TurnLimits,
) -> Orchestrator {
    Orchestrator::new(
        storage,
        completions,
        Arc::new(StubSearch::default()),
        limits,
        agent_settings(),
    )
}

async fn collect_frames(mut stream: FrameStream) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = stream.next().await {
        frames.push(frame);
    }
    frames
}

/// Every assistant message invoking tools must be followed by exactly
/// its results, in order, before the next non-tool message
fn assert_tool_pairing(history: &[MessageRecord]) {
    let mut i = 0;
    while i < history.len() {
        let calls = history[i].message.tool_calls().to_vec();
        i += 1;
        for call in calls {
            match &history[i].message {
                ChatMessage::Tool {
                    tool_call_id, name, ..
                } => {
                    assert_eq!(tool_call_id, &call.id, "tool result out of order");
                    assert_eq!(name, &call.name);
                }
                other => panic!("expected tool result after assistant call, got {:?}", other),
            }
            i += 1;
        }
    }
}

#[tokio::test]
async fn test_search_then_answer() {
    println!("\n=== Turn: search then plain answer ===\n");

    let storage = Arc::new(create_test_storage().await);
    let user = seed_user(storage.as_ref()).await;

    let completions = Arc::new(ScriptedCompletions::new());
    completions.push_tool_call(
        "call_1",
        "web_search",
        serde_json::json!({"query": "seoul weather"}),
        120,
    );
    completions.push_text("It is sunny in Seoul today.", 80);

    let orchestrator = orchestrator(storage.clone(), completions.clone(), default_limits());

    let (chat_id, stream) = orchestrator
        .start_chat(user.id, "What's the weather in Seoul?".to_string())
        .await
        .expect("Failed to start chat");
    let frames = collect_frames(stream).await;
    println!("Collected {} frames", frames.len());

    assert_eq!(
        frames,
        vec![
            StreamFrame::ChatCreated { chat_id },
            StreamFrame::Delta {
                text: "It is sunny in Seoul today.".to_string()
            },
            StreamFrame::Done,
        ]
    );

    // Title comes from the scripted generator
    let chat = storage.get_chat(chat_id).await.expect("chat");
    assert_eq!(chat.title.as_deref(), Some("Scripted Chat"));

    // First call must require a tool, later calls choose freely
    let recorded = completions.recorded();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].tool_choice, ToolChoice::Required);
    assert_eq!(recorded[0].schema_count, 8);
    assert_eq!(recorded[1].tool_choice, ToolChoice::Auto);

    // Persisted: user, assistant+call, tool result, final answer
    let history = storage.chat_history(chat_id).await.expect("history");
    let roles: Vec<_> = history.iter().map(|r| r.message.role()).collect();
    assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
    assert_tool_pairing(&history);
    assert_eq!(history[3].message.content(), "It is sunny in Seoul today.");

    println!("✓ Search turn completed");
}

#[tokio::test]
async fn test_mention_runs_agent_and_critique_refines_it() {
    println!("\n=== Turn: @mention runs agent, critique refines prompt ===\n");

    let storage = Arc::new(create_test_storage().await);
    let user = seed_user(storage.as_ref()).await;
    let chat = storage
        .create_chat(user.id, Some("Seed".to_string()))
        .await
        .expect("chat");
    let agent = storage
        .upsert_sub_agent(chat.id, "researcher", "You research topics.")
        .await
        .expect("agent");

    let completions = Arc::new(ScriptedCompletions::new());
    completions.push_tool_call(
        "call_1",
        "run_sub_agent",
        serde_json::json!({"id": agent.id.to_string(), "input": "Rust 1.80 changes"}),
        150,
    );
    completions.push_text("Rust 1.80 stabilized LazyCell.", 90);
    // Critique pass
    completions.push_tool_call(
        "call_2",
        "update_sub_agent",
        serde_json::json!({"id": agent.id.to_string(), "prompt": "Prefer release notes."}),
        40,
    );

    let orchestrator = orchestrator(storage.clone(), completions.clone(), default_limits());

    let stream = orchestrator
        .continue_chat(
            user.id,
            chat.id,
            "@researcher what changed in Rust 1.80?".to_string(),
        )
        .await
        .expect("Failed to continue chat");
    let frames = collect_frames(stream).await;

    assert_eq!(
        frames,
        vec![
            StreamFrame::Delta {
                text: "Rust 1.80 stabilized LazyCell.".to_string()
            },
            StreamFrame::Done,
        ]
    );

    let recorded = completions.recorded();
    assert_eq!(recorded.len(), 3, "run, answer, critique");

    // The mention becomes a system instruction naming the tool and id
    let directive = recorded[0]
        .messages
        .iter()
        .filter(|m| m.role() == "system")
        .find(|m| m.content().contains("run_sub_agent"))
        .expect("directive instruction missing");
    assert!(directive.content().contains(&agent.id.to_string()));

    // Critique call is restricted to the update tool and must use it
    assert_eq!(recorded[2].schema_count, 1);
    assert_eq!(recorded[2].tool_choice, ToolChoice::Required);
    assert!(recorded[2]
        .messages
        .last()
        .expect("critique messages")
        .content()
        .contains("Evaluate how well"));

    // One revision preserving the pre-update prompt, appended refinement
    let revisions = storage
        .sub_agent_revisions(agent.id)
        .await
        .expect("revisions");
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].old_prompt, "You research topics.");

    let updated = storage.get_sub_agent(agent.id).await.expect("agent");
    assert_eq!(
        updated.prompt,
        "You research topics.\n\nPrefer release notes."
    );

    println!("✓ Mention and critique completed");
}

#[tokio::test]
async fn test_hard_token_limit_ends_turn_with_single_streamed_answer() {
    println!("\n=== Turn: hard token limit forces finalize ===\n");

    let storage = Arc::new(create_test_storage().await);
    let user = seed_user(storage.as_ref()).await;
    let chat = storage
        .create_chat(user.id, Some("Seed".to_string()))
        .await
        .expect("chat");

    let limits = TurnLimits {
        max_iterations: 12,
        soft_token_limit: 50,
        hard_token_limit: 100,
    };

    let completions = Arc::new(ScriptedCompletions::new());
    // One expensive tool iteration blows straight past the hard limit
    completions.push_tool_call(
        "call_1",
        "web_search",
        serde_json::json!({"query": "large topic"}),
        150,
    );
    completions.push_stream(&["Summary of what was gathered."]);

    let orchestrator = orchestrator(storage.clone(), completions.clone(), limits);

    let stream = orchestrator
        .continue_chat(user.id, chat.id, "Research a large topic".to_string())
        .await
        .expect("Failed to continue chat");
    let frames = collect_frames(stream).await;

    // Exactly one content frame, then the end-of-turn sentinel
    assert_eq!(
        frames,
        vec![
            StreamFrame::Delta {
                text: "Summary of what was gathered.".to_string()
            },
            StreamFrame::Done,
        ]
    );

    // One tool iteration, then the streamed finalize call
    let recorded = completions.recorded();
    assert_eq!(recorded.len(), 2);
    let last = recorded[1].messages.last().expect("finalize messages");
    assert_eq!(last.role(), "system");
    assert!(last.content().contains("Answer the user now"));

    let history = storage.chat_history(chat.id).await.expect("history");
    let final_answer = history.last().expect("final message");
    assert_eq!(final_answer.message.role(), "assistant");
    assert_eq!(
        final_answer.message.content(),
        "Summary of what was gathered."
    );

    println!("✓ Hard-limit finalize completed");
}

#[tokio::test]
async fn test_soft_token_limit_disables_tools_on_next_call() {
    let storage = Arc::new(create_test_storage().await);
    let user = seed_user(storage.as_ref()).await;
    let chat = storage
        .create_chat(user.id, Some("Seed".to_string()))
        .await
        .expect("chat");

    let limits = TurnLimits {
        max_iterations: 12,
        soft_token_limit: 100,
        hard_token_limit: 10_000,
    };

    let completions = Arc::new(ScriptedCompletions::new());
    completions.push_tool_call(
        "call_1",
        "web_search",
        serde_json::json!({"query": "first pass"}),
        150,
    );
    completions.push_text("Done with what I have.", 30);

    let orchestrator = orchestrator(storage.clone(), completions.clone(), limits);

    let stream = orchestrator
        .continue_chat(user.id, chat.id, "Dig into this".to_string())
        .await
        .expect("Failed to continue chat");
    let frames = collect_frames(stream).await;

    assert_eq!(
        frames,
        vec![
            StreamFrame::Delta {
                text: "Done with what I have.".to_string()
            },
            StreamFrame::Done,
        ]
    );

    // Past the soft limit the follow-up call carries no tools and an
    // answer-now instruction
    let recorded = completions.recorded();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[1].schema_count, 0);
    assert_eq!(recorded[1].tool_choice, ToolChoice::None);
    let last = recorded[1].messages.last().expect("messages");
    assert_eq!(last.role(), "system");
    assert!(last.content().contains("Answer the user now"));
}

#[tokio::test]
async fn test_iteration_cap_bounds_provider_calls() {
    let storage = Arc::new(create_test_storage().await);
    let user = seed_user(storage.as_ref()).await;
    let chat = storage
        .create_chat(user.id, Some("Seed".to_string()))
        .await
        .expect("chat");

    let limits = TurnLimits {
        max_iterations: 3,
        soft_token_limit: 140_000,
        hard_token_limit: 150_000,
    };

    let completions = Arc::new(ScriptedCompletions::new());
    completions.push_tool_call("call_1", "find_sub_agent", serde_json::json!({}), 10);
    completions.push_tool_call(
        "call_2",
        "web_search",
        serde_json::json!({"query": "more"}),
        10,
    );
    // Third call arrives with tools disabled
    completions.push_text("Best effort answer.", 10);

    let orchestrator = orchestrator(storage.clone(), completions.clone(), limits);

    let stream = orchestrator
        .continue_chat(user.id, chat.id, "Keep digging".to_string())
        .await
        .expect("Failed to continue chat");
    let frames = collect_frames(stream).await;

    assert_eq!(*frames.last().expect("frames"), StreamFrame::Done);

    let recorded = completions.recorded();
    assert_eq!(recorded.len(), 3, "iteration cap bounds provider calls");
    assert_eq!(recorded[0].tool_choice, ToolChoice::Required);
    assert_eq!(recorded[1].tool_choice, ToolChoice::Auto);
    assert_eq!(recorded[2].tool_choice, ToolChoice::None);
    assert_eq!(recorded[2].schema_count, 0);

    let history = storage.chat_history(chat.id).await.expect("history");
    assert_tool_pairing(&history);
}

#[tokio::test]
async fn test_forced_call_returning_tools_still_finalizes() {
    let storage = Arc::new(create_test_storage().await);
    let user = seed_user(storage.as_ref()).await;
    let chat = storage
        .create_chat(user.id, Some("Seed".to_string()))
        .await
        .expect("chat");

    let limits = TurnLimits {
        max_iterations: 12,
        soft_token_limit: 100,
        hard_token_limit: 10_000,
    };

    let completions = Arc::new(ScriptedCompletions::new());
    completions.push_tool_call(
        "call_1",
        "web_search",
        serde_json::json!({"query": "first"}),
        150,
    );
    // Provider ignores the disabled tools and calls again
    completions.push_tool_call("call_2", "find_sub_agent", serde_json::json!({}), 20);
    completions.push_stream(&["Recovered answer."]);

    let orchestrator = orchestrator(storage.clone(), completions.clone(), limits);

    let stream = orchestrator
        .continue_chat(user.id, chat.id, "Test".to_string())
        .await
        .expect("Failed to continue chat");
    let frames = collect_frames(stream).await;

    assert_eq!(
        frames,
        vec![
            StreamFrame::Delta {
                text: "Recovered answer.".to_string()
            },
            StreamFrame::Done,
        ]
    );

    // The stray call still executed and its result was persisted before
    // the finalize stream ran
    let history = storage.chat_history(chat.id).await.expect("history");
    assert_tool_pairing(&history);
    let recorded = completions.recorded();
    assert_eq!(recorded.len(), 3, "two completions plus the finalize stream");
}

#[tokio::test]
async fn test_provider_failure_surfaces_error_frame() {
    let storage = Arc::new(create_test_storage().await);
    let user = seed_user(storage.as_ref()).await;
    let chat = storage
        .create_chat(user.id, Some("Seed".to_string()))
        .await
        .expect("chat");

    // Empty script: the first completion call fails
    let completions = Arc::new(ScriptedCompletions::new());
    let orchestrator = orchestrator(storage.clone(), completions, default_limits());

    let stream = orchestrator
        .continue_chat(user.id, chat.id, "Hello".to_string())
        .await
        .expect("Failed to continue chat");
    let frames = collect_frames(stream).await;

    assert_eq!(frames.len(), 1);
    match &frames[0] {
        StreamFrame::Error { message } => {
            assert!(message.contains("Completion script exhausted"))
        }
        other => panic!("expected error frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_continue_chat_rejects_foreign_chat() {
    let storage = Arc::new(create_test_storage().await);
    let owner = seed_user(storage.as_ref()).await;
    let intruder = storage
        .create_user("other@example.com", "Other User")
        .await
        .expect("user");
    let chat = storage
        .create_chat(owner.id, Some("Private".to_string()))
        .await
        .expect("chat");

    let completions = Arc::new(ScriptedCompletions::new());
    let orchestrator = orchestrator(storage.clone(), completions, default_limits());

    let err = orchestrator
        .continue_chat(intruder.id, chat.id, "Let me in".to_string())
        .await
        .err()
        .expect("ownership check should fail");
    assert!(err.to_string().contains("Unauthorized"));
}

#[tokio::test]
async fn test_second_turn_replays_history_to_provider() {
    let storage = Arc::new(create_test_storage().await);
    let user = seed_user(storage.as_ref()).await;
    let chat = storage
        .create_chat(user.id, Some("Seed".to_string()))
        .await
        .expect("chat");

    let completions = Arc::new(ScriptedCompletions::new());
    completions.push_text("First answer.", 50);
    completions.push_text("Second answer.", 50);

    let orchestrator = orchestrator(storage.clone(), completions.clone(), default_limits());

    let stream = orchestrator
        .continue_chat(user.id, chat.id, "First question".to_string())
        .await
        .expect("turn 1");
    collect_frames(stream).await;

    let stream = orchestrator
        .continue_chat(user.id, chat.id, "Second question".to_string())
        .await
        .expect("turn 2");
    collect_frames(stream).await;

    let recorded = completions.recorded();
    assert_eq!(recorded.len(), 2);

    // Second call sees the whole first exchange
    let texts: Vec<_> = recorded[1]
        .messages
        .iter()
        .map(|m| m.content().to_string())
        .collect();
    assert!(texts.iter().any(|t| t == "First question"));
    assert!(texts.iter().any(|t| t == "First answer."));
    assert!(texts.iter().any(|t| t == "Second question"));
}

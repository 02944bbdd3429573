// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The `AgentRuntime` trait: the external collaborator that actually talks
//! to a language model. `conduit-agent` never speaks an LLM wire protocol
//! itself (spec §1 Non-goal) — it only drives this trait.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_session::{MessageRole, SessionMessage};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

use crate::lifecycle::AbortSignal;

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session_key: String,
    pub workspace_dir: String,
    pub model: String,
    pub provider: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub prior_messages: Vec<SessionMessage>,
    pub system_prompt: String,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
    pub tokens: Option<Value>,
}

/// Callbacks the runtime invokes while a turn is in progress.
#[async_trait]
pub trait RunCallbacks: Send + Sync {
    async fn on_assistant_delta(&self, text: &str, is_complete: bool);
    async fn on_tool_call(&self, name: &str, phase: &str, args: Option<Value>);
    async fn on_compaction(&self, tokens_before: u64, summary: &str) {
        let _ = (tokens_before, summary);
    }
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, request: RunRequest, abort: AbortSignal, callbacks: Arc<dyn RunCallbacks>) -> RunOutcome;
}

/// Echoes the latest user message back as the assistant reply. Stands in
/// for a real LLM runtime in tests and in the CLI's `chat` surface, the
/// same role the teacher's `sven_model::MockProvider` plays.
pub struct MockAgentRuntime;

#[async_trait]
impl AgentRuntime for MockAgentRuntime {
    async fn run(&self, request: RunRequest, abort: AbortSignal, callbacks: Arc<dyn RunCallbacks>) -> RunOutcome {
        let last_user = request
            .prior_messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, conduit_session::MessageRole::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if abort.aborted() {
            return RunOutcome {
                success: false,
                response: None,
                error: Some("aborted".to_string()),
                tokens: None,
            };
        }

        let reply = format!("echo: {last_user}");
        callbacks.on_assistant_delta(&reply, true).await;

        RunOutcome {
            success: true,
            response: Some(reply),
            error: None,
            tokens: Some(Value::from(0)),
        }
    }
}

/// Drives a real [`conduit_model::ModelProvider`] through one turn:
/// prior messages plus the system prompt go in, the provider's event
/// stream is folded into assistant text (streamed to `callbacks` as it
/// arrives) and a final [`RunOutcome`].
pub struct ModelAgentRuntime {
    provider: Arc<dyn conduit_model::ModelProvider>,
}

impl ModelAgentRuntime {
    pub fn new(provider: Arc<dyn conduit_model::ModelProvider>) -> Self {
        Self { provider }
    }
}

fn to_model_message(msg: &SessionMessage) -> conduit_model::Message {
    match msg.role {
        MessageRole::User => conduit_model::Message::user(msg.content.clone()),
        MessageRole::Assistant => conduit_model::Message::assistant(msg.content.clone()),
        MessageRole::System => conduit_model::Message::system(msg.content.clone()),
    }
}

#[async_trait]
impl AgentRuntime for ModelAgentRuntime {
    async fn run(&self, request: RunRequest, abort: AbortSignal, callbacks: Arc<dyn RunCallbacks>) -> RunOutcome {
        if abort.aborted() {
            return RunOutcome {
                success: false,
                response: None,
                error: Some("aborted".to_string()),
                tokens: None,
            };
        }

        let mut messages: Vec<conduit_model::Message> = request.prior_messages.iter().map(to_model_message).collect();
        if !request.system_prompt.is_empty() {
            messages.insert(0, conduit_model::Message::system(request.system_prompt.clone()));
        }

        let completion = conduit_model::CompletionRequest {
            messages,
            tools: vec![],
            stream: true,
        };

        let mut stream = match self.provider.complete(completion).await {
            Ok(stream) => stream,
            Err(e) => {
                return RunOutcome {
                    success: false,
                    response: None,
                    error: Some(e.to_string()),
                    tokens: None,
                }
            }
        };

        let mut text = String::new();
        let mut tokens = None;

        while let Some(event) = stream.next().await {
            if abort.aborted() {
                return RunOutcome {
                    success: false,
                    response: None,
                    error: Some("aborted".to_string()),
                    tokens: None,
                };
            }
            match event {
                Ok(conduit_model::ResponseEvent::TextDelta(delta)) => {
                    text.push_str(&delta);
                    callbacks.on_assistant_delta(&text, false).await;
                }
                Ok(conduit_model::ResponseEvent::ToolCall { name, arguments, .. }) => {
                    callbacks.on_tool_call(&name, "called", serde_json::from_str(&arguments).ok()).await;
                }
                Ok(conduit_model::ResponseEvent::Usage { input_tokens, output_tokens, cache_read_tokens, cache_write_tokens }) => {
                    tokens = Some(serde_json::json!({
                        "inputTokens": input_tokens,
                        "outputTokens": output_tokens,
                        "cacheReadTokens": cache_read_tokens,
                        "cacheWriteTokens": cache_write_tokens,
                    }));
                }
                Ok(conduit_model::ResponseEvent::ThinkingDelta(_)) => {}
                Ok(conduit_model::ResponseEvent::Done) => break,
                Ok(conduit_model::ResponseEvent::Error(e)) => {
                    return RunOutcome {
                        success: false,
                        response: None,
                        error: Some(e),
                        tokens,
                    };
                }
                Err(e) => {
                    return RunOutcome {
                        success: false,
                        response: None,
                        error: Some(e.to_string()),
                        tokens,
                    };
                }
            }
        }

        callbacks.on_assistant_delta(&text, true).await;

        RunOutcome {
            success: true,
            response: Some(text),
            error: None,
            tokens,
        }
    }
}

#[cfg(test)]
mod model_runtime_tests {
    use super::*;
    use crate::lifecycle::{Lifecycle, LifecycleSink, RunDeltaEvent, RunEndEvent, RunErrorEvent, RunStartEvent};
    use conduit_model::ScriptedMockProvider;
    use conduit_session::SessionMessage;

    struct NoopSink;
    #[async_trait]
    impl LifecycleSink for NoopSink {
        async fn emit_run_start(&self, _ev: RunStartEvent) {}
        async fn emit_run_end(&self, _ev: RunEndEvent) {}
        async fn emit_run_error(&self, _ev: RunErrorEvent) {}
        async fn emit_run_delta(&self, _ev: RunDeltaEvent) {}
    }

    async fn abort_signal() -> crate::lifecycle::AbortSignal {
        Lifecycle::new(Arc::new(NoopSink)).start_run("run-1", "test:1").await
    }

    struct RecordingCallbacks {
        deltas: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RunCallbacks for RecordingCallbacks {
        async fn on_assistant_delta(&self, text: &str, _is_complete: bool) {
            self.deltas.lock().unwrap().push(text.to_string());
        }
        async fn on_tool_call(&self, _name: &str, _phase: &str, _args: Option<Value>) {}
    }

    fn request_with_user_message(text: &str) -> RunRequest {
        RunRequest {
            session_key: "test:1".into(),
            workspace_dir: "/tmp".into(),
            model: "scripted-mock-model".into(),
            provider: "scripted-mock".into(),
            api_key: None,
            base_url: None,
            prior_messages: vec![SessionMessage {
                id: "m1".into(),
                session_key: "test:1".into(),
                role: MessageRole::User,
                content: text.into(),
                timestamp: chrono::Utc::now(),
                metadata: None,
            }],
            system_prompt: String::new(),
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn model_runtime_folds_text_deltas_into_response() {
        let provider = Arc::new(ScriptedMockProvider::always_text("hello world"));
        let runtime = ModelAgentRuntime::new(provider);
        let callbacks = Arc::new(RecordingCallbacks { deltas: std::sync::Mutex::new(vec![]) });

        let outcome = runtime.run(request_with_user_message("hi"), abort_signal().await, callbacks).await;

        assert!(outcome.success);
        assert_eq!(outcome.response.as_deref(), Some("hello world"));
        assert!(outcome.tokens.is_some());
    }

    #[tokio::test]
    async fn model_runtime_reports_tool_calls() {
        let provider = Arc::new(ScriptedMockProvider::tool_then_text("call-1", "shell", r#"{"command":"ls"}"#, "done"));
        let runtime = ModelAgentRuntime::new(provider);
        let called = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct ToolRecorder(Arc<std::sync::Mutex<Vec<String>>>);
        #[async_trait]
        impl RunCallbacks for ToolRecorder {
            async fn on_assistant_delta(&self, _text: &str, _is_complete: bool) {}
            async fn on_tool_call(&self, name: &str, _phase: &str, _args: Option<Value>) {
                self.0.lock().unwrap().push(name.to_string());
            }
        }

        let outcome = runtime
            .run(request_with_user_message("run ls"), abort_signal().await, Arc::new(ToolRecorder(called.clone())))
            .await;

        assert!(outcome.success);
        assert_eq!(called.lock().unwrap().as_slice(), ["shell"]);
    }
}

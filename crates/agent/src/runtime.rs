//! One chat round: propose, execute, synthesize, emit.
//!
//! The model first sees the catalog and may answer directly or propose tool calls. Proposed
//! calls run through the guardrails and the executor with bounded concurrency; their outcomes
//! are appended in proposal order and a second, tool-less pass writes the reply.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::{stream, Stream, StreamExt};
use leadline_core::config::AppConfig;
use leadline_core::errors::ApplicationError;
use leadline_core::outcome::ToolCallRecord;
use leadline_core::prompt;
use leadline_core::transcript::{ChatMessage, ToolCallRequest, Transcript};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatcher::ToolExecutor;
use crate::guardrails::{GuardrailDecision, ToolGuardrails};
use crate::llm::{Completion, LlmClient, LlmError};

const EMPTY_REPLY: &str = "I wasn't able to put together a reply. Could you rephrase the request?";
const STREAM_FAILURE: &str = "The assistant could not finish the reply. Please try again.";

pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

type ExecutionStream = Pin<Box<dyn Stream<Item = (String, ToolCallRecord)> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub history_window: usize,
    pub tool_concurrency: usize,
    /// `None` selects the built-in prompt.
    pub prompt_template: Option<String>,
    pub location_id: String,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_window: config.gateway.history_window,
            tool_concurrency: config.gateway.tool_concurrency,
            prompt_template: config.gateway.system_prompt.clone(),
            location_id: config.crm.location_id.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoundError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error(transparent)]
    Model(#[from] LlmError),
}

impl From<RoundError> for ApplicationError {
    fn from(error: RoundError) -> Self {
        match error {
            RoundError::EmptyMessage => Self::InvalidRequest(error.to_string()),
            RoundError::Model(error) => Self::Model(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoundOutput {
    pub reply: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub transcript: Transcript,
}

/// Progress events of a streamed round, in emission order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    ToolStart {
        tools: usize,
    },
    ToolCall {
        tool: String,
        arguments: Value,
    },
    ToolResult {
        tool: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StreamStart,
    StreamChunk {
        content: String,
    },
    StreamEnd {
        #[serde(rename = "conversationHistory")]
        conversation_history: Transcript,
        #[serde(rename = "toolCalls")]
        tool_calls: Vec<ToolCallRecord>,
    },
    Error {
        error: String,
    },
}

impl ChatEvent {
    fn tool_result(record: &ToolCallRecord) -> Self {
        Self::ToolResult {
            tool: record.tool.clone(),
            success: record.outcome.is_success(),
            error: record.outcome.user_message().map(str::to_string),
        }
    }
}

#[derive(Clone)]
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    executor: Arc<dyn ToolExecutor>,
    guardrails: Arc<ToolGuardrails>,
    model_tools: Arc<[Value]>,
    settings: Arc<RuntimeSettings>,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<dyn ToolExecutor>,
        guardrails: ToolGuardrails,
        settings: RuntimeSettings,
    ) -> Self {
        let model_tools = guardrails.catalog().model_tools().into();
        Self {
            llm,
            executor,
            guardrails: Arc::new(guardrails),
            model_tools,
            settings: Arc::new(settings),
        }
    }

    pub fn guardrails(&self) -> &ToolGuardrails {
        &self.guardrails
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Prompt for this round, dated with the current UTC day.
    pub fn system_prompt(&self) -> String {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        prompt::render(self.settings.prompt_template.as_deref(), &self.settings.location_id, &today)
    }

    pub async fn run_round(&self, message: &str, history: Transcript) -> Result<RoundOutput, RoundError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(RoundError::EmptyMessage);
        }

        let round_id = Uuid::new_v4();
        let started = Instant::now();
        let system_prompt = self.system_prompt();
        let mut transcript = history;
        transcript.push(ChatMessage::user(message));
        info!(
            event_name = "chat.round.started",
            correlation_id = %round_id,
            history_len = transcript.len(),
            "chat round started"
        );

        let completion = self.propose(&transcript, &system_prompt).await.map_err(|error| {
            warn!(
                event_name = "chat.round.model_failed",
                correlation_id = %round_id,
                error = %error,
                "proposal pass failed"
            );
            error
        })?;

        let (reply, tool_calls) = if completion.has_tool_calls() {
            let calls = completion.tool_calls.clone();
            transcript.push(ChatMessage::assistant_tool_calls(completion.content, calls.clone()));

            let records = self.execute_batch(&calls).await;
            for (call, record) in calls.iter().zip(&records) {
                transcript.push(ChatMessage::tool(call.id.clone(), record.outcome.model_content()));
            }

            let synthesis = self
                .llm
                .complete(&transcript.for_model(&system_prompt), None)
                .await
                .map_err(|error| {
                    warn!(
                        event_name = "chat.round.model_failed",
                        correlation_id = %round_id,
                        error = %error,
                        "synthesis pass failed"
                    );
                    error
                })?;
            (reply_text(synthesis.content), records)
        } else {
            (reply_text(completion.content), Vec::new())
        };

        transcript.push(ChatMessage::assistant(reply.clone()));
        transcript.truncate_tail(self.settings.history_window);

        info!(
            event_name = "chat.round.completed",
            correlation_id = %round_id,
            tool_calls = tool_calls.len(),
            failed_calls = tool_calls.iter().filter(|record| !record.outcome.is_success()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chat round completed"
        );

        Ok(RoundOutput { reply, tool_calls, transcript })
    }

    pub fn run_round_streaming(&self, message: String, history: Transcript) -> ChatEventStream {
        let runtime = self.clone();
        Box::pin(async_stream::stream! {
            let message = message.trim().to_string();
            if message.is_empty() {
                yield ChatEvent::Error { error: "Message is required.".to_string() };
                return;
            }

            let round_id = Uuid::new_v4();
            let system_prompt = runtime.system_prompt();
            let mut transcript = history;
            transcript.push(ChatMessage::user(message));
            info!(
                event_name = "chat.stream.started",
                correlation_id = %round_id,
                history_len = transcript.len(),
                "streamed chat round started"
            );

            let completion = match runtime.propose(&transcript, &system_prompt).await {
                Ok(completion) => completion,
                Err(error) => {
                    warn!(event_name = "chat.stream.model_failed", correlation_id = %round_id, error = %error, "proposal pass failed");
                    yield ChatEvent::Error { error: STREAM_FAILURE.to_string() };
                    return;
                }
            };

            if !completion.has_tool_calls() {
                let reply = reply_text(completion.content);
                yield ChatEvent::StreamStart;
                yield ChatEvent::StreamChunk { content: reply.clone() };
                transcript.push(ChatMessage::assistant(reply));
                transcript.truncate_tail(runtime.settings.history_window);
                yield ChatEvent::StreamEnd { conversation_history: transcript, tool_calls: Vec::new() };
                return;
            }

            let calls = completion.tool_calls.clone();
            let announced = calls
                .iter()
                .map(|call| ChatEvent::ToolCall {
                    tool: call.function.name.clone(),
                    arguments: argument_preview(call),
                })
                .collect::<Vec<_>>();
            yield ChatEvent::ToolStart { tools: calls.len() };
            for event in announced {
                yield event;
            }
            transcript.push(ChatMessage::assistant_tool_calls(completion.content, calls.clone()));

            let mut records = Vec::with_capacity(calls.len());
            let mut results = runtime.execute_stream(calls);
            while let Some((call_id, record)) = results.next().await {
                transcript.push(ChatMessage::tool(call_id, record.outcome.model_content()));
                yield ChatEvent::tool_result(&record);
                records.push(record);
            }

            let mut chunks = match runtime.llm.stream(&transcript.for_model(&system_prompt)).await {
                Ok(chunks) => chunks,
                Err(error) => {
                    warn!(event_name = "chat.stream.model_failed", correlation_id = %round_id, error = %error, "synthesis stream failed to open");
                    yield ChatEvent::Error { error: STREAM_FAILURE.to_string() };
                    return;
                }
            };

            yield ChatEvent::StreamStart;
            let mut reply = String::new();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(text) => {
                        reply.push_str(&text);
                        yield ChatEvent::StreamChunk { content: text };
                    }
                    Err(error) => {
                        warn!(event_name = "chat.stream.model_failed", correlation_id = %round_id, error = %error, "synthesis stream broke");
                        yield ChatEvent::Error { error: STREAM_FAILURE.to_string() };
                        return;
                    }
                }
            }

            transcript.push(ChatMessage::assistant(reply_text(Some(reply))));
            transcript.truncate_tail(runtime.settings.history_window);
            info!(
                event_name = "chat.stream.completed",
                correlation_id = %round_id,
                tool_calls = records.len(),
                "streamed chat round completed"
            );
            yield ChatEvent::StreamEnd { conversation_history: transcript, tool_calls: records };
        })
    }

    /// Runs one call through the guardrails and, when admitted, the executor.
    pub async fn execute_call(&self, call: &ToolCallRequest) -> ToolCallRecord {
        match self.guardrails.evaluate(call) {
            GuardrailDecision::Reject { arguments, outcome } => {
                ToolCallRecord { tool: call.function.name.clone(), arguments, outcome }
            }
            GuardrailDecision::Allow { invocation, .. } => {
                let outcome =
                    self.executor.dispatch(&invocation.tool_name, &invocation.resolved_arguments).await;
                ToolCallRecord {
                    tool: invocation.tool_name,
                    arguments: Value::Object(invocation.resolved_arguments),
                    outcome,
                }
            }
        }
    }

    async fn propose(&self, transcript: &Transcript, system_prompt: &str) -> Result<Completion, LlmError> {
        let tools = (!self.model_tools.is_empty()).then_some(&self.model_tools[..]);
        self.llm.complete(&transcript.for_model(system_prompt), tools).await
    }

    /// Outcomes come back in proposal order regardless of completion order.
    async fn execute_batch(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallRecord> {
        self.execute_stream(calls.to_vec()).map(|(_, record)| record).collect().await
    }

    /// Owned, `'static` view of a batch so it can be driven from a spawned or streamed task.
    fn execute_stream(&self, calls: Vec<ToolCallRequest>) -> ExecutionStream {
        let runtime = self.clone();
        let concurrency = self.concurrency();
        stream::iter(calls)
            .map(move |call| {
                let runtime = runtime.clone();
                async move {
                    let record = runtime.execute_call(&call).await;
                    (call.id, record)
                }
            })
            .buffered(concurrency)
            .boxed()
    }

    fn concurrency(&self) -> usize {
        self.settings.tool_concurrency.max(1)
    }
}

fn reply_text(content: Option<String>) -> String {
    content
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| EMPTY_REPLY.to_string())
}

fn argument_preview(call: &ToolCallRequest) -> Value {
    serde_json::from_str(&call.function.arguments)
        .unwrap_or_else(|_| Value::String(call.function.arguments.clone()))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use leadline_core::catalog::ToolCatalog;
    use leadline_core::defaults::{DefaultContext, DefaultPolicy};
    use leadline_core::outcome::{FailureKind, ToolOutcome};
    use leadline_core::transcript::{ChatMessage, Role, ToolCallRequest, Transcript};
    use leadline_core::validation::{Arguments, RuleRegistry};
    use serde_json::{json, Value};

    use super::{AgentRuntime, ChatEvent, RoundError, RuntimeSettings};
    use crate::dispatcher::ToolExecutor;
    use crate::guardrails::ToolGuardrails;
    use crate::llm::{Completion, LlmClient, LlmError};

    /// Replays canned completions and records what each pass was sent.
    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<Completion, LlmError>>>,
        seen: Mutex<Vec<(Vec<ChatMessage>, bool)>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<Completion, LlmError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), seen: Mutex::default() })
        }

        fn passes(&self) -> Vec<(Vec<ChatMessage>, bool)> {
            self.seen.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            tools: Option<&[Value]>,
        ) -> Result<Completion, LlmError> {
            self.seen.lock().expect("lock").push((messages.to_vec(), tools.is_some()));
            self.replies.lock().expect("lock").pop_front().unwrap_or_else(|| Ok(Completion::text("done")))
        }
    }

    /// Succeeds for every tool except `fail_on`; later calls finish first.
    struct CountingExecutor {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl CountingExecutor {
        fn new(fail_on: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), fail_on })
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ToolExecutor for CountingExecutor {
        async fn dispatch(&self, tool_name: &str, arguments: &Arguments) -> ToolOutcome {
            let order = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30u64.saturating_sub(order as u64 * 10))).await;
            if Some(tool_name) == self.fail_on {
                return ToolOutcome::failed(
                    FailureKind::NotFound,
                    "I couldn't find the record you asked about.",
                    "HTTP 404: {\"message\":\"gone\"}",
                );
            }
            ToolOutcome::success(json!({ "tool": tool_name, "echo": Value::Object(arguments.clone()) }))
        }
    }

    fn runtime(llm: Arc<ScriptedLlm>, executor: Arc<CountingExecutor>, window: usize) -> AgentRuntime {
        AgentRuntime::new(
            llm,
            executor,
            ToolGuardrails::new(
                Arc::new(ToolCatalog::builtin().expect("catalog")),
                Arc::new(RuleRegistry::builtin()),
                DefaultPolicy::builtin(),
                DefaultContext {
                    location_id: "loc-home".to_string(),
                    default_email_from: "desk@example.com".to_string(),
                },
            ),
            RuntimeSettings {
                history_window: window,
                tool_concurrency: 4,
                prompt_template: Some("Assist location {location_id}.".to_string()),
                location_id: "loc-home".to_string(),
            },
        )
    }

    fn calls(specs: &[(&str, &str, &str)]) -> Completion {
        Completion::with_tool_calls(
            specs.iter().map(|(id, name, args)| ToolCallRequest::new(*id, *name, *args)).collect(),
        )
    }

    #[tokio::test]
    async fn rounds_can_run_on_spawned_tasks() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[("call_a", "contacts_get-contact", r#"{"path_contactId":"c-1"}"#)])),
            Ok(Completion::text("Found them.")),
        ]);
        let runtime = runtime(llm, CountingExecutor::new(None), 20);

        let buffered = runtime.clone();
        let output = tokio::spawn(async move {
            buffered.run_round("find c-1", Transcript::default()).await
        })
        .await
        .expect("join")
        .expect("round");
        assert_eq!(output.reply, "Found them.");

        let events = tokio::spawn(async move {
            runtime.run_round_streaming("find c-1".to_string(), Transcript::default()).collect::<Vec<_>>().await
        })
        .await
        .expect("join");
        assert!(matches!(events.last(), Some(ChatEvent::StreamEnd { .. })));
    }

    #[tokio::test]
    async fn plain_answer_skips_tools_and_second_pass() {
        let llm = ScriptedLlm::new(vec![Ok(Completion::text("Hello! How can I help?"))]);
        let executor = CountingExecutor::new(None);

        let output = runtime(llm.clone(), executor.clone(), 20)
            .run_round("hi", Transcript::default())
            .await
            .expect("round");

        assert_eq!(output.reply, "Hello! How can I help?");
        assert!(output.tool_calls.is_empty());
        assert_eq!(output.transcript.len(), 2);
        assert_eq!(llm.passes().len(), 1);
        assert!(llm.passes()[0].1, "first pass offers the catalog");
        assert_eq!(llm.passes()[0].0[0].text(), "Assist location loc-home.");
        assert_eq!(executor.count(), 0);
    }

    #[tokio::test]
    async fn failed_call_does_not_stop_its_siblings() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[
                ("call_a", "contacts_get-contact", r#"{"path_contactId":"c-1"}"#),
                ("call_b", "contacts_get-all-tasks", r#"{"path_contactId":"c-1"}"#),
                ("call_c", "contacts_get-contacts", r#"{"query_query":"ada"}"#),
            ])),
            Ok(Completion::text("Here is what I found.")),
        ]);
        let executor = CountingExecutor::new(Some("contacts_get-all-tasks"));

        let output = runtime(llm.clone(), executor.clone(), 20)
            .run_round("look up ada", Transcript::default())
            .await
            .expect("round");

        let statuses = output.tool_calls.iter().map(|record| record.outcome.status()).collect::<Vec<_>>();
        assert_eq!(statuses, vec!["success", "execution_failure", "success"]);
        assert_eq!(executor.count(), 3);
        assert_eq!(output.reply, "Here is what I found.");

        let (synthesis, offered_tools) = &llm.passes()[1];
        assert!(!offered_tools, "synthesis pass runs without tools");
        let tool_ids = synthesis
            .iter()
            .filter(|message| message.role == Role::Tool)
            .map(|message| message.tool_call_id.clone().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(tool_ids, vec!["call_a", "call_b", "call_c"]);
        let failed = synthesis.iter().find(|m| m.tool_call_id.as_deref() == Some("call_b")).expect("call_b");
        assert!(!failed.text().contains("gone"), "technical detail stays out of the model view");
    }

    #[tokio::test]
    async fn validation_failure_never_reaches_the_executor() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[("call_a", "contacts_add-tags", r#"{"body_tags":["vip"]}"#)])),
            Ok(Completion::text("Which contact should I tag?")),
        ]);
        let executor = CountingExecutor::new(None);

        let output = runtime(llm, executor.clone(), 20)
            .run_round("tag them vip", Transcript::default())
            .await
            .expect("round");

        assert_eq!(executor.count(), 0);
        assert!(matches!(
            &output.tool_calls[0].outcome,
            ToolOutcome::ValidationFailure { missing, .. } if missing == &vec!["path_contactId".to_string()]
        ));
    }

    #[tokio::test]
    async fn tagging_a_contact_is_confirmed_in_the_reply() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[(
                "call_tag",
                "contacts_add-tags",
                r#"{"path_contactId":"123","body_tags":["vip"]}"#,
            )])),
            Ok(Completion::text("Done! Contact 123 is now tagged vip.")),
        ]);
        let executor = CountingExecutor::new(None);

        let output = runtime(llm.clone(), executor.clone(), 20)
            .run_round("add tag vip to contact 123", Transcript::default())
            .await
            .expect("round");

        assert_eq!(executor.count(), 1);
        assert_eq!(output.tool_calls.len(), 1);
        assert!(output.tool_calls[0].outcome.is_success());
        assert_eq!(
            output.tool_calls[0].arguments,
            json!({"path_contactId": "123", "body_tags": ["vip"]})
        );
        assert_eq!(output.reply, "Done! Contact 123 is now tagged vip.");

        let roles = output.transcript.entries().iter().map(|message| message.role).collect::<Vec<_>>();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        let tool_reply = &llm.passes()[1].0;
        assert!(tool_reply.iter().any(|message| {
            message.tool_call_id.as_deref() == Some("call_tag") && message.text().contains("vip")
        }));
    }

    #[tokio::test]
    async fn contact_without_email_or_phone_asks_for_one() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[(
                "call_new",
                "contacts_create-contact",
                r#"{"body_firstName":"Jo","body_lastName":"Park"}"#,
            )])),
            Ok(Completion::text("Sure! What's Jo's email address or phone number?")),
        ]);
        let executor = CountingExecutor::new(None);

        let output = runtime(llm.clone(), executor.clone(), 20)
            .run_round("create a contact named Jo", Transcript::default())
            .await
            .expect("round");

        assert_eq!(executor.count(), 0);
        match &output.tool_calls[0].outcome {
            ToolOutcome::ValidationFailure { missing, errors, .. } => {
                assert!(missing.is_empty());
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("body_email") && errors[0].contains("body_phone"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert!(output.reply.contains("email") && output.reply.contains("phone"));

        let synthesis = &llm.passes()[1].0;
        let fed_back = synthesis
            .iter()
            .find(|message| message.tool_call_id.as_deref() == Some("call_new"))
            .expect("tool reply");
        assert!(fed_back.text().contains("validation_error"));
    }

    #[tokio::test]
    async fn defaults_are_visible_in_the_record() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[("call_a", "payments_list-transactions", "{}")])),
            Ok(Completion::text("No transactions yet.")),
        ]);

        let output = runtime(llm, CountingExecutor::new(None), 20)
            .run_round("show payments", Transcript::default())
            .await
            .expect("round");

        assert_eq!(
            output.tool_calls[0].arguments,
            json!({"query_limit": 10, "query_offset": 0, "query_altId": "loc-home", "query_altType": "location"})
        );
    }

    #[tokio::test]
    async fn transcript_is_truncated_to_the_window() {
        let history = Transcript::new(
            (0..12)
                .flat_map(|n| [ChatMessage::user(format!("q{n}")), ChatMessage::assistant(format!("a{n}"))])
                .collect(),
        );
        let llm = ScriptedLlm::new(vec![Ok(Completion::text("latest"))]);

        let output = runtime(llm, CountingExecutor::new(None), 20)
            .run_round("newest", history)
            .await
            .expect("round");

        assert_eq!(output.transcript.len(), 20);
        assert_eq!(output.transcript.entries().last().map(ChatMessage::text), Some("latest"));
    }

    #[tokio::test]
    async fn empty_message_and_model_failure_are_errors() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::Timeout)]);
        let runtime = runtime(llm, CountingExecutor::new(None), 20);

        assert!(matches!(
            runtime.run_round("   ", Transcript::default()).await,
            Err(RoundError::EmptyMessage)
        ));
        assert!(matches!(
            runtime.run_round("hello", Transcript::default()).await,
            Err(RoundError::Model(LlmError::Timeout))
        ));
    }

    #[tokio::test]
    async fn streamed_round_emits_events_in_order() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[
                ("call_a", "contacts_get-contact", r#"{"path_contactId":"c-1"}"#),
                ("call_b", "contacts_add-tags", r#"{"body_tags":["vip"]}"#),
            ])),
            Ok(Completion::text("Tagged where possible.")),
        ]);

        let events = runtime(llm, CountingExecutor::new(None), 20)
            .run_round_streaming("tag ada".to_string(), Transcript::default())
            .collect::<Vec<_>>()
            .await;

        let kinds = events
            .iter()
            .map(|event| serde_json::to_value(event).expect("serialize")["type"].as_str().unwrap_or("").to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                "tool_start", "tool_call", "tool_call", "tool_result", "tool_result", "stream_start",
                "stream_chunk", "stream_end",
            ]
        );
        assert_eq!(
            events[4],
            ChatEvent::ToolResult {
                tool: "contacts_add-tags".to_string(),
                success: false,
                error: Some(
                    "I need some additional information before I can proceed. Missing required information: path_contactId"
                        .to_string()
                ),
            }
        );
        let ChatEvent::StreamEnd { conversation_history, tool_calls } = &events[7] else {
            panic!("expected stream_end");
        };
        assert_eq!(tool_calls.len(), 2);
        assert_eq!(conversation_history.len(), 5);
        let end = serde_json::to_value(&events[7]).expect("serialize");
        assert!(end.get("conversationHistory").is_some());
        assert!(end.get("toolCalls").is_some());
    }

    #[tokio::test]
    async fn streamed_model_failure_emits_error_event() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::Api("overloaded".to_string()))]);

        let events = runtime(llm, CountingExecutor::new(None), 20)
            .run_round_streaming("hi".to_string(), Transcript::default())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChatEvent::Error { error } if !error.contains("overloaded")));
    }
}

//! Agent Runtime - model-driven tool orchestration over the CRM
//!
//! A chat round follows a fixed loop:
//! 1. **Propose** (`llm`) - the model sees the catalog and answers or proposes tool calls
//! 2. **Gate** (`guardrails`) - arguments are parsed, defaulted and validated before any I/O
//! 3. **Dispatch** (`dispatcher`) - admitted calls hit the CRM; failures become classified outcomes
//! 4. **Synthesize** (`runtime`) - a tool-less pass turns the outcomes into the reply
//!
//! The model never sees raw HTTP bodies or protocol errors, only user-safe outcome text.

pub mod dispatcher;
pub mod guardrails;
pub mod llm;
pub mod runtime;

pub use dispatcher::{classify, CrmToolDispatcher, Route, ToolExecutor};
pub use guardrails::{GuardrailDecision, ToolGuardrails};
pub use llm::{Completion, LlmClient, LlmError, OpenAiCompatibleClient, TextStream};
pub use runtime::{AgentRuntime, ChatEvent, ChatEventStream, RoundError, RoundOutput, RuntimeSettings};

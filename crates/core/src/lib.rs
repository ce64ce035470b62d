pub mod catalog;
pub mod config;
pub mod defaults;
pub mod errors;
pub mod outcome;
pub mod prompt;
pub mod transcript;
pub mod validation;

pub use catalog::{CatalogError, ToolCatalog, ToolDescriptor};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
pub use defaults::{DefaultContext, DefaultPolicy};
pub use errors::{ApplicationError, InterfaceError};
pub use outcome::{FailureKind, ToolCallRecord, ToolInvocation, ToolOutcome};
pub use transcript::{ChatMessage, Role, ToolCallRequest, Transcript};
pub use validation::{RuleKind, RuleRegistry, ValidationReport, ValidationRule};

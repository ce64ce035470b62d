//! Clients for the CRM: the JSON-RPC tool-execution endpoint and the calendar REST API.

pub mod calendar;
pub mod http;
pub mod mcp;
pub mod normalize;

use thiserror::Error;

pub use calendar::{AppointmentRequest, CalendarClient, CalendarListQuery, CalendarOperation, SlotQuery};
pub use mcp::{McpClient, RemoteTool};
pub use normalize::{normalize, normalize_value, CanonicalResult, NormalizeError};

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String, message: Option<String> },
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("network failure: {0}")]
    Network(String),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("could not build HTTP client: {0}")]
    Client(String),
}

impl CrmError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message the remote side put in its error body, if any.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Http { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

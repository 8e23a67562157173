//! Error types shared by the session gateway, tool registry, transport and
//! controller.

use thiserror::Error;

/// Errors raised while creating, running or tearing down a voice session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad input, caught before any network call.
    #[error("{0}")]
    Validation(String),

    /// The provider answered with a non-success HTTP status.
    #[error("API Error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// The provider answered with success but the body was unusable.
    #[error("Invalid response: {0}")]
    Protocol(String),

    /// The remote agent asked for a tool nobody registered.
    #[error("Unknown tool: '{0}'")]
    UnknownTool(String),

    /// A registered tool failed while handling an invocation.
    #[error("Tool '{name}' failed: {reason}")]
    ToolFailed { name: String, reason: String },

    /// A tool could not be registered with the transport during startup.
    #[error("Failed to register tool '{name}': {reason}")]
    ToolRegistration { name: String, reason: String },

    /// The transport failed to join or reported a fatal condition.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-fatal failure while releasing the transport.
    #[error("Teardown error: {0}")]
    Teardown(String),

    /// An operation that needs a live session was called without one.
    #[error("No active session")]
    NoActiveSession,

    /// The HTTP request itself failed (connection, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors produced by a [`crate::transport::VoiceTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    Connect(String),
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),
    #[error("Tool registration rejected: {0}")]
    Registration(String),
    #[error("Failed to send message: {0}")]
    Send(String),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err.to_string())
    }
}

/// Errors a client tool implementation may return.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("{0}")]
    Failed(String),
}

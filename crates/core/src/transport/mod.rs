//! The real-time media channel a joined session runs over.
//!
//! A transport is owned by exactly one session. It carries audio, relays
//! status and transcript updates as [`TransportEvent`]s, and routes client
//! tool invocations to the implementations registered on it.

pub mod websocket;

use crate::error::TransportError;
use crate::tools::ClientTool;
use crate::transcript::TranscriptEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use websocket::{WebSocketTransport, WebSocketTransportFactory};

/// Conversation status as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Disconnected,
    Disconnecting,
    Connecting,
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl TransportStatus {
    /// Parses the provider's status string.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "disconnected" => Some(Self::Disconnected),
            "disconnecting" => Some(Self::Disconnecting),
            "connecting" => Some(Self::Connecting),
            "idle" => Some(Self::Idle),
            "listening" => Some(Self::Listening),
            "thinking" => Some(Self::Thinking),
            "speaking" => Some(Self::Speaking),
            _ => None,
        }
    }

    /// True once the conversation itself is underway.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Listening | Self::Thinking | Self::Speaking
        )
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Disconnecting => "disconnecting",
            Self::Connecting => "connecting",
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status(TransportStatus),
    /// Full transcript snapshot; later snapshots supersede earlier ones.
    Transcripts(Vec<TranscriptEntry>),
    Debug(serde_json::Value),
    /// Recoverable error, relayed to the host without ending the session.
    Error(String),
    /// The channel is unusable and the session cannot continue.
    Fatal(String),
    /// The remote side closed the channel.
    Closed,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    fn register_tool(&self, name: &str, tool: Arc<dyn ClientTool>) -> Result<(), TransportError>;
    fn unregister_tool(&self, name: &str);
    fn registered_tools(&self) -> Vec<String>;

    /// Connects to `join_url` and starts streaming events into `events`.
    async fn join(
        &self,
        join_url: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError>;

    /// Releases the channel. Safe to call more than once.
    async fn leave(&self) -> Result<(), TransportError>;

    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    fn set_mic_muted(&self, muted: bool);
    fn set_speaker_muted(&self, muted: bool);
    fn is_mic_muted(&self) -> bool;
    fn is_speaker_muted(&self) -> bool;
}

/// Produces a fresh transport for every session.
#[cfg_attr(test, mockall::automock)]
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Arc<dyn VoiceTransport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(TransportStatus::from_wire("speaking"), Some(TransportStatus::Speaking));
        assert_eq!(TransportStatus::from_wire("bogus"), None);
        assert_eq!(TransportStatus::Thinking.to_string(), "thinking");
        assert_eq!(
            serde_json::to_string(&TransportStatus::Listening).unwrap(),
            "\"listening\""
        );
    }

    #[test]
    fn test_live_statuses() {
        assert!(TransportStatus::Idle.is_live());
        assert!(TransportStatus::Speaking.is_live());
        assert!(!TransportStatus::Connecting.is_live());
        assert!(!TransportStatus::Disconnected.is_live());
    }
}

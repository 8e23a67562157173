//! Session lifecycle states and the observer interface the controller
//! reports through.

use crate::error::SessionError;
use crate::transcript::TranscriptEntry;
use crate::transport::TransportStatus;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Lifecycle of the single session a controller owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Ending,
    Ended,
    Failed,
}

impl SessionState {
    /// A session exists and holds a transport.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::Ended => "ended",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the host sees on its status line.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Connecting,
    Transport(TransportStatus),
    Ended,
    Error(String),
}

impl SessionStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<&SessionError> for SessionStatus {
    fn from(err: &SessionError) -> Self {
        Self::Error(err.to_string())
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Transport(status) => write!(f, "{status}"),
            Self::Ended => f.write_str("ended"),
            Self::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Single consumer of a session's events. Calls arrive in order.
pub trait SessionObserver: Send + Sync {
    fn on_status(&self, status: &SessionStatus);
    fn on_transcript(&self, entries: &[TranscriptEntry]);
    fn on_debug(&self, _message: &serde_json::Value) {}
    /// A poll cycle failed; polling continues.
    fn on_poll_error(&self, _message: &str) {}
}

/// Events as delivered by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(SessionStatus),
    Transcript(Vec<TranscriptEntry>),
    Debug(serde_json::Value),
    PollError(String),
}

/// Forwards every callback onto an unbounded channel, for hosts that prefer
/// a stream over callbacks.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SessionEvent) {
        // The host going away is not the session's problem.
        let _ = self.tx.send(event);
    }
}

impl SessionObserver for ChannelObserver {
    fn on_status(&self, status: &SessionStatus) {
        self.forward(SessionEvent::Status(status.clone()));
    }

    fn on_transcript(&self, entries: &[TranscriptEntry]) {
        self.forward(SessionEvent::Transcript(entries.to_vec()));
    }

    fn on_debug(&self, message: &serde_json::Value) {
        self.forward(SessionEvent::Debug(message.clone()));
    }

    fn on_poll_error(&self, message: &str) {
        self.forward(SessionEvent::PollError(message.to_string()));
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_status(&self, _status: &SessionStatus) {}
    fn on_transcript(&self, _entries: &[TranscriptEntry]) {}
}

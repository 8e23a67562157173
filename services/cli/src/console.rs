//! Terminal rendering of session statuses and transcripts.

use parley_core::client_tools::ToolEvent;
use parley_core::{Role, SessionObserver, SessionStatus, TranscriptEntry};
use std::sync::Mutex;

/// Prints statuses and each finished transcript line exactly once.
pub struct ConsoleObserver {
    show_transcript: bool,
    printed: Mutex<usize>,
}

impl ConsoleObserver {
    /// With `show_transcript` off only statuses are printed; used for the
    /// controller when a poller owns the transcript.
    pub fn new(show_transcript: bool) -> Self {
        Self {
            show_transcript,
            printed: Mutex::new(0),
        }
    }

    /// Lines not printed yet. Stops at the first entry still being spoken.
    fn pending_lines(&self, entries: &[TranscriptEntry]) -> Vec<String> {
        let Ok(mut printed) = self.printed.lock() else {
            return Vec::new();
        };
        let mut lines = Vec::new();
        for entry in entries.iter().skip(*printed) {
            if !entry.is_final {
                break;
            }
            // Placeholders left by scrubbing keep their slot but print nothing.
            if !entry.text.is_empty() {
                lines.push(format_entry(entry));
            }
            *printed += 1;
        }
        lines
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_status(&self, status: &SessionStatus) {
        if status.is_error() {
            eprintln!("[status] {status}");
        } else {
            println!("[status] {status}");
        }
    }

    fn on_transcript(&self, entries: &[TranscriptEntry]) {
        if !self.show_transcript {
            return;
        }
        for line in self.pending_lines(entries) {
            println!("{line}");
        }
    }

    fn on_poll_error(&self, message: &str) {
        eprintln!("[poll] {message}");
    }
}

pub fn format_entry(entry: &TranscriptEntry) -> String {
    let speaker = match entry.role {
        Role::Agent => "agent",
        Role::User => "you",
    };
    format!("{speaker:>5} | {}", entry.text)
}

pub fn format_tool_event(event: &ToolEvent) -> String {
    match event {
        ToolEvent::OrderDetailsUpdated(order) => format!("[order] {order}"),
        ToolEvent::ProductHighlighted(product) => format!("[highlight] {product}"),
        ToolEvent::InterviewDataCaptured(capture) => {
            format!("[interview] {:?}: {}", capture.kind, capture.data)
        }
    }
}

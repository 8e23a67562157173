//! Merges pushed snapshots or polled pages of a call transcript into one
//! ordered, duplicate-free, non-regressing view.

use crate::transcript::{Medium, MessagePage, Role, TranscriptEntry, scrub_tool_fragments};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Reconciled transcript state for a single call.
#[derive(Debug, Default, Clone)]
pub struct TranscriptReconciler {
    entries: Vec<TranscriptEntry>,
    /// What was last handed out for display.
    view: Vec<TranscriptEntry>,
    /// Highest page offset already consumed in poll mode.
    last_consumed: Option<u64>,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push mode: the latest complete array replaces the current one.
    ///
    /// A snapshot shorter than what is already shown is ignored so the view
    /// never regresses. Returns `true` when the view changed.
    pub fn apply_snapshot(&mut self, snapshot: Vec<TranscriptEntry>) -> bool {
        if snapshot.len() < self.entries.len() {
            warn!(
                shown = self.entries.len(),
                received = snapshot.len(),
                "Ignoring transcript snapshot shorter than the current view"
            );
            return false;
        }
        if snapshot == self.entries {
            return false;
        }
        self.entries = snapshot;
        self.refresh_view();
        true
    }

    /// Poll mode: appends only the messages beyond the last consumed offset.
    ///
    /// A page with the same or fewer messages than before means "no new
    /// data". Returns the number of entries appended.
    pub fn apply_page(&mut self, page: &MessagePage) -> usize {
        let start = self.last_consumed.map_or(0, |idx| idx + 1) as usize;
        if page.results.len() <= start {
            return 0;
        }

        let before = self.entries.len();
        for (offset, message) in page.results.iter().enumerate().skip(start) {
            let Some(role) = Role::from_wire(&message.role) else {
                debug!(role = %message.role, offset, "Skipping non-conversational message");
                continue;
            };
            self.entries.push(TranscriptEntry {
                role,
                text: message.text.clone().unwrap_or_default(),
                medium: Medium::from_wire(message.medium.as_deref()),
                position: offset as u64,
                is_final: true,
            });
        }
        self.last_consumed = Some(page.results.len() as u64 - 1);
        self.refresh_view();
        self.entries.len() - before
    }

    /// Raw entries, exactly as received.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Entries ready for display, with leaked tool-call payloads scrubbed.
    ///
    /// An entry left empty by scrubbing is dropped unless its position was
    /// already displayed; then it stays as an empty placeholder so the view
    /// never gets shorter.
    pub fn view(&self) -> Vec<TranscriptEntry> {
        self.view.clone()
    }

    fn refresh_view(&mut self) {
        let shown: HashSet<u64> = self.view.iter().map(|e| e.position).collect();
        self.view = self
            .entries
            .iter()
            .filter_map(|entry| {
                let text = scrub_tool_fragments(&entry.text);
                (!text.is_empty() || shown.contains(&entry.position)).then(|| TranscriptEntry {
                    text,
                    ..entry.clone()
                })
            })
            .collect();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets everything; used when a new call begins.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.view.clear();
        self.last_consumed = None;
    }

    /// Hands the raw transcript off, e.g. to analysis.
    pub fn export(self) -> Vec<TranscriptEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Message;

    fn message(role: &str, text: &str, idx: u64) -> Message {
        Message {
            role: role.to_string(),
            text: Some(text.to_string()),
            medium: Some("MESSAGE_MEDIUM_VOICE".to_string()),
            call_stage_message_index: Some(idx),
            call_stage_id: Some("stage-1".to_string()),
        }
    }

    fn page(messages: Vec<Message>) -> MessagePage {
        MessagePage {
            total: messages.len() as u64,
            results: messages,
            next: None,
            previous: None,
        }
    }

    fn texts(reconciler: &TranscriptReconciler) -> Vec<String> {
        reconciler.entries().iter().map(|e| e.text.clone()).collect()
    }

    #[test]
    fn test_poll_same_page_twice_does_not_duplicate() {
        let mut reconciler = TranscriptReconciler::new();
        let ab = page(vec![
            message("MESSAGE_ROLE_AGENT", "A", 0),
            message("MESSAGE_ROLE_USER", "B", 1),
        ]);

        assert_eq!(reconciler.apply_page(&ab), 2);
        assert_eq!(reconciler.apply_page(&ab), 0);
        assert_eq!(texts(&reconciler), vec!["A", "B"]);
    }

    #[test]
    fn test_poll_appends_only_new_entries() {
        let mut reconciler = TranscriptReconciler::new();
        reconciler.apply_page(&page(vec![
            message("MESSAGE_ROLE_AGENT", "A", 0),
            message("MESSAGE_ROLE_USER", "B", 1),
        ]));
        let appended = reconciler.apply_page(&page(vec![
            message("MESSAGE_ROLE_AGENT", "A", 0),
            message("MESSAGE_ROLE_USER", "B", 1),
            message("MESSAGE_ROLE_AGENT", "C", 2),
        ]));

        assert_eq!(appended, 1);
        assert_eq!(texts(&reconciler), vec!["A", "B", "C"]);
        let positions: Vec<u64> = reconciler.entries().iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_poll_shorter_page_is_not_a_regression() {
        let mut reconciler = TranscriptReconciler::new();
        reconciler.apply_page(&page(vec![
            message("MESSAGE_ROLE_AGENT", "A", 0),
            message("MESSAGE_ROLE_USER", "B", 1),
        ]));
        assert_eq!(reconciler.apply_page(&page(vec![])), 0);
        assert_eq!(
            reconciler.apply_page(&page(vec![message("MESSAGE_ROLE_AGENT", "A", 0)])),
            0
        );
        assert_eq!(texts(&reconciler), vec!["A", "B"]);
    }

    #[test]
    fn test_poll_skips_tool_messages_but_consumes_their_offset() {
        let mut reconciler = TranscriptReconciler::new();
        reconciler.apply_page(&page(vec![
            message("MESSAGE_ROLE_AGENT", "A", 0),
            message("MESSAGE_ROLE_TOOL_CALL", "", 1),
            message("MESSAGE_ROLE_USER", "B", 2),
        ]));
        assert_eq!(texts(&reconciler), vec!["A", "B"]);
        assert_eq!(reconciler.entries()[1].position, 2);
    }

    #[test]
    fn test_snapshot_replaces_but_never_shrinks() {
        let mut reconciler = TranscriptReconciler::new();
        let first = vec![
            TranscriptEntry::new(Role::Agent, "Hi", 0),
            TranscriptEntry::new(Role::User, "Hel", 1),
        ];
        assert!(reconciler.apply_snapshot(first.clone()));
        assert!(!reconciler.apply_snapshot(first));

        let grown = vec![
            TranscriptEntry::new(Role::Agent, "Hi", 0),
            TranscriptEntry::new(Role::User, "Hello there", 1),
        ];
        assert!(reconciler.apply_snapshot(grown));
        assert_eq!(reconciler.entries()[1].text, "Hello there");

        assert!(!reconciler.apply_snapshot(vec![TranscriptEntry::new(Role::Agent, "Hi", 0)]));
        assert_eq!(reconciler.len(), 2);
    }

    #[test]
    fn test_view_scrubs_and_drops_empty_entries() {
        let mut reconciler = TranscriptReconciler::new();
        reconciler.apply_snapshot(vec![
            TranscriptEntry::new(Role::Agent, r#"Noted. {"type":"function","function":{"name":"updateOrder"}}"#, 0),
            TranscriptEntry::new(Role::Agent, r#"{"type":"function","function":{"name":"updateOrder"}}"#, 1),
        ]);
        let view = reconciler.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].text, "Noted.");
        assert_eq!(reconciler.entries().len(), 2);
    }

    #[test]
    fn test_view_keeps_slot_when_streamed_fragment_closes() {
        let mut reconciler = TranscriptReconciler::new();
        reconciler.apply_snapshot(vec![
            TranscriptEntry::new(Role::Agent, "Welcome!", 0),
            TranscriptEntry::new(Role::Agent, r#"{"type":"function","function":{"name":"updateOrder""#, 1),
        ]);
        assert_eq!(reconciler.view().len(), 2);

        assert!(reconciler.apply_snapshot(vec![
            TranscriptEntry::new(Role::Agent, "Welcome!", 0),
            TranscriptEntry::new(Role::Agent, r#"{"type":"function","function":{"name":"updateOrder"}}"#, 1),
        ]));
        let view = reconciler.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].text, "Welcome!");
        assert_eq!(view[1].text, "");
        assert_eq!(view[1].position, 1);
    }

    #[test]
    fn test_reset_forgets_consumed_offset() {
        let mut reconciler = TranscriptReconciler::new();
        let ab = page(vec![
            message("MESSAGE_ROLE_AGENT", "A", 0),
            message("MESSAGE_ROLE_USER", "B", 1),
        ]);
        reconciler.apply_page(&ab);
        reconciler.reset();
        assert!(reconciler.is_empty());
        assert_eq!(reconciler.apply_page(&ab), 2);
    }
}

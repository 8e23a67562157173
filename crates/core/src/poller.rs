//! Poll-mode transcript delivery for hosts without a push channel.

use crate::events::{SessionObserver, SessionState};
use crate::gateway::MessageSource;
use crate::reconciler::TranscriptReconciler;
use crate::transcript::TranscriptEntry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Periodically fetches a call's messages and appends the new ones.
///
/// Fetches are awaited inside the loop and missed ticks are skipped, so a
/// slow fetch never overlaps the next one. The task stops when the session
/// leaves `Connecting`/`Active`, on [`stop`](Self::stop), or when the
/// poller is dropped.
pub struct TranscriptPoller {
    task: Option<JoinHandle<TranscriptReconciler>>,
    stop: Option<oneshot::Sender<()>>,
    transcript: watch::Receiver<Vec<TranscriptEntry>>,
}

impl TranscriptPoller {
    pub fn spawn(
        source: Arc<dyn MessageSource>,
        call_id: impl Into<String>,
        interval: Duration,
        state: watch::Receiver<SessionState>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let call_id = call_id.into();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (transcript_tx, transcript_rx) = watch::channel(Vec::new());
        let span = tracing::info_span!("transcript_poller", %call_id);
        let task = tokio::spawn(
            poll_loop(source, call_id, interval, state, observer, stop_rx, transcript_tx)
                .instrument(span),
        );
        Self {
            task: Some(task),
            stop: Some(stop_tx),
            transcript: transcript_rx,
        }
    }

    /// Reconciled, scrubbed transcript so far.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<TranscriptEntry>> {
        self.transcript.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops polling and returns the raw reconciled transcript.
    pub async fn stop(mut self) -> Vec<TranscriptEntry> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.take() {
            Some(task) => match task.await {
                Ok(reconciler) => reconciler.export(),
                Err(e) => {
                    warn!(error = %e, "Transcript poller ended abnormally");
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }
}

impl Drop for TranscriptPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_loop(
    source: Arc<dyn MessageSource>,
    call_id: String,
    period: Duration,
    mut state: watch::Receiver<SessionState>,
    observer: Arc<dyn SessionObserver>,
    mut stop: oneshot::Receiver<()>,
    transcript: watch::Sender<Vec<TranscriptEntry>>,
) -> TranscriptReconciler {
    let mut reconciler = TranscriptReconciler::new();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_ms = period.as_millis() as u64, "Transcript polling started");

    loop {
        if !state.borrow_and_update().is_live() {
            break;
        }
        tokio::select! {
            _ = &mut stop => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match source.fetch_messages(&call_id).await {
                    Ok(page) => {
                        let appended = reconciler.apply_page(&page);
                        if appended > 0 {
                            debug!(appended, "New transcript messages");
                            let view = reconciler.view();
                            transcript.send_replace(view.clone());
                            observer.on_transcript(&view);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Transcript poll failed");
                        observer.on_poll_error(&e.to_string());
                    }
                }
            }
        }
    }

    info!("Transcript polling stopped");
    reconciler
}

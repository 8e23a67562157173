//! Lifecycle owner for one voice session at a time.
//!
//! A [`SessionController`] creates the remote session, registers every
//! client tool on a fresh transport, joins, and then pumps transport events
//! to its observer until the session is ended. `start` and `end` are
//! serialized by an internal async mutex, so an `end` issued while `start`
//! is still running waits for it instead of racing the handle assignment.

use crate::call_config::CallConfiguration;
use crate::error::SessionError;
use crate::events::{SessionObserver, SessionState, SessionStatus};
use crate::gateway::{SessionGateway, SessionHandle};
use crate::reconciler::TranscriptReconciler;
use crate::tools::ToolRegistry;
use crate::transcript::{Role, TranscriptEntry};
use crate::transport::{TransportEvent, TransportFactory, VoiceTransport};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, instrument, warn};

const EVENT_BUFFER: usize = 64;

struct LiveSession {
    handle: SessionHandle,
    transport: Arc<dyn VoiceTransport>,
    pump: JoinHandle<()>,
}

/// State shared between the controller and its event pump.
#[derive(Clone)]
struct Shared {
    observer: Arc<dyn SessionObserver>,
    state: Arc<watch::Sender<SessionState>>,
    transcript: Arc<watch::Sender<Vec<TranscriptEntry>>>,
    /// Bumped on every start and teardown; a pump only touches state while
    /// its own generation is current.
    generation: Arc<AtomicU64>,
}

impl Shared {
    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Session state changed");
        }
    }

    /// Moves `from_any` states to `next`, unless `generation` is stale.
    fn transition_if_current(
        &self,
        generation: u64,
        from_any: &[SessionState],
        next: SessionState,
    ) -> bool {
        self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation || !from_any.contains(state) {
                return false;
            }
            debug!(from = %state, to = %next, "Session state changed");
            *state = next;
            true
        })
    }
}

pub struct SessionController {
    gateway: Arc<dyn SessionGateway>,
    transports: Arc<dyn TransportFactory>,
    tools: ToolRegistry,
    shared: Shared,
    inner: Mutex<Option<LiveSession>>,
}

impl SessionController {
    pub fn new(
        gateway: Arc<dyn SessionGateway>,
        transports: Arc<dyn TransportFactory>,
        tools: ToolRegistry,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (transcript, _) = watch::channel(Vec::new());
        Self {
            gateway,
            transports,
            tools,
            shared: Shared {
                observer,
                state: Arc::new(state),
                transcript: Arc::new(transcript),
                generation: Arc::new(AtomicU64::new(0)),
            },
            inner: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Latest reconciled (scrubbed) push transcript of the current session.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.shared.transcript.borrow().clone()
    }

    pub fn subscribe_transcript(&self) -> watch::Receiver<Vec<TranscriptEntry>> {
        self.shared.transcript.subscribe()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn call_id(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .as_ref()
            .map(|live| live.handle.call_id.clone())
    }

    /// Starts a new session and returns its call ID.
    ///
    /// Any live session is ended first. Every failure is also reported on
    /// the observer's status channel as `Error: …`.
    #[instrument(name = "session_start", skip_all)]
    pub async fn start(&self, config: CallConfiguration) -> Result<String, SessionError> {
        if let Err(err) = config.validate() {
            warn!(error = %err, "Rejected call configuration");
            self.shared.observer.on_status(&SessionStatus::from(&err));
            return Err(err);
        }

        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.take() {
            info!(call_id = %previous.handle.call_id, "Ending previous session before starting a new one");
            self.teardown(previous).await;
        }

        let prior = self.state();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.transcript.send_replace(Vec::new());
        self.shared.set_state(SessionState::Connecting);
        self.shared.observer.on_status(&SessionStatus::Connecting);

        match self.open(&config, generation).await {
            Ok(live) => {
                let call_id = live.handle.call_id.clone();
                info!(%call_id, "Session joined");
                *inner = Some(live);
                Ok(call_id)
            }
            Err(err) => {
                // A malformed provider answer leaves the controller as it was;
                // everything else is a failed start.
                let next = match &err {
                    SessionError::Protocol(_) => prior,
                    _ => SessionState::Failed,
                };
                self.shared.set_state(next);
                error!(error = %err, "Failed to start session");
                self.shared.observer.on_status(&SessionStatus::from(&err));
                Err(err)
            }
        }
    }

    /// Creates, registers and joins. On failure nothing is left open.
    async fn open(
        &self,
        config: &CallConfiguration,
        generation: u64,
    ) -> Result<LiveSession, SessionError> {
        let handle = self.gateway.create_session(config).await?;
        let transport = self.transports.create();

        self.register_tools(transport.as_ref())?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let span = tracing::info_span!("session_events", call_id = %handle.call_id);
        let pump = tokio::spawn(
            pump_events(events_rx, self.shared.clone(), generation).instrument(span),
        );

        if let Err(e) = transport.join(&handle.join_url, events_tx).await {
            pump.abort();
            release_tools(transport.as_ref());
            if let Err(leave_err) = transport.leave().await {
                warn!(error = %leave_err, "Failed to release transport after join failure");
            }
            return Err(e.into());
        }

        Ok(LiveSession {
            handle,
            transport,
            pump,
        })
    }

    /// All-or-nothing: the first failure unregisters what was registered.
    fn register_tools(&self, transport: &dyn VoiceTransport) -> Result<(), SessionError> {
        for name in self.tools.names() {
            let Some(tool) = self.tools.get(&name) else {
                continue;
            };
            if let Err(e) = transport.register_tool(&name, tool) {
                release_tools(transport);
                return Err(SessionError::ToolRegistration {
                    name,
                    reason: e.to_string(),
                });
            }
        }
        debug!(tools = ?transport.registered_tools(), "Registered client tools");
        Ok(())
    }

    /// Ends the current session. Calling it with no session is a no-op.
    #[instrument(name = "session_end", skip_all)]
    pub async fn end(&self) {
        let mut inner = self.inner.lock().await;
        match inner.take() {
            Some(live) => self.teardown(live).await,
            None => debug!("No session to end"),
        }
    }

    async fn teardown(&self, live: LiveSession) {
        // The pump must be retired before the state is sampled.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        live.pump.abort();
        let was_live = self.state().is_live();

        if was_live {
            self.shared.set_state(SessionState::Ending);
        }

        release_tools(live.transport.as_ref());
        if let Err(e) = live.transport.leave().await {
            let err = SessionError::Teardown(e.to_string());
            warn!(error = %err, "Transport reported an error while leaving");
            self.shared.observer.on_status(&SessionStatus::from(&err));
        }

        if was_live {
            self.shared.set_state(SessionState::Ended);
            self.shared.observer.on_status(&SessionStatus::Ended);
        }
        info!(call_id = %live.handle.call_id, "Session ended");
    }

    /// Mutes the microphone (`Role::User`) or the agent's voice (`Role::Agent`).
    pub async fn set_muted(&self, role: Role, muted: bool) -> Result<(), SessionError> {
        let transport = self.active_transport().await?;
        match role {
            Role::User => transport.set_mic_muted(muted),
            Role::Agent => transport.set_speaker_muted(muted),
        }
        info!(%role, muted, "Mute changed");
        Ok(())
    }

    /// Flips the mute flag for `role` and returns the new value.
    pub async fn toggle_mute(&self, role: Role) -> Result<bool, SessionError> {
        let transport = self.active_transport().await?;
        let muted = match role {
            Role::User => {
                let muted = !transport.is_mic_muted();
                transport.set_mic_muted(muted);
                muted
            }
            Role::Agent => {
                let muted = !transport.is_speaker_muted();
                transport.set_speaker_muted(muted);
                muted
            }
        };
        info!(%role, muted, "Mute toggled");
        Ok(muted)
    }

    /// Sends typed user text into the conversation.
    pub async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        let transport = self.active_transport().await?;
        transport.send_text(text).await?;
        Ok(())
    }

    async fn active_transport(&self) -> Result<Arc<dyn VoiceTransport>, SessionError> {
        let inner = self.inner.lock().await;
        match inner.as_ref() {
            Some(live) if self.state() == SessionState::Active => Ok(live.transport.clone()),
            _ => {
                error!(state = %self.state(), "No active session");
                Err(SessionError::NoActiveSession)
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(live) = self.inner.get_mut().take() {
            live.pump.abort();
            warn!(call_id = %live.handle.call_id, "Controller dropped with a live session");
        }
    }
}

fn release_tools(transport: &dyn VoiceTransport) {
    for name in transport.registered_tools() {
        transport.unregister_tool(&name);
    }
}

/// Forwards transport events to the observer until the channel closes,
/// the transport fails, or the task is aborted.
async fn pump_events(
    mut events: mpsc::Receiver<TransportEvent>,
    shared: Shared,
    generation: u64,
) {
    let mut reconciler = TranscriptReconciler::new();
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Status(status) => {
                shared.observer.on_status(&SessionStatus::Transport(status));
                if status.is_live()
                    && shared.transition_if_current(
                        generation,
                        &[SessionState::Connecting],
                        SessionState::Active,
                    )
                {
                    info!("Session active");
                }
            }
            TransportEvent::Transcripts(entries) => {
                if reconciler.apply_snapshot(entries) {
                    let view = reconciler.view();
                    shared.transcript.send_replace(view.clone());
                    shared.observer.on_transcript(&view);
                }
            }
            TransportEvent::Debug(message) => shared.observer.on_debug(&message),
            TransportEvent::Error(message) => {
                warn!(%message, "Transport reported an error");
                shared.observer.on_status(&SessionStatus::Error(message));
            }
            TransportEvent::Fatal(message) => {
                error!(%message, "Transport failed");
                shared.transition_if_current(
                    generation,
                    &[SessionState::Connecting, SessionState::Active],
                    SessionState::Failed,
                );
                shared
                    .observer
                    .on_status(&SessionStatus::from(&SessionError::Transport(message)));
                break;
            }
            TransportEvent::Closed => {
                info!("Remote side closed the session");
                if shared.transition_if_current(
                    generation,
                    &[SessionState::Connecting, SessionState::Active],
                    SessionState::Ended,
                ) {
                    shared.observer.on_status(&SessionStatus::Ended);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::events::{ChannelObserver, SessionEvent};
    use crate::gateway::MockSessionGateway;
    use crate::tools::{ClientTool, FnTool};
    use crate::transport::TransportStatus;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeTransport {
        fail_tool: Option<String>,
        fail_join: bool,
        fail_leave: bool,
        tools: StdMutex<Vec<String>>,
        events: StdMutex<Option<mpsc::Sender<TransportEvent>>>,
        leaves: AtomicUsize,
        mic: AtomicBool,
        speaker: AtomicBool,
        sent: StdMutex<Vec<String>>,
    }

    impl FakeTransport {
        async fn emit(&self, event: TransportEvent) {
            let sender = self.events.lock().unwrap().clone().unwrap();
            sender.send(event).await.unwrap();
        }
    }

    #[async_trait]
    impl VoiceTransport for FakeTransport {
        fn register_tool(
            &self,
            name: &str,
            _tool: Arc<dyn ClientTool>,
        ) -> Result<(), TransportError> {
            if self.fail_tool.as_deref() == Some(name) {
                return Err(TransportError::Registration("rejected".into()));
            }
            self.tools.lock().unwrap().push(name.to_string());
            Ok(())
        }

        fn unregister_tool(&self, name: &str) {
            self.tools.lock().unwrap().retain(|n| n != name);
        }

        fn registered_tools(&self) -> Vec<String> {
            self.tools.lock().unwrap().clone()
        }

        async fn join(
            &self,
            _join_url: &str,
            events: mpsc::Sender<TransportEvent>,
        ) -> Result<(), TransportError> {
            if self.fail_join {
                return Err(TransportError::Connect("refused".into()));
            }
            events
                .send(TransportEvent::Status(TransportStatus::Idle))
                .await
                .unwrap();
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        async fn leave(&self) -> Result<(), TransportError> {
            self.leaves.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().take();
            if self.fail_leave {
                return Err(TransportError::Send("socket already gone".into()));
            }
            Ok(())
        }

        async fn send_text(&self, text: &str) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn set_mic_muted(&self, muted: bool) {
            self.mic.store(muted, Ordering::SeqCst);
        }

        fn set_speaker_muted(&self, muted: bool) {
            self.speaker.store(muted, Ordering::SeqCst);
        }

        fn is_mic_muted(&self) -> bool {
            self.mic.load(Ordering::SeqCst)
        }

        fn is_speaker_muted(&self) -> bool {
            self.speaker.load(Ordering::SeqCst)
        }
    }

    /// Hands out transports built by `make`, remembering each one.
    struct FakeFactory {
        make: fn() -> FakeTransport,
        created: StdMutex<Vec<Arc<FakeTransport>>>,
    }

    impl FakeFactory {
        fn new(make: fn() -> FakeTransport) -> Arc<Self> {
            Arc::new(Self {
                make,
                created: StdMutex::new(Vec::new()),
            })
        }

        fn transport(&self, index: usize) -> Arc<FakeTransport> {
            self.created.lock().unwrap()[index].clone()
        }
    }

    impl TransportFactory for FakeFactory {
        fn create(&self) -> Arc<dyn VoiceTransport> {
            let transport = Arc::new((self.make)());
            self.created.lock().unwrap().push(transport.clone());
            transport
        }
    }

    fn gateway_returning(result: fn() -> Result<SessionHandle, SessionError>) -> MockSessionGateway {
        let mut gateway = MockSessionGateway::new();
        gateway.expect_create_session().returning(move |_| result());
        gateway
    }

    fn handle() -> Result<SessionHandle, SessionError> {
        Ok(SessionHandle {
            join_url: "wss://voice.example/join".into(),
            call_id: "call-1".into(),
        })
    }

    fn registry_with(names: &[&str]) -> ToolRegistry {
        let registry = ToolRegistry::new();
        for name in names {
            let tool: Arc<dyn ClientTool> = Arc::new(FnTool::new(|_| Ok("Done.".to_string())));
            registry.register(*name, tool);
        }
        registry
    }

    fn controller(
        gateway: MockSessionGateway,
        factory: Arc<FakeFactory>,
        tools: ToolRegistry,
    ) -> (SessionController, mpsc::UnboundedReceiver<SessionEvent>) {
        let (observer, rx) = ChannelObserver::channel();
        (
            SessionController::new(Arc::new(gateway), factory, tools, Arc::new(observer)),
            rx,
        )
    }

    fn config() -> CallConfiguration {
        CallConfiguration::new("Interview candidate on Python")
    }

    async fn wait_for_state(controller: &SessionController, wanted: SessionState) {
        let mut rx = controller.subscribe_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == wanted))
            .await
            .expect("timed out waiting for state")
            .unwrap();
    }

    fn statuses(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Status(status) = event {
                out.push(status.to_string());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_start_reaches_active_after_first_live_status() {
        let factory = FakeFactory::new(FakeTransport::default);
        let (controller, _rx) = controller(
            gateway_returning(handle),
            factory.clone(),
            registry_with(&["updateOrder", "highlightProduct"]),
        );

        let call_id = controller.start(config()).await.unwrap();
        assert_eq!(call_id, "call-1");
        wait_for_state(&controller, SessionState::Active).await;

        assert_eq!(
            factory.transport(0).registered_tools(),
            vec!["highlightProduct".to_string(), "updateOrder".to_string()]
        );
        assert_eq!(controller.call_id().await.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn test_empty_prompt_fails_without_network_or_state_change() {
        let mut gateway = MockSessionGateway::new();
        gateway.expect_create_session().never();
        let factory = FakeFactory::new(FakeTransport::default);
        let (controller, mut rx) = controller(gateway, factory, ToolRegistry::new());

        let err = controller
            .start(CallConfiguration::new("   "))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Validation(_)));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(statuses(&mut rx), vec!["Error: System prompt is required"]);
    }

    #[tokio::test]
    async fn test_protocol_error_leaves_state_unchanged() {
        let factory = FakeFactory::new(FakeTransport::default);
        let (controller, mut rx) = controller(
            gateway_returning(|| Err(SessionError::Protocol("missing join URL".into()))),
            factory.clone(),
            ToolRegistry::new(),
        );

        let err = controller.start(config()).await.unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(factory.created.lock().unwrap().is_empty());
        assert_eq!(
            statuses(&mut rx),
            vec!["connecting", "Error: Invalid response: missing join URL"]
        );
    }

    #[tokio::test]
    async fn test_remote_error_moves_to_failed() {
        let factory = FakeFactory::new(FakeTransport::default);
        let (controller, mut rx) = controller(
            gateway_returning(|| {
                Err(SessionError::Remote {
                    status: 401,
                    message: "Invalid API key".into(),
                })
            }),
            factory,
            ToolRegistry::new(),
        );

        assert!(controller.start(config()).await.is_err());
        assert_eq!(controller.state(), SessionState::Failed);
        assert_eq!(
            statuses(&mut rx).last().map(String::as_str),
            Some("Error: API Error (401): Invalid API key")
        );
    }

    #[tokio::test]
    async fn test_tool_registration_failure_leaves_no_tools_and_never_joins() {
        let factory = FakeFactory::new(|| FakeTransport {
            fail_tool: Some("highlightProduct".into()),
            ..Default::default()
        });
        let (controller, _rx) = controller(
            gateway_returning(handle),
            factory.clone(),
            registry_with(&["captureInterviewData", "highlightProduct", "updateOrder"]),
        );

        let err = controller.start(config()).await.unwrap_err();
        assert!(
            matches!(err, SessionError::ToolRegistration { ref name, .. } if name == "highlightProduct")
        );

        let transport = factory.transport(0);
        assert!(transport.registered_tools().is_empty());
        assert!(transport.events.lock().unwrap().is_none());
        assert_eq!(controller.state(), SessionState::Failed);
        assert!(controller.call_id().await.is_none());
    }

    #[tokio::test]
    async fn test_join_failure_releases_transport() {
        let factory = FakeFactory::new(|| FakeTransport {
            fail_join: true,
            ..Default::default()
        });
        let (controller, _rx) = controller(
            gateway_returning(handle),
            factory.clone(),
            registry_with(&["updateOrder"]),
        );

        let err = controller.start(config()).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        let transport = factory.transport(0);
        assert_eq!(transport.leaves.load(Ordering::SeqCst), 1);
        assert!(transport.registered_tools().is_empty());
        assert_eq!(controller.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let factory = FakeFactory::new(FakeTransport::default);
        let (controller, mut rx) =
            controller(gateway_returning(handle), factory.clone(), ToolRegistry::new());

        controller.end().await;
        assert_eq!(controller.state(), SessionState::Idle);

        controller.start(config()).await.unwrap();
        wait_for_state(&controller, SessionState::Active).await;
        controller.end().await;
        controller.end().await;

        assert_eq!(controller.state(), SessionState::Ended);
        assert_eq!(factory.transport(0).leaves.load(Ordering::SeqCst), 1);
        let ended = statuses(&mut rx).iter().filter(|s| *s == "ended").count();
        assert_eq!(ended, 1);
    }

    #[tokio::test]
    async fn test_teardown_error_is_reported_but_session_still_ends() {
        let factory = FakeFactory::new(|| FakeTransport {
            fail_leave: true,
            ..Default::default()
        });
        let (controller, mut rx) =
            controller(gateway_returning(handle), factory, ToolRegistry::new());

        controller.start(config()).await.unwrap();
        wait_for_state(&controller, SessionState::Active).await;
        statuses(&mut rx);

        controller.end().await;
        assert_eq!(controller.state(), SessionState::Ended);
        assert_eq!(
            statuses(&mut rx),
            vec![
                "Error: Teardown error: Failed to send message: socket already gone",
                "ended"
            ]
        );
    }

    #[tokio::test]
    async fn test_restart_ends_previous_session_first() {
        let factory = FakeFactory::new(FakeTransport::default);
        let (controller, mut rx) =
            controller(gateway_returning(handle), factory.clone(), ToolRegistry::new());

        controller.start(config()).await.unwrap();
        wait_for_state(&controller, SessionState::Active).await;
        controller.start(config()).await.unwrap();

        let first = factory.transport(0);
        assert_eq!(first.leaves.load(Ordering::SeqCst), 1);
        wait_for_state(&controller, SessionState::Active).await;
        assert_eq!(factory.transport(1).leaves.load(Ordering::SeqCst), 0);

        let seen = statuses(&mut rx);
        let ended = seen.iter().position(|s| s == "ended").unwrap();
        let second_connect = seen.iter().rposition(|s| s == "connecting").unwrap();
        assert!(ended < second_connect);
    }

    #[tokio::test]
    async fn test_mid_call_error_is_relayed_without_state_change() {
        let factory = FakeFactory::new(FakeTransport::default);
        let (controller, mut rx) =
            controller(gateway_returning(handle), factory.clone(), ToolRegistry::new());

        controller.start(config()).await.unwrap();
        wait_for_state(&controller, SessionState::Active).await;

        let transport = factory.transport(0);
        transport
            .emit(TransportEvent::Error("microphone glitch".into()))
            .await;
        transport
            .emit(TransportEvent::Status(TransportStatus::Speaking))
            .await;

        let mut state = controller.subscribe_state();
        let mut seen = Vec::new();
        while seen.last().map(String::as_str) != Some("speaking") {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(SessionEvent::Status(status))) => seen.push(status.to_string()),
                Ok(Some(_)) => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(seen.contains(&"Error: microphone glitch".to_string()));
        assert_eq!(*state.borrow_and_update(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_fatal_transport_error_fails_session() {
        let factory = FakeFactory::new(FakeTransport::default);
        let (controller, _rx) =
            controller(gateway_returning(handle), factory.clone(), ToolRegistry::new());

        controller.start(config()).await.unwrap();
        wait_for_state(&controller, SessionState::Active).await;
        factory
            .transport(0)
            .emit(TransportEvent::Fatal("socket reset".into()))
            .await;
        wait_for_state(&controller, SessionState::Failed).await;

        // The dead transport is still released exactly once.
        controller.end().await;
        assert_eq!(factory.transport(0).leaves.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), SessionState::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fatal_racing_end_never_reports_both_failed_and_ended() {
        for _ in 0..20 {
            let factory = FakeFactory::new(FakeTransport::default);
            let (controller, mut rx) =
                controller(gateway_returning(handle), factory.clone(), ToolRegistry::new());

            controller.start(config()).await.unwrap();
            wait_for_state(&controller, SessionState::Active).await;
            factory
                .transport(0)
                .emit(TransportEvent::Fatal("socket reset".into()))
                .await;
            controller.end().await;

            let ended = statuses(&mut rx).iter().any(|s| s == "ended");
            match controller.state() {
                SessionState::Failed => assert!(!ended),
                SessionState::Ended => assert!(ended),
                other => panic!("unexpected final state {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_transcript_snapshots_are_scrubbed_and_never_shrink() {
        let factory = FakeFactory::new(FakeTransport::default);
        let (controller, _rx) =
            controller(gateway_returning(handle), factory.clone(), ToolRegistry::new());

        controller.start(config()).await.unwrap();
        wait_for_state(&controller, SessionState::Active).await;
        let mut transcript = controller.subscribe_transcript();

        let transport = factory.transport(0);
        transport
            .emit(TransportEvent::Transcripts(vec![
                TranscriptEntry::new(Role::Agent, "Welcome!", 0),
                TranscriptEntry::new(
                    Role::Agent,
                    r#"Sure. {"type":"function","function":{"name":"updateOrder"}}"#,
                    1,
                ),
            ]))
            .await;
        transport
            .emit(TransportEvent::Transcripts(vec![TranscriptEntry::new(
                Role::Agent,
                "Welcome!",
                0,
            )]))
            .await;

        tokio::time::timeout(Duration::from_secs(5), transcript.wait_for(|t| t.len() == 2))
            .await
            .unwrap()
            .unwrap();
        // Let the pump drain the shorter snapshot.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let view = controller.transcript();
        assert_eq!(view.len(), 2);
        assert_eq!(view[1].text, "Sure.");
    }

    #[tokio::test]
    async fn test_mute_requires_active_session() {
        let factory = FakeFactory::new(FakeTransport::default);
        let (controller, _rx) =
            controller(gateway_returning(handle), factory.clone(), ToolRegistry::new());

        assert!(matches!(
            controller.toggle_mute(Role::User).await,
            Err(SessionError::NoActiveSession)
        ));

        controller.start(config()).await.unwrap();
        wait_for_state(&controller, SessionState::Active).await;

        assert!(controller.toggle_mute(Role::User).await.unwrap());
        assert!(!controller.toggle_mute(Role::User).await.unwrap());
        controller.set_muted(Role::Agent, true).await.unwrap();
        let transport = factory.transport(0);
        assert!(transport.is_speaker_muted());
        assert!(!transport.is_mic_muted());
        assert_eq!(controller.state(), SessionState::Active);

        controller.send_text("one more thing").await.unwrap();
        assert_eq!(*transport.sent.lock().unwrap(), vec!["one more thing".to_string()]);

        controller.end().await;
        assert!(matches!(
            controller.set_muted(Role::User, true).await,
            Err(SessionError::NoActiveSession)
        ));
    }
}

//! [`VoiceTransport`] over the provider's WebSocket data-message protocol.
//!
//! Only data messages are handled. Binary frames carry audio and are
//! dropped; capture and playback are left to the host.

use super::{TransportEvent, TransportFactory, TransportStatus, VoiceTransport};
use crate::error::{SessionError, TransportError};
use crate::tools::{ClientTool, ToolRegistry};
use crate::transcript::{Medium, Role, TranscriptEntry};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, info, warn};

/// Messages received from the provider.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    State {
        state: String,
    },
    Transcript {
        role: String,
        #[serde(default)]
        medium: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        delta: Option<String>,
        #[serde(rename = "final", default)]
        is_final: bool,
        ordinal: u64,
    },
    #[serde(rename_all = "camelCase")]
    ClientToolInvocation {
        tool_name: String,
        invocation_id: String,
        #[serde(default)]
        parameters: Value,
    },
    Debug {
        #[serde(default)]
        message: Value,
    },
    #[serde(rename_all = "camelCase")]
    CallStarted {
        #[serde(default)]
        call_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Messages sent to the provider.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    ClientToolResult {
        invocation_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_type: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    InputTextMessage {
        text: String,
    },
}

impl ClientMessage {
    fn to_frame(&self) -> Result<WsMessage, TransportError> {
        let text = serde_json::to_string(self).map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(WsMessage::Text(text.into()))
    }
}

/// Builds the full transcript from incremental `transcript` messages.
#[derive(Debug, Default)]
struct TranscriptAssembler {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptAssembler {
    /// Applies one update: `text` replaces, `delta` appends.
    fn apply(
        &mut self,
        role: Role,
        medium: Medium,
        text: Option<String>,
        delta: Option<String>,
        is_final: bool,
        ordinal: u64,
    ) {
        match self.entries.iter_mut().find(|e| e.position == ordinal) {
            Some(entry) => {
                if let Some(text) = text {
                    entry.text = text;
                } else if let Some(delta) = delta {
                    entry.text.push_str(&delta);
                }
                entry.is_final = is_final;
                entry.medium = medium;
            }
            None => {
                self.entries.push(TranscriptEntry {
                    role,
                    text: text.or(delta).unwrap_or_default(),
                    medium,
                    position: ordinal,
                    is_final,
                });
                self.entries.sort_by_key(|e| e.position);
            }
        }
    }

    fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.clone()
    }
}

#[derive(Default)]
struct Connection {
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    tasks: Vec<JoinHandle<()>>,
}

/// One WebSocket data channel, good for a single session.
pub struct WebSocketTransport {
    tools: ToolRegistry,
    connection: Mutex<Connection>,
    mic_muted: AtomicBool,
    speaker_muted: AtomicBool,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            tools: ToolRegistry::new(),
            connection: Mutex::new(Connection::default()),
            mic_muted: AtomicBool::new(false),
            speaker_muted: AtomicBool::new(false),
        }
    }

    fn outbound(&self) -> Result<mpsc::UnboundedSender<WsMessage>, TransportError> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outbound
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        let connection = self
            .connection
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for task in connection.tasks.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl VoiceTransport for WebSocketTransport {
    fn register_tool(&self, name: &str, tool: Arc<dyn ClientTool>) -> Result<(), TransportError> {
        if self.tools.contains(name) {
            return Err(TransportError::DuplicateTool(name.to_string()));
        }
        self.tools.register(name, tool);
        Ok(())
    }

    fn unregister_tool(&self, name: &str) {
        self.tools.unregister(name);
    }

    fn registered_tools(&self) -> Vec<String> {
        self.tools.names()
    }

    async fn join(
        &self,
        join_url: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        if self.outbound().is_ok() {
            return Err(TransportError::Connect("already joined".to_string()));
        }

        let (stream, _) = connect_async(join_url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();
        info!("Joined voice session data channel.");
        // Status events are best-effort; a dropped receiver just means nobody listens.
        let _ = events.send(TransportEvent::Status(TransportStatus::Connecting)).await;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();

        let writer_events = events.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = sink.send(frame).await {
                    let _ = writer_events
                        .send(TransportEvent::Fatal(format!("send failed: {e}")))
                        .await;
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let tools = self.tools.clone();
        let reply = out_tx.clone();
        let reader = tokio::spawn(async move {
            let mut transcript = TranscriptAssembler::default();
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        handle_message(text.as_str(), &mut transcript, &tools, &reply, &events)
                            .await;
                    }
                    Ok(WsMessage::Binary(_)) => {}
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send(TransportEvent::Fatal(e.to_string())).await;
                        return;
                    }
                }
            }
            let _ = events
                .send(TransportEvent::Status(TransportStatus::Disconnected))
                .await;
            let _ = events.send(TransportEvent::Closed).await;
        });

        let mut connection = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        connection.outbound = Some(out_tx);
        connection.tasks = vec![writer, reader];
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        let (outbound, tasks) = {
            let mut connection = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
            (connection.outbound.take(), std::mem::take(&mut connection.tasks))
        };
        let Some(outbound) = outbound else {
            return Ok(());
        };

        let sent = outbound.send(WsMessage::Close(None));
        drop(outbound);
        let mut tasks = tasks.into_iter();
        // Give the writer the chance to flush the close frame before the reader goes.
        if let Some(writer) = tasks.next() {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(2), writer).await;
        }
        for task in tasks {
            task.abort();
        }
        self.tools.clear();
        info!("Left voice session data channel.");
        sent.map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        let frame = ClientMessage::InputTextMessage {
            text: text.to_string(),
        }
        .to_frame()?;
        self.outbound()?
            .send(frame)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn set_mic_muted(&self, muted: bool) {
        self.mic_muted.store(muted, Ordering::SeqCst);
    }

    fn set_speaker_muted(&self, muted: bool) {
        self.speaker_muted.store(muted, Ordering::SeqCst);
    }

    fn is_mic_muted(&self) -> bool {
        self.mic_muted.load(Ordering::SeqCst)
    }

    fn is_speaker_muted(&self) -> bool {
        self.speaker_muted.load(Ordering::SeqCst)
    }
}

async fn handle_message(
    raw: &str,
    transcript: &mut TranscriptAssembler,
    tools: &ToolRegistry,
    reply: &mpsc::UnboundedSender<WsMessage>,
    events: &mpsc::Sender<TransportEvent>,
) {
    let message = match serde_json::from_str::<ServerMessage>(raw) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Unreadable data message");
            let _ = events
                .send(TransportEvent::Error(format!("unreadable data message: {e}")))
                .await;
            return;
        }
    };

    match message {
        ServerMessage::State { state } => match TransportStatus::from_wire(&state) {
            Some(status) => {
                let _ = events.send(TransportEvent::Status(status)).await;
            }
            None => debug!(%state, "Ignoring unknown state"),
        },
        ServerMessage::Transcript {
            role,
            medium,
            text,
            delta,
            is_final,
            ordinal,
        } => {
            let Some(role) = Role::from_wire(&role) else {
                debug!(%role, "Ignoring transcript for non-speaker role");
                return;
            };
            let medium = Medium::from_wire(medium.as_deref());
            transcript.apply(role, medium, text, delta, is_final, ordinal);
            let _ = events
                .send(TransportEvent::Transcripts(transcript.snapshot()))
                .await;
        }
        ServerMessage::ClientToolInvocation {
            tool_name,
            invocation_id,
            parameters,
        } => {
            let result = match tools.invoke(&tool_name, parameters).await {
                Ok(ack) => ClientMessage::ClientToolResult {
                    invocation_id,
                    result: Some(ack),
                    error_type: None,
                    error_message: None,
                },
                Err(err) => {
                    warn!(tool = %tool_name, error = %err, "Client tool invocation failed");
                    let error_type = match &err {
                        SessionError::UnknownTool(_) => "undefined",
                        _ => "implementation-error",
                    };
                    let _ = events.send(TransportEvent::Error(err.to_string())).await;
                    ClientMessage::ClientToolResult {
                        invocation_id,
                        result: None,
                        error_type: Some(error_type),
                        error_message: Some(err.to_string()),
                    }
                }
            };
            match result.to_frame() {
                Ok(frame) => {
                    if reply.send(frame).is_err() {
                        warn!("Tool result dropped: channel closed");
                    }
                }
                Err(e) => warn!(error = %e, "Could not encode tool result"),
            }
        }
        ServerMessage::Debug { message } => {
            let _ = events.send(TransportEvent::Debug(message)).await;
        }
        ServerMessage::CallStarted { call_id } => {
            debug!(call_id = ?call_id, "Call started");
        }
        ServerMessage::Unknown => debug!("Ignoring unknown data message"),
    }
}

/// Hands out a fresh [`WebSocketTransport`] per session.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransportFactory;

impl TransportFactory for WebSocketTransportFactory {
    fn create(&self) -> Arc<dyn VoiceTransport> {
        Arc::new(WebSocketTransport::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FnTool;
    use axum::{
        Router,
        extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        response::IntoResponse,
        routing::get,
    };
    use serde_json::json;
    use std::time::Duration;

    /// Serves one scripted data-channel session and returns what the client sent.
    async fn scripted_server(script: Vec<Value>) -> (String, mpsc::UnboundedReceiver<Value>) {
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let router = Router::new().route(
            "/join",
            get(move |ws: WebSocketUpgrade| {
                let script = script.clone();
                let seen_tx = seen_tx.clone();
                async move {
                    ws.on_upgrade(move |socket| run_script(socket, script, seen_tx))
                        .into_response()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("ws://{}/join", addr), seen_rx)
    }

    async fn run_script(
        mut socket: WebSocket,
        script: Vec<Value>,
        seen: mpsc::UnboundedSender<Value>,
    ) {
        for message in script {
            socket
                .send(AxumMessage::Text(message.to_string().into()))
                .await
                .unwrap();
        }
        while let Some(Ok(frame)) = socket.recv().await {
            match frame {
                AxumMessage::Text(text) => {
                    let _ = seen.send(serde_json::from_str(text.as_str()).unwrap());
                }
                AxumMessage::Close(_) => break,
                _ => {}
            }
        }
    }

    async fn next_transcript(rx: &mut mpsc::Receiver<TransportEvent>) -> Vec<TranscriptEntry> {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(TransportEvent::Transcripts(entries))) => return entries,
                Ok(Some(_)) => continue,
                other => panic!("no transcript event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_assembler_appends_deltas_and_replaces_text() {
        let mut assembler = TranscriptAssembler::default();
        assembler.apply(Role::Agent, Medium::Voice, None, Some("Hel".into()), false, 0);
        assembler.apply(Role::Agent, Medium::Voice, None, Some("lo".into()), false, 0);
        assert_eq!(assembler.snapshot()[0].text, "Hello");

        assembler.apply(Role::Agent, Medium::Voice, Some("Hello there.".into()), None, true, 0);
        assembler.apply(Role::User, Medium::Text, Some("Hi".into()), None, true, 1);
        let snapshot = assembler.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].text, "Hello there.");
        assert!(snapshot[0].is_final);
        assert_eq!(snapshot[1].medium, Medium::Text);
    }

    #[tokio::test]
    async fn test_join_relays_state_and_transcripts() {
        let (url, _seen) = scripted_server(vec![
            json!({"type": "state", "state": "listening"}),
            json!({"type": "transcript", "role": "agent", "medium": "voice", "text": "Welcome", "final": false, "ordinal": 0}),
            json!({"type": "transcript", "role": "agent", "medium": "voice", "delta": "!", "final": true, "ordinal": 0}),
        ])
        .await;

        let transport = WebSocketTransport::new();
        let (tx, mut rx) = mpsc::channel(32);
        transport.join(&url, tx).await.unwrap();

        let mut saw_listening = false;
        while !saw_listening {
            if let Some(TransportEvent::Status(TransportStatus::Listening)) =
                tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap()
            {
                saw_listening = true;
            }
        }
        assert_eq!(next_transcript(&mut rx).await[0].text, "Welcome");
        let last = next_transcript(&mut rx).await;
        assert_eq!(last[0].text, "Welcome!");
        assert!(last[0].is_final);

        transport.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_tool_invocation_is_answered() {
        let (url, mut seen) = scripted_server(vec![
            json!({"type": "client_tool_invocation", "toolName": "highlightProduct", "invocationId": "inv-1", "parameters": {"productId": "burger"}}),
            json!({"type": "client_tool_invocation", "toolName": "teleport", "invocationId": "inv-2", "parameters": {}}),
        ])
        .await;

        let transport = WebSocketTransport::new();
        transport
            .register_tool(
                "highlightProduct",
                Arc::new(FnTool::new(|_| Ok("Highlighted the product.".to_string()))),
            )
            .unwrap();
        let (tx, _rx) = mpsc::channel(32);
        transport.join(&url, tx).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first["type"], "client_tool_result");
        assert_eq!(first["invocationId"], "inv-1");
        assert_eq!(first["result"], "Highlighted the product.");

        let second = tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second["invocationId"], "inv-2");
        assert_eq!(second["errorType"], "undefined");
        assert!(second.get("result").is_none());

        transport.send_text("hello").await.unwrap();
        let typed = tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(typed, json!({"type": "input_text_message", "text": "hello"}));

        transport.leave().await.unwrap();
        assert!(transport.registered_tools().is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let transport = WebSocketTransport::new();
        let tool: Arc<dyn ClientTool> = Arc::new(FnTool::new(|_| Ok("ok".to_string())));
        transport.register_tool("a", tool.clone()).unwrap();
        assert!(matches!(
            transport.register_tool("a", tool),
            Err(TransportError::DuplicateTool(name)) if name == "a"
        ));
    }

    #[tokio::test]
    async fn test_send_before_join_fails_and_leave_is_noop() {
        let transport = WebSocketTransport::new();
        assert!(matches!(
            transport.send_text("hi").await,
            Err(TransportError::NotConnected)
        ));
        transport.leave().await.unwrap();
        transport.leave().await.unwrap();

        transport.set_mic_muted(true);
        assert!(transport.is_mic_muted());
        assert!(!transport.is_speaker_muted());
    }
}

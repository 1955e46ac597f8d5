//! WebSocket adapters.
//!
//! `/ws/chat` relays a streamed answer as JSON signals:
//! `{"type":"start"}`, `{"type":"token","text"}`*, then one
//! `{"type":"final","text","affect"}` or `{"type":"error","message"}`.
//!
//! `/ws/tts` answers each `{text, voice?}` request with the synthesized clip
//! as binary frames followed by `{"event":"end"}`, or a single `{"error"}`.
//!
//! Both sockets handle one request at a time and stay open after request
//! level errors. A failed send means the client is gone; the in-flight work
//! is dropped and the socket loop ends.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use tutor_chat::{ChatError, ChatSignal, DialogueController};
use tutor_speech::{AudioArtifact, SpeechSynthesizer};

use crate::handlers::DEFAULT_SESSION_ID;
use crate::state::AppState;

/// Message sent when no generation provider is configured.
pub const NOT_CONFIGURED: &str = "RAG not configured.";

/// The peer stopped accepting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Outbound half of a socket.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_json(&mut self, value: &Value) -> Result<(), SinkClosed>;
    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), SinkClosed>;
}

#[async_trait]
impl FrameSink for WebSocket {
    async fn send_json(&mut self, value: &Value) -> Result<(), SinkClosed> {
        self.send(Message::Text(value.to_string().into()))
            .await
            .map_err(|_| SinkClosed)
    }

    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), SinkClosed> {
        self.send(Message::Binary(bytes.into()))
            .await
            .map_err(|_| SinkClosed)
    }
}

// =============================================================================
// Upgrade handlers
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatSocketParams {
    pub session_id: Option<String>,
}

/// GET /ws/chat?session_id=...
pub async fn ws_chat(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ChatSocketParams>,
) -> Response {
    let session_id = params
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
    let controller = Arc::clone(&state.controller);
    ws.on_upgrade(move |socket| chat_socket(socket, controller, session_id))
}

/// GET /ws/tts
pub async fn ws_tts(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let synthesizer = Arc::clone(&state.synthesizer);
    let frame_size = state.frame_size;
    ws.on_upgrade(move |socket| tts_socket(socket, synthesizer, frame_size))
}

async fn chat_socket(mut socket: WebSocket, controller: Arc<DialogueController>, session_id: String) {
    info!(session_id = %session_id, "Chat socket connected");
    while let Some(text) = next_text(&mut socket).await {
        if relay_chat(&mut socket, &controller, &session_id, &text)
            .await
            .is_err()
        {
            break;
        }
    }
    info!(session_id = %session_id, "Chat socket disconnected");
}

async fn tts_socket(mut socket: WebSocket, synthesizer: Arc<dyn SpeechSynthesizer>, frame_size: usize) {
    debug!("TTS socket connected");
    while let Some(text) = next_text(&mut socket).await {
        if serve_tts(&mut socket, synthesizer.as_ref(), frame_size, &text)
            .await
            .is_err()
        {
            break;
        }
    }
    info!("TTS socket disconnected");
}

/// Next text message, skipping binary and control frames. `None` on close.
async fn next_text(socket: &mut WebSocket) -> Option<String> {
    loop {
        match socket.recv().await? {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "Socket receive failed");
                return None;
            }
        }
    }
}

// =============================================================================
// Chat relay
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChatSocketRequest {
    #[serde(default)]
    query: String,
}

fn chat_error(message: &str) -> Value {
    json!({ "type": "error", "message": message })
}

/// Wire form of a chat signal.
pub fn signal_frame(signal: &ChatSignal) -> Value {
    match signal {
        ChatSignal::Start => json!({ "type": "start" }),
        ChatSignal::Token(text) => json!({ "type": "token", "text": text }),
        ChatSignal::Final { text, affect } => {
            json!({ "type": "final", "text": text, "affect": affect })
        }
        ChatSignal::Error(message) => chat_error(message),
    }
}

/// Answer one raw chat request on `sink`.
///
/// Request level problems become a single error frame and return `Ok`.
/// `Err` means the peer is gone; returning drops the signal receiver, which
/// stops generation without touching the session.
pub async fn relay_chat<S: FrameSink + ?Sized>(
    sink: &mut S,
    controller: &DialogueController,
    session_id: &str,
    raw: &str,
) -> Result<(), SinkClosed> {
    let request: ChatSocketRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed chat request");
            return sink.send_json(&chat_error("Invalid JSON payload")).await;
        }
    };

    if !controller.is_available() {
        return sink.send_json(&chat_error(NOT_CONFIGURED)).await;
    }

    let mut signals = match controller.stream_chat(session_id, &request.query) {
        Ok(rx) => rx,
        Err(ChatError::EmptyQuery) => return sink.send_json(&chat_error("Empty query")).await,
        Err(e) => return sink.send_json(&chat_error(&e.to_string())).await,
    };

    let mut terminated = false;
    while let Some(signal) = signals.recv().await {
        terminated = signal.is_terminal();
        if let Err(closed) = sink.send_json(&signal_frame(&signal)).await {
            info!(session_id = %session_id, "Client disconnected mid-stream");
            return Err(closed);
        }
        if terminated {
            break;
        }
    }

    if !terminated {
        warn!(session_id = %session_id, "Answer stream ended without a final signal");
        sink.send_json(&chat_error("Stream ended unexpectedly")).await?;
    }
    Ok(())
}

// =============================================================================
// Audio relay
// =============================================================================

#[derive(Debug, Deserialize)]
struct TtsSocketRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    voice: Option<String>,
}

fn tts_error(message: &str) -> Value {
    json!({ "error": message })
}

/// Answer one raw synthesis request on `sink`.
pub async fn serve_tts<S: FrameSink + ?Sized>(
    sink: &mut S,
    synthesizer: &dyn SpeechSynthesizer,
    frame_size: usize,
    raw: &str,
) -> Result<(), SinkClosed> {
    let request: TtsSocketRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed tts request");
            return sink.send_json(&tts_error("Invalid JSON payload")).await;
        }
    };

    if request.text.trim().is_empty() {
        return sink.send_json(&tts_error("Empty text")).await;
    }

    let artifact = match synthesizer
        .synthesize(&request.text, request.voice.as_deref())
        .await
    {
        Ok(artifact) => artifact,
        Err(e) => {
            warn!(backend = synthesizer.name(), error = %e, "Synthesis failed");
            return sink
                .send_json(&tts_error(&format!("TTS failed: {}", e)))
                .await;
        }
    };

    stream_artifact(sink, artifact, frame_size).await
}

/// Send `artifact` in `frame_size` binary frames, then `{"event":"end"}`.
///
/// Takes ownership so the file is deleted on every exit path.
pub async fn stream_artifact<S: FrameSink + ?Sized>(
    sink: &mut S,
    artifact: AudioArtifact,
    frame_size: usize,
) -> Result<(), SinkClosed> {
    let mut frames = match artifact.frames(frame_size).await {
        Ok(frames) => frames,
        Err(e) => return sink.send_json(&tts_error(&format!("TTS failed: {}", e))).await,
    };

    let mut sent = 0usize;
    loop {
        match frames.next_frame().await {
            Ok(Some(frame)) => {
                sink.send_binary(frame).await?;
                sent += 1;
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, frames = sent, "Audio read failed mid-stream");
                return sink.send_json(&tts_error(&format!("TTS failed: {}", e))).await;
            }
        }
    }

    debug!(frames = sent, "Audio streamed");
    sink.send_json(&json!({ "event": "end" })).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tutor_chat::{
        AffectFallback, AffectTagger, AnswerEngine, EngineSettings, GenerationProvider,
        ScriptedProvider, SessionPolicy, SessionStore,
    };
    use tutor_core::types::Affect;
    use tutor_speech::StaticSynthesizer;

    /// What a sink saw, in order.
    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Json(Value),
        Binary(Vec<u8>),
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<Sent>,
        /// Fail every send once this many messages have gone out.
        close_after: Option<usize>,
    }

    impl RecordingSink {
        fn closing_after(n: usize) -> Self {
            Self {
                sent: Vec::new(),
                close_after: Some(n),
            }
        }

        fn push(&mut self, item: Sent) -> Result<(), SinkClosed> {
            if self.close_after.is_some_and(|n| self.sent.len() >= n) {
                return Err(SinkClosed);
            }
            self.sent.push(item);
            Ok(())
        }

        fn json(&self) -> Vec<Value> {
            self.sent
                .iter()
                .filter_map(|s| match s {
                    Sent::Json(v) => Some(v.clone()),
                    Sent::Binary(_) => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_json(&mut self, value: &Value) -> Result<(), SinkClosed> {
            self.push(Sent::Json(value.clone()))
        }

        async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), SinkClosed> {
            self.push(Sent::Binary(bytes))
        }
    }

    fn controller(provider: ScriptedProvider) -> (DialogueController, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let engine = AnswerEngine::new(
            Arc::clone(&provider) as Arc<dyn GenerationProvider>,
            None,
            EngineSettings::default(),
        );
        let controller = DialogueController::new(
            Some(engine),
            Arc::new(SessionStore::new(SessionPolicy::default())),
            AffectTagger::new(AffectFallback::Fixed(Affect::Neutral)),
        );
        (controller, provider)
    }

    fn unavailable() -> DialogueController {
        DialogueController::new(
            None,
            Arc::new(SessionStore::default()),
            AffectTagger::new(AffectFallback::Fixed(Affect::Neutral)),
        )
    }

    #[tokio::test]
    async fn test_chat_relay_orders_signals() {
        let (controller, _) = controller(ScriptedProvider::answering("First, we explain"));
        let mut sink = RecordingSink::default();

        relay_chat(&mut sink, &controller, "s1", r#"{"query":"what is recursion?"}"#)
            .await
            .unwrap();

        let frames = sink.json();
        assert_eq!(frames[0], json!({"type": "start"}));
        let tokens: String = frames[1..frames.len() - 1]
            .iter()
            .map(|f| {
                assert_eq!(f["type"], "token");
                f["text"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(tokens, "First, we explain");

        let last = frames.last().unwrap();
        assert_eq!(last["type"], "final");
        assert_eq!(last["text"], "First, we explain");
        assert_eq!(last["affect"], "explaining");

        let history = controller.sessions().get_history("s1");
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_chat_relay_rejects_empty_query_without_provider_call() {
        let (controller, provider) = controller(ScriptedProvider::answering("unused"));
        let mut sink = RecordingSink::default();

        relay_chat(&mut sink, &controller, "s1", r#"{"query":"   "}"#)
            .await
            .unwrap();
        relay_chat(&mut sink, &controller, "s1", "not json")
            .await
            .unwrap();

        assert_eq!(
            sink.json(),
            vec![
                json!({"type": "error", "message": "Empty query"}),
                json!({"type": "error", "message": "Invalid JSON payload"}),
            ]
        );
        assert_eq!(provider.calls(), 0);
        assert!(controller.sessions().get_history("s1").is_empty());
    }

    #[tokio::test]
    async fn test_chat_relay_unavailable_checked_before_empty_query() {
        let controller = unavailable();
        let mut sink = RecordingSink::default();

        relay_chat(&mut sink, &controller, "s1", r#"{"query":""}"#)
            .await
            .unwrap();

        assert_eq!(
            sink.json(),
            vec![json!({"type": "error", "message": "RAG not configured."})]
        );
    }

    #[tokio::test]
    async fn test_chat_relay_disconnect_discards_turn() {
        let (controller, provider) = controller(
            ScriptedProvider::new(["a", "b", "c", "d", "e", "f"])
                .with_delay(Duration::from_millis(20)),
        );
        // start + two tokens, then the client is gone.
        let mut sink = RecordingSink::closing_after(3);

        let result = relay_chat(&mut sink, &controller, "s1", r#"{"query":"go"}"#).await;
        assert_eq!(result, Err(SinkClosed));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(controller.sessions().get_history("s1").is_empty());
        assert!(provider.delivered() < 6);
    }

    #[tokio::test]
    async fn test_chat_relay_mid_stream_failure_ends_with_fallback() {
        let (controller, _) = controller(ScriptedProvider::new(["Part one", " part two"]).fail_stream_after(1));
        let mut sink = RecordingSink::default();

        relay_chat(&mut sink, &controller, "s1", r#"{"query":"go"}"#)
            .await
            .unwrap();

        let frames = sink.json();
        let finals: Vec<_> = frames
            .iter()
            .filter(|f| f["type"] == "final" || f["type"] == "error")
            .collect();
        assert_eq!(finals.len(), 1);
        let text = finals[0]["text"].as_str().unwrap();
        assert!(text.starts_with("Part one"));
        assert!(text.ends_with("Sorry, I encountered a problem while streaming the response."));
    }

    #[tokio::test]
    async fn test_tts_streams_frames_then_end_and_deletes_artifact() {
        let synth = StaticSynthesizer::with_len(10000);
        let mut sink = RecordingSink::default();

        serve_tts(&mut sink, &synth, 4096, r#"{"text":"Hello there"}"#)
            .await
            .unwrap();

        let sizes: Vec<usize> = sink
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::Binary(b) => Some(b.len()),
                Sent::Json(_) => None,
            })
            .collect();
        assert_eq!(sizes, vec![4096, 4096, 1808]);
        assert_eq!(sink.sent.last(), Some(&Sent::Json(json!({"event": "end"}))));

        let replayed: Vec<u8> = sink
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::Binary(b) => Some(b.clone()),
                Sent::Json(_) => None,
            })
            .flatten()
            .collect();
        assert_eq!(replayed, synth.payload());

        let path = synth.last_path().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_tts_empty_text_keeps_connection_usable() {
        let synth = StaticSynthesizer::with_len(100);
        let mut sink = RecordingSink::default();

        serve_tts(&mut sink, &synth, 4096, r#"{"text":""}"#)
            .await
            .unwrap();
        assert_eq!(sink.sent, vec![Sent::Json(json!({"error": "Empty text"}))]);
        assert_eq!(synth.renders(), 0);

        serve_tts(&mut sink, &synth, 4096, r#"{"text":"again"}"#)
            .await
            .unwrap();
        assert_eq!(sink.sent.len(), 3);
        assert_eq!(sink.sent[1], Sent::Binary(synth.payload().to_vec()));
        assert_eq!(sink.sent[2], Sent::Json(json!({"event": "end"})));
    }

    #[tokio::test]
    async fn test_tts_backend_failure_reports_error() {
        let synth = StaticSynthesizer::failing();
        let mut sink = RecordingSink::default();

        serve_tts(&mut sink, &synth, 4096, r#"{"text":"hi","voice":"en"}"#)
            .await
            .unwrap();

        let frames = sink.json();
        assert_eq!(frames.len(), 1);
        let message = frames[0]["error"].as_str().unwrap();
        assert!(message.starts_with("TTS failed:"));
        assert!(message.contains("engine crashed"));
    }

    #[tokio::test]
    async fn test_tts_disconnect_mid_stream_still_deletes_artifact() {
        let synth = StaticSynthesizer::with_len(10000);
        let mut sink = RecordingSink::closing_after(1);

        let result = serve_tts(&mut sink, &synth, 4096, r#"{"text":"Hello"}"#).await;
        assert_eq!(result, Err(SinkClosed));
        assert_eq!(sink.sent.len(), 1);
        assert!(!synth.last_path().unwrap().exists());
    }
}

// WebSocket stream sessions: handshake, then one fused result per frame

use crate::http::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use sightline_eye::{FrameStatus, FusedFrameResult, FusionPipeline};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sent in place of a frame result that could not be encoded
const ENCODE_FAILURE_REPLY: &str = r#"{"translated_text":"","boxes":[],"depth":null,"status":"error"}"#;

/// WebSocket upgrade handler for `/ws/video`
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!("WebSocket connection established: {}", connection_id);

    let (sender, receiver) = socket.split();
    let summary = StreamSession::new(state.pipeline.clone(), connection_id.clone())
        .run(receiver, sender)
        .await;

    info!(
        "WebSocket connection closed: {} ({:?}, {} frames, {} errors)",
        connection_id, summary.end, summary.frames, summary.errors
    );
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    HandshakeRejected,
    TransportError,
    SendFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub connection_id: String,
    pub target_lang: Option<String>,
    /// Frames answered, including error-status frames
    pub frames: u64,
    pub errors: u64,
    pub end: SessionEnd,
}

/// Per-connection control loop.
///
/// Frames are processed strictly in arrival order and each one yields
/// exactly one response before the next is read.
pub struct StreamSession {
    pipeline: Arc<FusionPipeline>,
    connection_id: String,
    target_lang: Option<String>,
    frames: u64,
    errors: u64,
}

enum Outcome {
    Continue,
    Stop(SessionEnd),
}

impl StreamSession {
    pub fn new(pipeline: Arc<FusionPipeline>, connection_id: impl Into<String>) -> Self {
        Self {
            pipeline,
            connection_id: connection_id.into(),
            target_lang: None,
            frames: 0,
            errors: 0,
        }
    }

    pub async fn run<I, O, E>(mut self, mut incoming: I, mut outgoing: O) -> SessionSummary
    where
        I: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
        O: Sink<Message> + Unpin,
        O::Error: Display,
    {
        let end = match self.handshake(&mut incoming, &mut outgoing).await {
            Outcome::Stop(end) => end,
            Outcome::Continue => self.stream_frames(&mut incoming, &mut outgoing).await,
        };

        SessionSummary {
            connection_id: self.connection_id,
            target_lang: self.target_lang,
            frames: self.frames,
            errors: self.errors,
            end,
        }
    }

    async fn handshake<I, O, E>(&mut self, incoming: &mut I, outgoing: &mut O) -> Outcome
    where
        I: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
        O: Sink<Message> + Unpin,
        O::Error: Display,
    {
        loop {
            let text = match incoming.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Outcome::Stop(SessionEnd::ClientClosed),
                Some(Err(e)) => {
                    warn!("WebSocket error during handshake on {}: {}", self.connection_id, e);
                    return Outcome::Stop(SessionEnd::TransportError);
                }
            };

            let Some(lang) = parse_handshake(&text) else {
                warn!("Rejecting handshake on {}: not a language code", self.connection_id);
                let reply = json!({
                    "status": "error",
                    "detail": "Invalid handshake: expected a language code",
                });
                let _ = send_json(outgoing, &reply).await;
                let _ = outgoing.send(Message::Close(None)).await;
                return Outcome::Stop(SessionEnd::HandshakeRejected);
            };

            info!("Session {} target language: {}", self.connection_id, lang);
            let reply = json!({ "status": "ready", "target_lang": lang });
            self.target_lang = Some(lang);
            return match send_json(outgoing, &reply).await {
                Ok(()) => Outcome::Continue,
                Err(e) => {
                    warn!("Failed to confirm handshake on {}: {}", self.connection_id, e);
                    Outcome::Stop(SessionEnd::SendFailed)
                }
            };
        }
    }

    async fn stream_frames<I, O, E>(&mut self, incoming: &mut I, outgoing: &mut O) -> SessionEnd
    where
        I: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
        O: Sink<Message> + Unpin,
        O::Error: Display,
    {
        while let Some(message) = incoming.next().await {
            let result = match message {
                Ok(Message::Text(text)) => {
                    if let Some(new_lang) = parse_language_change(&text) {
                        info!("Session {} language changed to {}", self.connection_id, new_lang);
                        let reply = json!({ "status": "language_changed", "target_lang": new_lang });
                        self.target_lang = Some(new_lang);
                        if let Err(e) = send_json(outgoing, &reply).await {
                            warn!("Failed to send to {}: {}", self.connection_id, e);
                            return SessionEnd::SendFailed;
                        }
                        continue;
                    }
                    self.pipeline.process_payload(&text, self.language()).await
                }
                Ok(Message::Binary(bytes)) => self.pipeline.process_bytes(&bytes, self.language()).await,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => return SessionEnd::ClientClosed,
                Err(e) => {
                    warn!("WebSocket error on {}: {}", self.connection_id, e);
                    return SessionEnd::TransportError;
                }
            };

            if let Outcome::Stop(end) = self.respond(outgoing, &result).await {
                return end;
            }
        }

        SessionEnd::ClientClosed
    }

    fn language(&self) -> &str {
        self.target_lang.as_deref().unwrap_or_default()
    }

    async fn respond<O>(&mut self, outgoing: &mut O, result: &FusedFrameResult) -> Outcome
    where
        O: Sink<Message> + Unpin,
        O::Error: Display,
    {
        self.frames += 1;
        if result.status == FrameStatus::Error {
            self.errors += 1;
            debug!("Frame {} on {} failed to decode", self.frames, self.connection_id);
        }

        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize frame result: {}", e);
                if result.status != FrameStatus::Error {
                    self.errors += 1;
                }
                ENCODE_FAILURE_REPLY.to_string()
            }
        };
        match outgoing.send(Message::Text(payload)).await {
            Ok(()) => Outcome::Continue,
            Err(e) => {
                warn!("Failed to send to {}: {}", self.connection_id, e);
                Outcome::Stop(SessionEnd::SendFailed)
            }
        }
    }
}

async fn send_json<O>(outgoing: &mut O, value: &Value) -> Result<(), O::Error>
where
    O: Sink<Message> + Unpin,
{
    outgoing.send(Message::Text(value.to_string())).await
}

/// ISO 639-1 style code, optionally with a region (`zh-CN`)
pub fn is_language_code(code: &str) -> bool {
    (2..=10).contains(&code.len())
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// First message: a bare code or JSON with `target_lang`, `language` or `lang`
pub fn parse_handshake(text: &str) -> Option<String> {
    let text = text.trim();
    if text.starts_with('{') {
        let value: Value = serde_json::from_str(text).ok()?;
        return ["target_lang", "language", "lang"]
            .iter()
            .filter_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|code| is_language_code(code))
            .map(str::to_string);
    }
    is_language_code(text).then(|| text.to_string())
}

/// Mid-session `{"target_lang": ".."}` control message
pub fn parse_language_change(text: &str) -> Option<String> {
    let text = text.trim();
    if !text.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(text).ok()?;
    let code = value.get("target_lang")?.as_str()?.trim();
    is_language_code(code).then(|| code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        assert!(is_language_code("hi"));
        assert!(is_language_code("zh-CN"));
        assert!(!is_language_code("x"));
        assert!(!is_language_code("iVBORw0KGgoAAAANSUhEUg"));
        assert!(!is_language_code("e s"));
    }

    #[test]
    fn test_parse_handshake() {
        assert_eq!(parse_handshake(" hi \n").as_deref(), Some("hi"));
        assert_eq!(parse_handshake(r#"{"target_lang": "es"}"#).as_deref(), Some("es"));
        assert_eq!(parse_handshake(r#"{"language": "fr"}"#).as_deref(), Some("fr"));
        assert_eq!(parse_handshake(r#"{"lang": "de"}"#).as_deref(), Some("de"));
        assert_eq!(parse_handshake(r#"{"lang": 42}"#), None);
        assert_eq!(parse_handshake("{not json"), None);
        assert_eq!(parse_handshake(""), None);
    }

    #[test]
    fn test_encode_failure_reply_is_an_error_result() {
        let reply: FusedFrameResult = serde_json::from_str(ENCODE_FAILURE_REPLY).unwrap();
        assert_eq!(reply.status, FrameStatus::Error);
        assert!(reply.boxes.is_empty());
        assert!(reply.depth.is_none());
        assert!(reply.translated_text.is_empty());
    }

    #[test]
    fn test_parse_language_change() {
        assert_eq!(parse_language_change(r#"{"target_lang":"ta"}"#).as_deref(), Some("ta"));
        assert_eq!(parse_language_change("ta"), None);
        assert_eq!(parse_language_change(r#"{"language":"ta"}"#), None);
        assert_eq!(parse_language_change("data:image/png;base64,AAAA"), None);
    }
}

//! Stream session behaviour over in-memory channels

use axum::extract::ws::Message;
use base64::{engine::general_purpose, Engine as _};
use futures::channel::mpsc;
use futures::StreamExt;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use serde_json::Value;
use sightline_eye::frame::Frame;
use sightline_eye::models::{ObjectDetector, RawDetection};
use sightline_eye::translation::{TranslationCache, Translator};
use sightline_eye::{FusionPipeline, PipelineConfig, Result};
use sightline_server::websocket::{SessionEnd, SessionSummary, StreamSession};
use std::io::Cursor;
use std::sync::Arc;

struct FixedDetector(Vec<RawDetection>);

impl ObjectDetector for FixedDetector {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        Ok(self.0.clone())
    }
}

struct TaggingTranslator;

#[async_trait::async_trait]
impl Translator for TaggingTranslator {
    fn name(&self) -> &'static str {
        "tagging"
    }

    async fn translate(&self, text: &str, _source: &str, target: &str) -> Result<String> {
        Ok(format!("{}:{}", target, text))
    }
}

fn pipeline(detections: Vec<RawDetection>) -> Arc<FusionPipeline> {
    let cache = Arc::new(TranslationCache::new(Arc::new(TaggingTranslator), "en", 100));
    Arc::new(FusionPipeline::new(
        &PipelineConfig::default(),
        Arc::new(FixedDetector(detections)),
        cache,
    ))
}

fn png_bytes() -> Vec<u8> {
    let image = RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 90]));
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .unwrap();
    bytes.into_inner()
}

fn frame_text() -> Message {
    Message::Text(general_purpose::STANDARD.encode(png_bytes()))
}

fn text(s: &str) -> Message {
    Message::Text(s.to_string())
}

/// Feed `messages` to a session, then hang up. Returns the summary and every reply.
async fn run_session(
    pipeline: Arc<FusionPipeline>,
    messages: Vec<std::result::Result<Message, axum::Error>>,
) -> (SessionSummary, Vec<Message>) {
    let (in_tx, in_rx) = mpsc::unbounded();
    let (out_tx, out_rx) = mpsc::unbounded::<Message>();
    for message in messages {
        in_tx.unbounded_send(message).unwrap();
    }
    drop(in_tx);

    let summary = StreamSession::new(pipeline, "test-conn").run(in_rx, out_tx).await;
    let replies = out_rx.collect::<Vec<_>>().await;
    (summary, replies)
}

fn json_of(message: &Message) -> Value {
    match message {
        Message::Text(text) => serde_json::from_str(text).unwrap(),
        other => panic!("expected a text reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handshake_then_frames() {
    let detections = vec![RawDetection {
        label: "chair".to_string(),
        confidence: 0.8,
        bbox: [2.0, 2.0, 20.0, 20.0],
    }];
    let (summary, replies) =
        run_session(pipeline(detections), vec![Ok(text("hi")), Ok(frame_text()), Ok(frame_text())]).await;

    assert_eq!(summary.end, SessionEnd::ClientClosed);
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.target_lang.as_deref(), Some("hi"));

    assert_eq!(replies.len(), 3);
    let ready = json_of(&replies[0]);
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["target_lang"], "hi");

    let frame = json_of(&replies[1]);
    assert_eq!(frame["status"], "success");
    assert_eq!(frame["translated_text"], "hi:chair");
    assert_eq!(frame["boxes"][0]["label"], "chair");
    assert_eq!(frame["boxes"][0]["position"], "left");
    assert!(frame["depth"].is_null());
}

#[tokio::test]
async fn test_json_handshake() {
    let (summary, replies) =
        run_session(pipeline(vec![]), vec![Ok(text(r#"{"language": "es"}"#)), Ok(frame_text())]).await;
    assert_eq!(summary.target_lang.as_deref(), Some("es"));
    assert_eq!(json_of(&replies[1])["translated_text"], "es:No objects detected");
}

#[tokio::test]
async fn test_bad_frame_does_not_end_session() {
    let (summary, replies) = run_session(
        pipeline(vec![]),
        vec![Ok(text("fr")), Ok(text("this is not base64!")), Ok(frame_text())],
    )
    .await;

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.end, SessionEnd::ClientClosed);

    let bad = json_of(&replies[1]);
    assert_eq!(bad["status"], "error");
    assert_eq!(bad["translated_text"], "fr:Invalid frame");
    assert_eq!(bad["boxes"], serde_json::json!([]));

    assert_eq!(json_of(&replies[2])["status"], "success");
}

#[tokio::test]
async fn test_binary_frames_are_decoded() {
    let (summary, replies) =
        run_session(pipeline(vec![]), vec![Ok(text("en")), Ok(Message::Binary(png_bytes()))]).await;
    assert_eq!(summary.frames, 1);
    let frame = json_of(&replies[1]);
    assert_eq!(frame["status"], "success");
    assert_eq!(frame["translated_text"], "No objects detected");
}

#[tokio::test]
async fn test_language_change_mid_session() {
    let (summary, replies) = run_session(
        pipeline(vec![]),
        vec![
            Ok(text("en")),
            Ok(frame_text()),
            Ok(text(r#"{"target_lang": "ta"}"#)),
            Ok(frame_text()),
        ],
    )
    .await;

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.target_lang.as_deref(), Some("ta"));
    assert_eq!(json_of(&replies[1])["translated_text"], "No objects detected");

    let changed = json_of(&replies[2]);
    assert_eq!(changed["status"], "language_changed");
    assert_eq!(changed["target_lang"], "ta");
    assert_eq!(json_of(&replies[3])["translated_text"], "ta:No objects detected");
}

#[tokio::test]
async fn test_invalid_handshake_closes() {
    let (summary, replies) =
        run_session(pipeline(vec![]), vec![Ok(text("not a language")), Ok(frame_text())]).await;

    assert_eq!(summary.end, SessionEnd::HandshakeRejected);
    assert_eq!(summary.frames, 0);
    assert_eq!(replies.len(), 2);
    assert_eq!(json_of(&replies[0])["status"], "error");
    assert!(matches!(replies[1], Message::Close(_)));
}

#[tokio::test]
async fn test_pings_are_ignored() {
    let (summary, replies) = run_session(
        pipeline(vec![]),
        vec![
            Ok(Message::Ping(vec![1])),
            Ok(text("de")),
            Ok(Message::Pong(vec![2])),
            Ok(frame_text()),
        ],
    )
    .await;
    assert_eq!(summary.frames, 1);
    assert_eq!(replies.len(), 2);
}

#[tokio::test]
async fn test_close_message_ends_session() {
    let (summary, replies) = run_session(
        pipeline(vec![]),
        vec![Ok(text("en")), Ok(Message::Close(None)), Ok(frame_text())],
    )
    .await;
    assert_eq!(summary.end, SessionEnd::ClientClosed);
    assert_eq!(summary.frames, 0);
    assert_eq!(replies.len(), 1);
}

#[tokio::test]
async fn test_transport_error_ends_session() {
    let error = axum::Error::new(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
    let (summary, _) = run_session(
        pipeline(vec![]),
        vec![Ok(text("en")), Err(error), Ok(frame_text())],
    )
    .await;
    assert_eq!(summary.end, SessionEnd::TransportError);
    assert_eq!(summary.frames, 0);
}

#[tokio::test]
async fn test_disconnect_before_handshake() {
    let (summary, replies) = run_session(pipeline(vec![]), vec![]).await;
    assert_eq!(summary.end, SessionEnd::ClientClosed);
    assert!(summary.target_lang.is_none());
    assert!(replies.is_empty());
}

#[tokio::test]
async fn test_send_failure_ends_session() {
    let (in_tx, in_rx) = mpsc::unbounded();
    let (out_tx, out_rx) = mpsc::unbounded::<Message>();
    drop(out_rx);
    in_tx.unbounded_send(Ok::<_, axum::Error>(text("en"))).unwrap();
    in_tx.unbounded_send(Ok(frame_text())).unwrap();
    drop(in_tx);

    let summary = StreamSession::new(pipeline(vec![]), "gone").run(in_rx, out_tx).await;
    assert_eq!(summary.end, SessionEnd::SendFailed);
}

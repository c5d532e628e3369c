//! One-shot HTTP endpoints exercised in-process

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use sightline_eye::frame::Frame;
use sightline_eye::models::{DepthEstimator, DepthMap, ObjectDetector, RawDetection};
use sightline_eye::translation::Translator;
use sightline_eye::{PerceptionError, Result};
use sightline_server::config::ServerConfig;
use sightline_server::http::{create_router, AppState};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct EmptyDetector;

impl ObjectDetector for EmptyDetector {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        Ok(vec![])
    }
}

struct ConstantDepth;

impl DepthEstimator for ConstantDepth {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn depth_map(&self, frame: &Frame) -> Result<DepthMap> {
        Ok(DepthMap {
            width: frame.width(),
            height: frame.height(),
            values: vec![100.0; (frame.width() * frame.height()) as usize],
        })
    }
}

struct UpperTranslator;

#[async_trait::async_trait]
impl Translator for UpperTranslator {
    fn name(&self) -> &'static str {
        "upper"
    }

    async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String> {
        Ok(text.to_uppercase())
    }
}

struct DownTranslator;

#[async_trait::async_trait]
impl Translator for DownTranslator {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn translate(&self, _text: &str, _source: &str, _target: &str) -> Result<String> {
        Err(PerceptionError::Translation("service unavailable".to_string()))
    }
}

fn state(
    dir: &TempDir,
    depth: Option<Arc<dyn DepthEstimator>>,
    translator: Arc<dyn Translator>,
) -> AppState {
    let config = ServerConfig {
        descriptor_dir: dir.path().to_path_buf(),
        ..ServerConfig::default()
    };
    AppState::build(&config, Arc::new(EmptyDetector), depth, translator)
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn textured_png(seed: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(160, 120, |x, y| {
        let cell = (x / 9) * 131 + (y / 9) * 71 + seed;
        let v = (cell.wrapping_mul(2_654_435_761) >> 24) as u8;
        Rgb([v, v, v])
    });
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .unwrap();
    bytes.into_inner()
}

const BOUNDARY: &str = "sightline-test-boundary";

fn multipart(files: &[(&str, &str, Vec<u8>)]) -> Request<Body> {
    let mut body = Vec::new();
    for (field, filename, bytes) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/process-images/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_root_and_health() {
    let dir = TempDir::new().unwrap();
    let app = create_router(state(&dir, None, Arc::new(UpperTranslator)));

    let (status, body) = call(app.clone(), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["server_ip"], "0.0.0.0:8000");

    let (status, body) = call(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "healthy", "identities": 0, "depth": false }));
}

#[tokio::test]
async fn test_translate() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir, None, Arc::new(UpperTranslator));
    let app = create_router(state.clone());

    let (status, body) = call(
        app.clone(),
        post_json("/translate", json!({ "text": "door ahead", "target_lang": "es" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "translated_text": "DOOR AHEAD", "status": "success" }));
    // shared with the streaming path
    assert_eq!(state.pipeline.translations().len(), 1);

    let (_, body) = call(
        app,
        post_json("/translate", json!({ "text": "door ahead", "target_lang": "en" })),
    )
    .await;
    assert_eq!(body["translated_text"], "door ahead");
}

#[tokio::test]
async fn test_translate_failure_is_bad_gateway() {
    let dir = TempDir::new().unwrap();
    let app = create_router(state(&dir, None, Arc::new(DownTranslator)));

    let (status, body) = call(
        app,
        post_json("/translate", json!({ "text": "stairs", "target_lang": "fr" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["detail"].as_str().unwrap().contains("service unavailable"));
}

#[tokio::test]
async fn test_depth_without_backend() {
    let dir = TempDir::new().unwrap();
    let app = create_router(state(&dir, None, Arc::new(UpperTranslator)));

    let (status, body) = call(app, get("/depth")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_depth_uses_latest_frame() {
    let dir = TempDir::new().unwrap();
    let state = state(&dir, Some(Arc::new(ConstantDepth)), Arc::new(UpperTranslator));
    let app = create_router(state.clone());

    let (_, health) = call(app.clone(), get("/health")).await;
    assert_eq!(health["depth"], true);

    let (status, _) = call(app.clone(), get("/depth")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let payload = general_purpose::STANDARD.encode(textured_png(1));
    state.pipeline.process_payload(&payload, "en").await;

    let (status, body) = call(app, get("/depth")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["estimated_distance_cm"], 1.1);
}

#[tokio::test]
async fn test_enrollment_upload() {
    let dir = TempDir::new().unwrap();
    let app = create_router(state(&dir, None, Arc::new(UpperTranslator)));

    let (status, body) = call(
        app.clone(),
        multipart(&[
            ("images", "alice_front.png", textured_png(7)),
            ("notes", "ignored.png", textured_png(8)),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["filename"], "alice_front.png");
    assert_eq!(results[0]["person_name"], "alice");
    assert_eq!(results[0]["variations"].as_array().unwrap().len(), 5);
    assert!(results[0]["variations"][0]["num_keypoints"].as_u64().unwrap() > 0);

    assert!(dir.path().join("alice_descriptors.json").is_file());
    let (_, health) = call(app, get("/health")).await;
    assert_eq!(health["identities"], 1);
}

#[tokio::test]
async fn test_enrollment_without_images() {
    let dir = TempDir::new().unwrap();
    let app = create_router(state(&dir, None, Arc::new(UpperTranslator)));

    let (status, body) = call(app, multipart(&[("other", "x.png", textured_png(1))])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "No images uploaded");
}

#[tokio::test]
async fn test_reload_picks_up_external_enrollment() {
    let dir = TempDir::new().unwrap();
    let app = create_router(state(&dir, None, Arc::new(UpperTranslator)));

    std::fs::write(
        dir.path().join("zoe_descriptors.json"),
        json!({
            "person_name": "zoe",
            "variations": [{ "variation": "original", "descriptors": [[1, 2, 3, 4]] }]
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(dir.path().join("broken_descriptors.json"), "{ nope").unwrap();

    let (status, body) = call(
        app.clone(),
        Request::builder()
            .method("POST")
            .uri("/descriptors/reload")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "identities": 1 }));
}

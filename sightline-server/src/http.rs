// HTTP API: one-shot endpoints and the WebSocket upgrade route

use crate::config::ServerConfig;
use crate::websocket::websocket_handler;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sightline_eye::descriptors::{EnrolledImage, Enroller, FeatureMatcher};
use sightline_eye::models::{BriefExtractor, DepthEstimator, FeatureExtractor, ObjectDetector};
use sightline_eye::processing::{DepthSmoother, DepthStage, DepthWorkerPool, ReIdentificationStage};
use sightline_eye::translation::{TranslationCache, Translator};
use sightline_eye::{DescriptorStore, FusionPipeline};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared state for every route and stream session
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<FusionPipeline>,
    pub store: Arc<DescriptorStore>,
    pub enroller: Arc<Enroller>,
    pub default_language: String,
    pub bind_address: String,
}

impl AppState {
    /// Wire the perception core from its backends. Loads the descriptor
    /// index once.
    pub fn build(
        config: &ServerConfig,
        detector: Arc<dyn ObjectDetector>,
        depth: Option<Arc<dyn DepthEstimator>>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        let pipeline_config = &config.pipeline;
        let store = Arc::new(DescriptorStore::new(&config.descriptor_dir));
        store.load();

        let extractor: Arc<dyn FeatureExtractor> = Arc::new(BriefExtractor::default());
        let translations = Arc::new(TranslationCache::new(
            translator,
            pipeline_config.default_language.clone(),
            pipeline_config.translation_cache_capacity,
        ));

        let reid = ReIdentificationStage::new(
            extractor.clone(),
            store.clone(),
            FeatureMatcher::new(pipeline_config.max_hamming_distance),
            pipeline_config.reid_confidence_threshold,
            pipeline_config.min_matches,
        );
        let mut pipeline = FusionPipeline::new(pipeline_config, detector, translations)
            .with_reidentification(reid);

        match depth {
            Some(estimator) => {
                let stage = DepthStage::new(
                    estimator,
                    pipeline_config.depth,
                    Arc::new(DepthSmoother::new(pipeline_config.smoothing_window)),
                );
                pipeline = pipeline.with_depth(DepthWorkerPool::new(Arc::new(stage), pipeline_config.depth_workers));
            }
            None => warn!("No depth estimator configured; frames will report depth as null"),
        }

        Self {
            pipeline: Arc::new(pipeline),
            enroller: Arc::new(Enroller::new(extractor, store.clone())),
            store,
            default_language: pipeline_config.default_language.clone(),
            bind_address: config.bind_address(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ws/video", get(websocket_handler))
        .route("/translate", post(translate_handler))
        .route("/depth", get(depth_handler))
        .route(
            "/process-images/",
            post(process_images_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/descriptors/reload", post(reload_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "server_ip": state.bind_address,
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "identities": state.store.len(),
        "depth": state.pipeline.has_depth(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    pub target_lang: String,
}

async fn translate_handler(
    State(state): State<AppState>,
    Json(request): Json<TranslateRequest>,
) -> (StatusCode, Json<Value>) {
    match state
        .pipeline
        .translations()
        .try_translate(&request.text, &request.target_lang)
        .await
    {
        Ok(translated_text) => (
            StatusCode::OK,
            Json(json!({
                "translated_text": translated_text,
                "status": "success",
            })),
        ),
        Err(e) => {
            warn!("Translation request failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "detail": e.to_string() })),
            )
        }
    }
}

async fn depth_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.pipeline.estimate_latest_depth().await {
        Ok(estimate) => (
            StatusCode::OK,
            Json(json!({ "estimated_distance_cm": estimate.distance_cm })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn process_images_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut images = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("images") {
                    continue;
                }
                let filename = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => images.push(EnrolledImage {
                        filename,
                        bytes: bytes.to_vec(),
                    }),
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({ "detail": format!("Failed to read upload: {}", e) })),
                        )
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "detail": format!("Invalid multipart body: {}", e) })),
                )
            }
        }
    }

    if images.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "No images uploaded" })),
        );
    }

    let count = images.len();
    let enroller = state.enroller.clone();
    match tokio::task::spawn_blocking(move || enroller.enroll(images)).await {
        Ok(results) => {
            info!("Enrolled {} of {} uploaded images", results.len(), count);
            (StatusCode::OK, Json(json!({ "results": results })))
        }
        Err(e) => {
            error!("Enrollment task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "Enrollment task failed" })),
            )
        }
    }
}

async fn reload_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || store.load()).await {
        Ok(identities) => (StatusCode::OK, Json(json!({ "identities": identities }))),
        Err(e) => {
            error!("Descriptor reload failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "Descriptor reload failed" })),
            )
        }
    }
}

// Main entry point for the crop disease detection service

use crop_doctor::{
    core::{
        errors::PredictionError,
        types::{PredictionResponse, SupportedLanguagesResponse, TranslationRequest, TranslationResponse},
        Config,
    },
    orchestration::RequestOrchestrator,
    services::{
        detection::{ModelAdapter, OnnxModelLoader},
        font_manager,
        prediction::PredictionService,
        rendering::Annotator,
        translation::TranslationService,
    },
    utils::Metrics,
};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// Room for multipart framing on top of the file itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<RequestOrchestrator>,
    metrics: Metrics,
}

#[derive(Debug, Deserialize)]
struct PredictQuery {
    lang: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "crop_doctor={},tower_http={},ort=off",
        level_name(config.log_level()),
        level_name(config.log_level()),
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== CROP DOCTOR v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: model={} conf={} iou={} size={} pool={} translation={}",
        config.model_path().display(),
        config.detection.confidence_threshold,
        config.detection.iou_threshold,
        config.detection.target_size,
        config.onnx_pool_size(),
        if config.translation.enabled { "ON" } else { "OFF" }
    );

    // Initialize metrics
    let metrics = Metrics::new();

    // Detection model adapter (loaded lazily unless eager loading is on)
    let loader = Arc::new(OnnxModelLoader::new(config.detection.clone()));
    let adapter = Arc::new(ModelAdapter::new(loader));

    if config.detection.load_on_startup && adapter.model_exists() {
        info!("Loading detection model at startup...");
        if let Err(e) = adapter.handle().await {
            warn!("Startup model load failed, will retry on first request: {}", e);
        }
    } else if !adapter.model_exists() {
        warn!(
            "⚠ Model file not found at {}, /predict will return 503 until it exists",
            config.model_path().display()
        );
    }

    let font = font_manager::resolve_font(&config.rendering.font_paths);
    let annotator = Arc::new(Annotator::new(
        font,
        config.rendering.font_size,
        config.rendering.box_thickness,
    ));

    let prediction = Arc::new(PredictionService::new(adapter, annotator, metrics.clone()));
    let translation = Arc::new(TranslationService::from_config(
        &config.translation,
        metrics.clone(),
    )?);

    let orchestrator = Arc::new(RequestOrchestrator::new(
        prediction,
        translation,
        config.max_upload_bytes(),
    ));
    let state = AppState {
        orchestrator,
        metrics,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/languages", get(languages))
        .route("/translate", post(translate))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .with_state(state)
        .layer(DefaultBodyLimit::max(
            config.max_upload_bytes() + MULTIPART_OVERHEAD_BYTES,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /           - Service info");
    info!("  GET  /health     - Model and runtime status");
    info!("  POST /predict    - Detect disease (multipart field 'file', ?lang=xx)");
    info!("  GET  /languages  - Supported translation languages");
    info!("  POST /translate  - Translate a single string");
    info!("  GET  /metrics    - Prometheus metrics");
    info!("  GET  /stats      - Detailed statistics");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn level_name(level: tracing::Level) -> &'static str {
    match level {
        tracing::Level::TRACE => "trace",
        tracing::Level::DEBUG => "debug",
        tracing::Level::INFO => "info",
        tracing::Level::WARN => "warn",
        tracing::Level::ERROR => "error",
    }
}

/// HTTP status for each prediction failure class
fn status_for(error: &PredictionError) -> StatusCode {
    match error {
        PredictionError::InvalidImage(_) => StatusCode::BAD_REQUEST,
        e if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.record_endpoint_request("/");
    Json(serde_json::json!({
        "service": "Crop Doctor",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "predict": "POST /predict",
            "languages": "GET /languages",
            "translate": "POST /translate",
            "metrics": "GET /metrics",
            "stats": "GET /stats",
        },
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.record_endpoint_request("/health");
    Json(state.orchestrator.health())
}

/// Predict endpoint
///
/// # Request Format:
/// - multipart/form-data
/// - Field "file": one image (PNG/JPEG/WebP/BMP/GIF)
/// - Query "lang" (optional): target language for labels
///
/// # Response:
/// - PredictionResponse JSON with a base64 PNG data URI
async fn predict(
    State(state): State<AppState>,
    Query(query): Query<PredictQuery>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, (StatusCode, String)> {
    state.metrics.record_endpoint_request("/predict");
    let start_time = std::time::Instant::now();

    let mut upload = None;

    // Parse multipart form
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;
        upload = Some((content_type, data.to_vec()));
        break;
    }

    let (content_type, bytes) = upload.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "No file provided (multipart field 'file')".to_string(),
        )
    })?;

    let response = state
        .orchestrator
        .predict(content_type.as_deref(), bytes, query.lang.as_deref())
        .await
        .map_err(|e| {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Prediction failed: {:?}", e);
            }
            (status, e.to_string())
        })?;

    info!(
        "Request completed in {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(Json(response))
}

async fn languages(State(state): State<AppState>) -> Json<SupportedLanguagesResponse> {
    state.metrics.record_endpoint_request("/languages");
    Json(state.orchestrator.languages())
}

async fn translate(
    State(state): State<AppState>,
    Json(request): Json<TranslationRequest>,
) -> Json<TranslationResponse> {
    state.metrics.record_endpoint_request("/translate");
    Json(state.orchestrator.translate(request).await)
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

//! Trendmap Server - HTTP API for text clustering and content-gap analysis.
//!
//! Thin axum server wrapping the shared trendmap_lib pipeline. The embedding
//! model is loaded once at startup; every request runs on the blocking pool.
//!
//! Usage:
//!   TRENDMAP_BIND=127.0.0.1:8000 GEMINI_API_KEY=... trendmap-server
//!
//! Or with args:
//!   trendmap-server --bind 0.0.0.0:8000 --config /path/to/settings.json

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use trendmap_lib::embeddings::Embedder;
use trendmap_lib::local_embeddings::LocalEmbedder;
use trendmap_lib::settings::Settings;
use trendmap_lib::{ai_client, ClusterRequest, ClusterResponse, Pipeline, PipelineError, PipelineOptions};

// ============================================================================
// AppState
// ============================================================================

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

// ============================================================================
// Error type
// ============================================================================

struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({"error": self.1}))).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        let status = if e.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        AppError(status, e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn cluster_handler(
    State(state): State<AppState>,
    payload: Result<Json<ClusterRequest>, JsonRejection>,
) -> Result<Json<ClusterResponse>, AppError> {
    let Json(request) = payload?;
    let started = Instant::now();
    let items = request.texts.len();

    let pipeline = state.pipeline.clone();
    let result = tokio::task::spawn_blocking(move || pipeline.run(&request))
        .await
        .map_err(|e| AppError(StatusCode::INTERNAL_SERVER_ERROR, format!("worker failed: {}", e)))?;

    match result {
        Ok(result) => {
            info!(items, elapsed_ms = started.elapsed().as_millis() as u64, "request served");
            Ok(Json(ClusterResponse::from(result)))
        }
        Err(e) => {
            if e.is_client_error() {
                warn!(error = %e, "rejected request");
            } else {
                error!(error = %e, "request failed");
            }
            Err(e.into())
        }
    }
}

fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/cluster", post(cluster_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    trendmap_lib::init_tracing("info");

    // Parse simple args (no clap to keep binary small)
    let args: Vec<String> = std::env::args().collect();
    let mut config_arg: Option<PathBuf> = None;
    let mut bind_arg: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                config_arg = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--bind" if i + 1 < args.len() => {
                bind_arg = Some(args[i + 1].clone());
                i += 2;
            }
            "--help" | "-h" => {
                println!("trendmap-server - text clustering and content-gap HTTP API");
                println!();
                println!("Usage: trendmap-server [--config PATH] [--bind ADDR:PORT]");
                println!();
                println!("Environment variables:");
                println!("  TRENDMAP_BIND         Bind address (default: 0.0.0.0:8000)");
                println!("  TRENDMAP_LLM_BACKEND  gemini | anthropic | disabled");
                println!("  GEMINI_API_KEY        Gemini API key");
                println!("  ANTHROPIC_API_KEY     Anthropic API key");
                println!("  RUST_LOG              Log filter (default: info)");
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    let settings = match Settings::resolve(config_arg.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let bind_addr = bind_arg.unwrap_or_else(|| settings.bind_addr.clone());

    info!(
        backend = %settings.llm_backend,
        api_key = settings.masked_api_key().as_deref().unwrap_or("none"),
        "idea generation backend"
    );

    // Load and warm up embedding model
    info!(model = %settings.embedding_model, "loading embedding model");
    let model_id = settings.embedding_model.clone();
    let embedder = match tokio::task::spawn_blocking(move || LocalEmbedder::new(&model_id)).await {
        Ok(Ok(embedder)) => Arc::new(embedder),
        Ok(Err(e)) => {
            error!(error = %e, "failed to load embedding model");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "embedding loader panicked");
            std::process::exit(1);
        }
    };

    let warmup = embedder.clone();
    match tokio::task::spawn_blocking(move || warmup.encode(&["warmup".to_string()])).await {
        Ok(Ok(_)) => info!("embedding model ready"),
        Ok(Err(e)) => warn!(error = %e, "embedding warmup failed"),
        Err(e) => warn!(error = %e, "embedding warmup panicked"),
    }

    let pipeline = Pipeline::new(
        embedder,
        ai_client::from_settings(&settings),
        PipelineOptions::from(&settings),
    );
    let state = AppState {
        pipeline: Arc::new(pipeline),
    };
    let app = router(state, settings.max_body_bytes);

    // Bind and serve
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = %bind_addr, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %bind_addr, "listening");
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

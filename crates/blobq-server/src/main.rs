//! blobq Server - Message queue HTTP server
//!
//! This is the main entry point for the blobq message queue.

mod config;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use blobq_core::{MessageQueue, SqliteMetadataStore, NO_CONTENT};
use blobq_types::{Error, MessageId, QueueStats};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Config, LogFormat};

// ==================== App State ====================

/// Shared application state
#[derive(Clone)]
struct AppState {
    queue: MessageQueue,
}

// ==================== Request/Response Types ====================

/// Enqueue request
#[derive(Debug, Deserialize, ToSchema)]
struct EnqueueRequest {
    /// Text to store; must be non-empty
    #[serde(default)]
    message_content: Option<String>,
}

/// Enqueue response
#[derive(Debug, Serialize, ToSchema)]
struct EnqueueResponse {
    /// ID of the stored message
    id: MessageId,
}

/// Dequeued message
#[derive(Debug, Serialize, ToSchema)]
struct NextMessageResponse {
    /// ID assigned at enqueue
    id: MessageId,
    /// Message content
    message: String,
}

/// API Error response
#[derive(Debug, Serialize, ToSchema)]
struct ApiErrorBody {
    /// Error message
    error: String,
}

/// Health check response
#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    /// Health status
    status: String,
    /// Server version
    version: String,
}

// ==================== Error Handling ====================

/// Wrapper for queue errors to implement IntoResponse
struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::Empty => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Inconsistent { .. } | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ApiErrorBody {
            error: self.0.to_string(),
        });

        (status, body).into_response()
    }
}

// ==================== OpenAPI Documentation ====================

#[derive(OpenApi)]
#[openapi(
    info(
        title = "blobq API",
        version = "0.1.0",
        description = "blobq - Single-consumer message queue API",
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    paths(
        health,
        enqueue_message,
        next_message,
        queue_stats,
    ),
    components(
        schemas(
            HealthResponse,
            MessageId,
            EnqueueRequest,
            EnqueueResponse,
            NextMessageResponse,
            QueueStats,
            ApiErrorBody,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "messages", description = "Message operations endpoints")
    )
)]
struct ApiDoc;

// ==================== Handlers ====================

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse)
    )
)]
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Append a message to the queue
#[utoipa::path(
    post,
    path = "/messages",
    tag = "messages",
    request_body = EnqueueRequest,
    responses(
        (status = 201, description = "Message stored", body = EnqueueResponse),
        (status = 400, description = "No message content provided", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody)
    )
)]
async fn enqueue_message(
    State(state): State<AppState>,
    payload: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    let Json(req) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected enqueue body");
        Error::InvalidInput(rejection.body_text())
    })?;

    let content = req
        .message_content
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::InvalidInput(NO_CONTENT.to_string()))?;

    let id = state.queue.enqueue(&content).await?;

    Ok((StatusCode::CREATED, Json(EnqueueResponse { id })))
}

/// Remove and return the oldest message
#[utoipa::path(
    get,
    path = "/next_message",
    tag = "messages",
    responses(
        (status = 200, description = "Oldest message", body = NextMessageResponse),
        (status = 404, description = "No messages available", body = ApiErrorBody),
        (status = 500, description = "Message and content out of sync", body = ApiErrorBody)
    )
)]
async fn next_message(
    State(state): State<AppState>,
) -> Result<Json<NextMessageResponse>, AppError> {
    let (id, message) = state.queue.dequeue_next().await?;
    Ok(Json(NextMessageResponse { id, message }))
}

/// Get queue statistics
#[utoipa::path(
    get,
    path = "/stats",
    tag = "messages",
    responses(
        (status = 200, description = "Queue statistics", body = QueueStats)
    )
)]
async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, AppError> {
    let stats = state.queue.stats().await?;
    Ok(Json(stats))
}

// ==================== Router ====================

fn create_router(state: AppState) -> Router {
    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Health
        .route("/health", get(health))
        // Messages
        .route("/messages", post(enqueue_message))
        .route("/next_message", get(next_message))
        .route("/stats", get(queue_stats))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ==================== Main ====================

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "blobq=debug,blobq_core=debug,blobq_storage=debug,tower_http=debug".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = <Config as clap::Parser>::parse();

    // Initialize logging
    init_tracing(config.log_format);

    // Explicit context: both stores are built once and handed to the queue
    let storage_config = config.storage_config()?;
    let blobs = blobq_storage::open_backend(&storage_config).await?;
    let metadata = Arc::new(SqliteMetadataStore::open(&config.database)?);
    let queue = MessageQueue::new(blobs, metadata, config.queue_settings())?;

    // Settle anything a previous run left mid-dequeue
    let report = queue.repair().await?;
    if !report.is_clean() {
        info!(
            released = report.released,
            removed = report.removed,
            failed = report.failed,
            "Startup repair finished"
        );
    }
    let maintenance = queue.start_maintenance(config.repair_interval());

    // Create app state
    let state = AppState { queue };

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;

    info!(storage = %storage_config.kind(), "blobq server listening on {}", addr);
    info!("Swagger UI: http://{}/swagger-ui/", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.abort();
    Ok(())
}

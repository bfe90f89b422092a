//! pulse-api - HTTP ingress and WebSocket fan-out server for classpulse

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use pulse_core::{defaults, LogErrorSink, LogPersistence, PersistenceSink, TelemetryEvent};
use pulse_pipeline::{
    EventProcessor, ProcessorBuilder, ProcessorConfig, QueueDepths, RequestLoggingMiddleware,
    StatsSnapshot, WorkerMetrics,
};
use pulse_registry::{
    ClientType, ConnectOptions, ConnectionRegistry, RegistryConfig, RegistryStats,
};
use pulse_router::EventRouter;

use handlers::{HelpRequestHandler, ProgressHandler, StudentActivityHandler};

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so IDs sort chronologically — useful for
/// log correlation when tracing a batch through the pipeline.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    processor: EventProcessor,
    registry: Arc<ConnectionRegistry>,
    started_at: DateTime<Utc>,
}

/// Wire the router, processor and registry around a persistence sink.
async fn build_state(persistence: Arc<dyn PersistenceSink>) -> AppState {
    let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::from_env()));

    let router = Arc::new(EventRouter::new(
        persistence.clone(),
        Arc::new(LogErrorSink),
    ));
    for event_type in ["cell_executed", "code_completed", "error_occurred"] {
        router
            .register(Arc::new(StudentActivityHandler::new(
                event_type,
                persistence.clone(),
                registry.clone(),
            )))
            .await;
    }
    for event_type in ["progress_update", "status_change", "notebook_saved"] {
        router
            .register(Arc::new(ProgressHandler::new(
                event_type,
                persistence.clone(),
                registry.clone(),
            )))
            .await;
    }
    router
        .register(Arc::new(HelpRequestHandler::new(
            persistence.clone(),
            registry.clone(),
        )))
        .await;

    let processor = ProcessorBuilder::new(router)
        .with_config(ProcessorConfig::from_env())
        .with_middleware(Arc::new(RequestLoggingMiddleware))
        .build();

    AppState {
        processor,
        registry,
        started_at: Utc::now(),
    }
}

fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/events", post(ingest_batch))
        .route("/api/v1/ws", get(ws_handler))
        .route("/api/v1/stats", get(stats))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
        )
        // Batches are capped at 200 events; 4 MB leaves ample payload room
        .layer(RequestBodyLimitLayer::new(4 * 1024 * 1024))
        .with_state(state)
}

// =============================================================================
// INGRESS
// =============================================================================

#[derive(Debug, Serialize)]
struct StageTimings {
    validation_ms: u64,
    enqueue_ms: u64,
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    batch_id: Uuid,
    total_events: usize,
    successful_events: usize,
    failed_events: usize,
    per_stage_timing: StageTimings,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Json<Self> {
        Json(Self { error: msg.into() })
    }
}

/// `POST /api/v1/events` — accept a batch of 1..=200 telemetry events.
///
/// Fire-and-forget: the 202 is returned once every event is classified and
/// enqueued; processing and fan-out happen asynchronously. Oversized batches
/// are rejected whole — nothing is enqueued.
async fn ingest_batch(
    State(state): State<AppState>,
    Json(events): Json<Vec<TelemetryEvent>>,
) -> impl IntoResponse {
    let total_events = events.len();
    if total_events == 0 {
        return (StatusCode::BAD_REQUEST, ApiError::new("empty batch")).into_response();
    }
    if total_events > defaults::MAX_BATCH_SIZE {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::new(format!(
                "batch of {total_events} exceeds maximum of {}",
                defaults::MAX_BATCH_SIZE
            )),
        )
            .into_response();
    }

    let batch_id = Uuid::now_v7();

    let validation_start = Instant::now();
    let (valid, invalid): (Vec<_>, Vec<_>) =
        events.into_iter().partition(|e| e.validate().is_ok());
    let validation_ms = validation_start.elapsed().as_millis() as u64;

    let enqueue_start = Instant::now();
    let outcomes = state.processor.process_batch(valid);
    let enqueue_ms = enqueue_start.elapsed().as_millis() as u64;

    let successful_events = outcomes.iter().filter(|r| r.is_ok()).count();
    let failed_events = invalid.len() + (outcomes.len() - successful_events);

    debug!(
        batch_id = %batch_id,
        total = total_events,
        accepted = successful_events,
        failed = failed_events,
        "batch ingested"
    );

    (
        StatusCode::ACCEPTED,
        Json(BatchResponse {
            batch_id,
            total_events,
            successful_events,
            failed_events,
            per_stage_timing: StageTimings {
                validation_ms,
                enqueue_ms,
            },
        }),
    )
        .into_response()
}

// =============================================================================
// WEBSOCKET
// =============================================================================

#[derive(Debug, Deserialize)]
struct WsParams {
    client_type: String,
    client_id: Option<String>,
    user_id: Option<String>,
    room: Option<String>,
    /// Comma-separated class ids for instructor scoping.
    assigned_classes: Option<String>,
}

/// `GET /api/v1/ws?client_type=student&user_id=...` — upgrade and register.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let client_type: ClientType = match params.client_type.parse() {
        Ok(t) => t,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "type": "auth_error",
                    "error": e.to_string(),
                })),
            )
                .into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_type, params))
        .into_response()
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    client_type: ClientType,
    params: WsParams,
) {
    use futures::{SinkExt, StreamExt};

    let (out_tx, mut out_rx) = mpsc::channel::<String>(defaults::CONNECTION_CHANNEL_BUFFER);

    let mut opts = ConnectOptions::new();
    if let Some(id) = params.client_id {
        opts = opts.with_client_id(id);
    }
    if let Some(user_id) = params.user_id {
        opts = opts.with_subject_id(user_id);
    }
    if let Some(room) = params.room {
        opts = opts.with_room(room);
    }
    if let Some(classes) = params.assigned_classes {
        let assigned: Vec<&str> = classes.split(',').filter(|c| !c.is_empty()).collect();
        opts = opts.with_metadata(serde_json::json!({ "assigned_classes": assigned }));
    }

    let client_id = state.registry.connect(client_type, out_tx, opts).await;
    let (mut sender, mut receiver) = socket.split();

    // Forward registry messages to the socket, pinging to keep it alive
    let send_task = tokio::spawn(async move {
        let mut ping_interval =
            tokio::time::interval(std::time::Duration::from_secs(defaults::WS_PING_INTERVAL_SECS));
        loop {
            tokio::select! {
                frame = out_rx.recv() => {
                    match frame {
                        Some(text) => {
                            if sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        // Registry dropped the connection (replace or cleanup)
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound frames only refresh liveness; close tears down
    let registry = state.registry.clone();
    let recv_client_id = client_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                _ => registry.touch(&recv_client_id).await,
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }
    state.registry.disconnect(&client_id).await;
}

// =============================================================================
// OBSERVABILITY
// =============================================================================

#[derive(Debug, Serialize)]
struct StatsResponse {
    uptime_secs: i64,
    queues: QueueDepths,
    processing: StatsSnapshot,
    active_workers: usize,
    workers: Vec<WorkerMetrics>,
    registry: RegistryStats,
}

/// `GET /api/v1/stats` — queue depths, counters, worker and registry state.
async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        queues: state.processor.queue_depths(),
        processing: state.processor.stats(),
        active_workers: state.processor.active_workers().await,
        workers: state.processor.worker_metrics().await,
        registry: state.registry.stats().await,
    })
}

/// `GET /health` — liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Periodic fan-out of system stats to dashboards plus the stale sweep.
fn spawn_background_tasks(state: AppState) {
    let stats_state = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(
            defaults::SYSTEM_STATS_INTERVAL_SECS,
        ));
        loop {
            tick.tick().await;
            if stats_state
                .registry
                .count_by_type(ClientType::Dashboard)
                .await
                == 0
            {
                continue;
            }
            let depths = stats_state.processor.queue_depths();
            let snapshot = stats_state.processor.stats();
            let message = serde_json::json!({
                "type": "system_stats",
                "queues": depths,
                "processing": snapshot,
                "connections": stats_state.registry.connection_count().await,
                "timestamp": Utc::now().to_rfc3339(),
            });
            let delivered = stats_state
                .registry
                .broadcast_to_type(ClientType::Dashboard, &message)
                .await;
            debug!(delivered, "system stats pushed to dashboards");
        }
    });

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(
            defaults::STALE_SWEEP_INTERVAL_SECS,
        ));
        loop {
            tick.tick().await;
            state.registry.cleanup_stale_connections().await;
        }
    });
}

// =============================================================================
// STARTUP
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "pulse_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pulse_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("pulse-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            } else {
                layer = layer.with_ansi(false); // no ANSI in files
            }
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);

    let state = build_state(Arc::new(LogPersistence)).await;
    state.processor.initialize().await;
    spawn_background_tasks(state.clone());

    let app = build_app(state.clone());
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "shutdown signal listener failed");
            }
            info!("shutdown signal received");
        })
        .await?;

    state.processor.shutdown().await;
    Ok(())
}

// =============================================================================
// INTEGRATION TESTS
// =============================================================================

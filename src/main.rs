mod compose;
mod http;
mod idempotency;
mod jobs;
mod metrics;
mod models;
mod pipeline;
mod shopify;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use models::{
    CreateAuctionResponse, FIELD_IMAGES, FIELD_OFFER_TIER, FIELD_SELLER, FIELD_STARTING_PRICE,
    FIELD_TITLE, ImagePart, SubmissionRequest,
};
use pipeline::{PublishError, PublishErrorKind, Publisher};
use serde::Serialize;
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "subasta.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let publisher = Publisher::from_env();
    let (queue, _worker) = jobs::JobQueue::spawn(publisher.clone());
    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());

    // Surface a bad token in the logs at startup instead of on the first
    // submission. Never fatal.
    {
        let client = publisher.client().clone();
        tokio::spawn(async move {
            match client.verify_credentials().await {
                Ok(()) => info!(target = "subasta.shopify", "access token verified"),
                Err(err) => warn!(
                    target = "subasta.shopify",
                    error = %err,
                    "access token verification failed"
                ),
            }
        });
    }

    let state = AppState {
        publisher,
        queue,
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/create-auction", post(create_auction))
        .nest(
            "/jobs",
            Router::new()
                .route("/auctions", post(enqueue_auction_job))
                .route("/{id}", get(get_job_status)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "subasta.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    publisher: Publisher,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<HashMap<String, CreateAuctionResponse>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "subasta-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::BadRequest("unauthorized".into()));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Subasta API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(25 * 1024 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

/// Publish an auction submission as a blog article.
///
/// - Method: `POST`
/// - Path: `/create-auction`
/// - Body: multipart form — the four Spanish-named text fields plus
///   zero-or-more `images` parts
/// - Response: `{ success, article?, message? }`
async fn create_auction(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    multipart: Multipart,
) -> Result<Json<CreateAuctionResponse>, AppError> {
    crate::metrics::inc_requests("/create-auction");
    let submission = read_submission(multipart).await?;
    info!(
        target = "subasta.api",
        title = %submission.title,
        images = submission.images.len(),
        "auction submission received"
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok(Json(existing));
            }
            let receipt = state.publisher.run(submission).await?;
            let response = CreateAuctionResponse::ok(receipt.article);
            let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(3600);
            idempotency::redis_set(client, &key, &response, ttl).await;
            return Ok(Json(response));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&key).cloned() {
            return Ok(Json(existing));
        }
        let receipt = state.publisher.run(submission).await?;
        let response = CreateAuctionResponse::ok(receipt.article);
        state.idempotency.lock().await.insert(key, response.clone());
        return Ok(Json(response));
    }

    let receipt = state.publisher.run(submission).await?;
    Ok(Json(CreateAuctionResponse::ok(receipt.article)))
}

/// Collect the Spanish-named text fields and `images` binary parts. Missing
/// text fields stay empty; the publisher rejects them before any remote call.
async fn read_submission(mut multipart: Multipart) -> Result<SubmissionRequest, AppError> {
    let mut submission = SubmissionRequest::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(format!("malformed multipart body: {err}")))?
    {
        let Some(name) = field.name().map(|name| name.to_string()) else {
            continue;
        };
        if name == FIELD_IMAGES {
            let file_name = field
                .file_name()
                .map(|value| value.to_string())
                .unwrap_or_else(|| "image".to_string());
            let content_type = field
                .content_type()
                .map(|value| value.to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let bytes = field
                .bytes()
                .await
                .map_err(|err| AppError::BadRequest(format!("failed reading `{file_name}`: {err}")))?
                .to_vec();
            submission.images.push(ImagePart {
                file_name,
                content_type,
                bytes,
            });
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|err| AppError::BadRequest(format!("failed reading `{name}`: {err}")))?;
        match name.as_str() {
            FIELD_TITLE => submission.title = value,
            FIELD_SELLER => submission.seller_name = value,
            FIELD_STARTING_PRICE => submission.starting_price = value,
            FIELD_OFFER_TIER => submission.offer_tier = value,
            _ => {}
        }
    }
    Ok(submission)
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_auction_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/auctions");
    let submission = read_submission(multipart).await?;
    let id = state
        .queue
        .enqueue(submission)
        .await
        .map_err(|err| AppError::Internal(err.error))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::BadRequest("invalid_job_id".into()));
    };
    if let Some(info) = state.queue.get(uuid).await {
        Ok(Json(info))
    } else {
        Err(AppError::BadRequest("not_found".into()))
    }
}

#[derive(Debug)]
enum AppError {
    Publish(PublishError),
    BadRequest(String),
    Internal(String),
}

impl From<PublishError> for AppError {
    fn from(value: PublishError) -> Self {
        Self::Publish(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Publish(err) => {
                error!(
                    target = "subasta.api",
                    stage = err.stage(),
                    error = %err,
                    "submission failed"
                );
                let status = match err.kind() {
                    PublishErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PublishErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = CreateAuctionResponse::error(err.to_string());
                (status, Json(payload)).into_response()
            }
            AppError::BadRequest(message) => {
                let payload = CreateAuctionResponse::error(message);
                (StatusCode::BAD_REQUEST, Json(payload)).into_response()
            }
            AppError::Internal(message) => {
                error!(target = "subasta.api", error = %message, "internal failure");
                let payload = CreateAuctionResponse::error(message);
                (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

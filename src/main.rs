mod ebay;
mod extract;
mod http;
mod llm;
mod market;
mod metrics;
mod models;
mod pipeline;
mod query;
mod refine;
mod security;
mod shelf;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use market::{MarketError, MarketSnapshot};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, IdentifyRequest, IdentifyResponse, QuickValueResponse};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind, Readiness};
use security::{AuthState, require_api_auth};
use serde::Deserialize;
use serde_json::json;
use shelf::{ShelfScanRequest, ShelfScanResponse};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;
const DEFAULT_SEARCH_LIMIT: usize = 10;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "appraisal.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let state = AppState {
        pipeline: Pipeline::from_env(),
        prometheus_handle,
    };
    let readiness = state.pipeline.readiness();
    info!(
        target = "appraisal.api",
        openai = readiness.openai_configured,
        ebay = readiness.ebay_configured,
        market_source = readiness.market_source,
        "pipeline configured"
    );

    let app = build_router(state, AuthState::from_env());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "appraisal.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    prometheus_handle: PrometheusHandle,
}

fn build_router(state: AppState, auth: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/status", get(ai_status))
        .route("/identify", post(identify))
        .route("/quick-value", post(quick_value))
        .route("/ebay-search", get(ebay_search))
        .route("/scan-shelf", post(scan_shelf))
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .nest("/ai", protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

/// Liveness check. Never gated.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "appraisal-api-rs",
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_BODY_LIMIT)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Which upstream services have credentials configured.
///
/// - Method: `GET`
/// - Path: `/ai/status`
async fn ai_status(State(state): State<AppState>) -> Json<Readiness> {
    crate::metrics::inc_requests("/ai/status");
    Json(state.pipeline.readiness())
}

/// Identify an item from a photo and price it against sold listings.
///
/// - Method: `POST`
/// - Path: `/ai/identify`
/// - Auth: `Authorization: Bearer <key>` or `X-Appraisal-Key: <key>` when keys are configured
/// - Body: `IdentifyRequest`
/// - Response: `IdentifyResponse` (estimate, optional market data, per-stage transcript)
async fn identify(
    State(state): State<AppState>,
    Json(payload): Json<IdentifyRequest>,
) -> Result<Json<IdentifyResponse>, AppError> {
    crate::metrics::inc_requests("/ai/identify");
    let request_id = Uuid::new_v4();
    info!(target = "appraisal.api", %request_id, "identify invoked");
    let response = state.pipeline.identify(payload).await.inspect_err(|err| {
        warn!(target = "appraisal.api", %request_id, stage = err.stage(), error = %err, "identify failed");
    })?;
    Ok(Json(response))
}

/// Same flow as `/ai/identify`, trimmed to the price fields.
async fn quick_value(
    State(state): State<AppState>,
    Json(payload): Json<IdentifyRequest>,
) -> Result<Json<QuickValueResponse>, AppError> {
    crate::metrics::inc_requests("/ai/quick-value");
    let response = state.pipeline.identify(payload).await?;
    Ok(Json(response.into()))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default)]
    limit: Option<usize>,
}

/// Run a raw sold-listings search for debugging queries.
///
/// - Method: `GET`
/// - Path: `/ai/ebay-search?q=<query>&limit=<n>`
async fn ebay_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<MarketSnapshot>, AppError> {
    crate::metrics::inc_requests("/ai/ebay-search");
    let query = params.q.trim();
    if query.is_empty() {
        return Err(PipelineError::invalid_input("ebay_search", "query parameter `q` is required").into());
    }
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let snapshot = state.pipeline.search_market(query, limit).await?;
    Ok(Json(snapshot))
}

/// Price every resale candidate visible in a shelf photo.
///
/// - Method: `POST`
/// - Path: `/ai/scan-shelf`
/// - Body: `ShelfScanRequest` (`max_items` defaults to 10)
async fn scan_shelf(
    State(state): State<AppState>,
    Json(payload): Json<ShelfScanRequest>,
) -> Result<Json<ShelfScanResponse>, AppError> {
    crate::metrics::inc_requests("/ai/scan-shelf");
    let request_id = Uuid::new_v4();
    info!(target = "appraisal.api", %request_id, max_items = payload.max_items, "scan-shelf invoked");
    let response = state.pipeline.scan_shelf(payload).await?;
    Ok(Json(response))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Market(MarketError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<MarketError> for AppError {
    fn from(value: MarketError) -> Self {
        Self::Market(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Configuration | PipelineErrorKind::Malformed => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    PipelineErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    PipelineErrorKind::Upstream(code) => StatusCode::from_u16(code)
                        .ok()
                        .filter(|s| s.is_client_error() || s.is_server_error())
                        .unwrap_or(StatusCode::BAD_GATEWAY),
                    PipelineErrorKind::RequestFailed => StatusCode::BAD_GATEWAY,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, payload)
            }
            AppError::Market(err) => {
                let status = match err {
                    MarketError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_GATEWAY,
                };
                let detail = match err {
                    MarketError::NotConfigured => {
                        "eBay API not configured; set EBAY_APP_TOKEN or EBAY_APP_ID and EBAY_CERT_ID"
                            .to_string()
                    }
                    other => other.to_string(),
                };
                let payload = ApiError {
                    error: "ebay_search".to_string(),
                    detail: Some(detail),
                };
                (status, payload)
            }
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebay::{EbayConfig, market_from_config};
    use crate::http::build_client;
    use crate::llm::{OpenAiClient, OpenAiConfig};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Router over real clients with no credentials, so nothing leaves the process.
    fn app(auth: AuthState) -> Router {
        let http = build_client();
        let llm = OpenAiClient::new(
            http.clone(),
            OpenAiConfig {
                base_url: "http://127.0.0.1:9".into(),
                api_key: None,
                vision_model: "gpt-4o".into(),
                refine_model: "gpt-4o-mini".into(),
            },
        );
        let pipeline = Pipeline::new(Arc::new(llm), market_from_config(http, EbayConfig::default()))
            .with_market_source("browse");
        let state = AppState {
            pipeline,
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        };
        build_router(state, auth)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request")
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn health_is_open_even_with_keys() {
        let (status, body) = send(app(AuthState::from_list(Some("booth:k"))), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
    }

    #[tokio::test]
    async fn ai_routes_require_key_when_configured() {
        let (status, body) = send(app(AuthState::from_list(Some("booth:k"))), get_req("/ai/status")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], json!("missing_api_key"));
    }

    #[tokio::test]
    async fn status_reports_missing_credentials() {
        let (status, body) = send(app(AuthState::default()), get_req("/ai/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["openai_configured"], json!(false));
        assert_eq!(body["ebay_configured"], json!(false));
        assert_eq!(body["market_source"], json!("browse"));
        assert_eq!(body["features"]["price_refinement"], json!(false));
    }

    #[tokio::test]
    async fn identify_without_key_is_configuration_error() {
        let (status, body) = send(
            app(AuthState::default()),
            post_json("/ai/identify", json!({"image": "AAAA"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], json!("identify_item"));
        assert!(body["detail"].as_str().unwrap_or_default().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn empty_image_is_bad_request() {
        let (status, body) = send(
            app(AuthState::default()),
            post_json("/ai/scan-shelf", json!({"image": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("resolve_image"));
    }

    #[tokio::test]
    async fn ebay_search_without_credentials_is_500() {
        let (status, body) = send(
            app(AuthState::default()),
            get_req("/ai/ebay-search?q=pyrex+bowl"),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], json!("ebay_search"));
    }

    #[tokio::test]
    async fn ebay_search_requires_query() {
        let (status, _) = send(app(AuthState::default()), get_req("/ai/ebay-search")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_status_is_forwarded_when_it_is_an_error() {
        let err = PipelineError::from_llm(
            "identify_item",
            crate::llm::LlmError::Status {
                status: 429,
                message: "slow down".into(),
            },
        );
        assert_eq!(
            AppError::from(err).into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        let odd = PipelineError::from_llm(
            "identify_item",
            crate::llm::LlmError::Status {
                status: 302,
                message: "moved".into(),
            },
        );
        assert_eq!(
            AppError::from(odd).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }
}

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};

use fleetlog_core::documents::{DocumentStore, PutOutcome};
use fleetlog_core::remote::{RemoteDocument, WritePrecondition};

const BODY_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<DocumentStore>>,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_updated_at_millis: Option<i64>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
            current_updated_at_millis: None,
        }
    }
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    PreconditionFailed(Option<i64>),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse::new(msg)),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg)),
            Self::PreconditionFailed(current) => (
                StatusCode::PRECONDITION_FAILED,
                ErrorResponse {
                    error: "Replica changed since it was read".to_string(),
                    current_updated_at_millis: current,
                },
            ),
            Self::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Invalid or missing API key")),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

fn validate_user_id(user_id: &str) -> Result<(), ApiError> {
    if user_id.trim().is_empty() || user_id.len() > 128 {
        return Err(ApiError::BadRequest("Invalid user id".to_string()));
    }
    Ok(())
}

/// `If-Match: <millis>` or `If-None-Match: *`; neither means unconditional.
fn write_precondition(headers: &HeaderMap) -> Result<WritePrecondition, ApiError> {
    if let Some(value) = headers.get(header::IF_MATCH) {
        let millis = value
            .to_str()
            .ok()
            .map(|v| v.trim().trim_matches('"'))
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| {
                ApiError::BadRequest("If-Match must carry an updatedAtMillis value".to_string())
            })?;
        return Ok(WritePrecondition::UpdatedAt(millis));
    }
    if let Some(value) = headers.get(header::IF_NONE_MATCH) {
        if value.as_bytes() == b"*" {
            return Ok(WritePrecondition::Absent);
        }
        return Err(ApiError::BadRequest(
            "Only If-None-Match: * is supported".to_string(),
        ));
    }
    Ok(WritePrecondition::Any)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_replica(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    validate_user_id(&user_id)?;
    let stored = {
        let store = state.store.lock().unwrap_or_else(PoisonError::into_inner);
        store.get(&user_id).context("document store error")?
    };
    let stored =
        stored.ok_or_else(|| ApiError::NotFound(format!("No replica stored for '{user_id}'")))?;
    debug!(
        user = %user_id,
        updated_at = stored.updated_at_millis,
        stored_at = %stored.stored_at,
        "serving replica"
    );

    let etag = HeaderValue::from_str(&format!("\"{}\"", stored.updated_at_millis))
        .context("invalid etag")?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::ETAG, etag),
        ],
        stored.body,
    )
        .into_response())
}

async fn put_replica(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(document): Json<RemoteDocument>,
) -> Result<StatusCode, ApiError> {
    validate_user_id(&user_id)?;
    let precondition = write_precondition(&headers)?;
    let outcome = {
        let store = state.store.lock().unwrap_or_else(PoisonError::into_inner);
        store
            .put(&user_id, &document, precondition)
            .context("document store error")?
    };
    match outcome {
        PutOutcome::Stored => {
            info!(
                user = %user_id,
                updated_at = document.updated_at_millis,
                "replica stored"
            );
            Ok(StatusCode::NO_CONTENT)
        }
        PutOutcome::PreconditionFailed { current } => {
            warn!(user = %user_id, ?precondition, ?current, "replica write rejected");
            Err(ApiError::PreconditionFailed(current))
        }
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/replicas/{user_id}", get(get_replica).put(put_replica))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

pub(crate) fn router(store: DocumentStore, api_key: Option<String>) -> Router {
    build_router(AppState {
        store: Arc::new(Mutex::new(store)),
        api_key,
    })
}

// --- Server startup ---

pub async fn start_server(
    store: DocumentStore,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {}...{} (see api_key file in data directory)",
            &key[..4.min(key.len())],
            &key[key.len().saturating_sub(4)..],
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). Replicas are open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        warn!(bind, "listening on a non-loopback address with no authentication");
    }

    let replicas = store.count()?;
    let app = router(store, api_key);
    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("Failed to bind {bind}:{port}"))?;
    info!(bind, port, replicas, "replica server listening");
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app(api_key: Option<String>) -> Router {
        router(DocumentStore::open_in_memory().unwrap(), api_key)
    }

    fn document_json(updated_at: i64) -> String {
        serde_json::json!({
            "schemaVersion": 2,
            "updatedAtMillis": updated_at,
            "vehicles": [{"id": 1, "name": "Civic", "type": "CAR"}],
            "odometerRecords": [],
            "fuelRecords": []
        })
        .to_string()
    }

    fn put(uri: &str) -> axum::http::request::Builder {
        axum::http::Request::put(uri).header("content-type", "application/json")
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn auth_missing_key_returns_401() {
        let app = test_app(Some("test-key-abc123".to_string()));

        let response = app
            .oneshot(
                axum::http::Request::get("/v1/replicas/u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid or missing API key");
    }

    #[tokio::test]
    async fn auth_correct_key_reaches_handler() {
        let app = test_app(Some("test-key-abc123".to_string()));

        let response = app
            .oneshot(
                axum::http::Request::get("/v1/replicas/u1")
                    .header("Authorization", "Bearer test-key-abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_does_not_require_auth() {
        let app = test_app(Some("secret".to_string()));

        let response = app
            .oneshot(
                axum::http::Request::get("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn security_headers_on_auth_failure() {
        let app = test_app(Some("secret".to_string()));

        let response = app
            .oneshot(
                axum::http::Request::get("/v1/replicas/u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let app = test_app(None);

        let response = app
            .clone()
            .oneshot(
                put("/v1/replicas/u1")
                    .body(Body::from(document_json(42)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                axum::http::Request::get("/v1/replicas/u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("etag").unwrap(), "\"42\"");
        let json = body_json(response).await;
        assert_eq!(json["updatedAtMillis"], 42);
        assert_eq!(json["vehicles"][0]["name"], "Civic");
        assert!(json["maintenanceRecords"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn if_none_match_rejects_existing_document() {
        let app = test_app(None);

        for expected in [StatusCode::NO_CONTENT, StatusCode::PRECONDITION_FAILED] {
            let response = app
                .clone()
                .oneshot(
                    put("/v1/replicas/u1")
                        .header("If-None-Match", "*")
                        .body(Body::from(document_json(7)))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn if_match_mismatch_reports_current_marker() {
        let app = test_app(None);

        app.clone()
            .oneshot(
                put("/v1/replicas/u1")
                    .body(Body::from(document_json(100)))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                put("/v1/replicas/u1")
                    .header("If-Match", "\"99\"")
                    .body(Body::from(document_json(200)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        let json = body_json(response).await;
        assert_eq!(json["currentUpdatedAtMillis"], 100);

        let response = app
            .oneshot(
                put("/v1/replicas/u1")
                    .header("If-Match", "100")
                    .body(Body::from(document_json(200)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn malformed_if_match_is_bad_request() {
        let app = test_app(None);

        let response = app
            .oneshot(
                put("/v1/replicas/u1")
                    .header("If-Match", "yesterday")
                    .body(Body::from(document_json(1)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = test_app(None);

        let big_body = vec![b' '; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                put("/v1/replicas/u1")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error =
            ApiError::Internal(anyhow::anyhow!("secret path /home/user/.fleetlog/server.db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Internal server error");
        assert!(!json["error"].as_str().unwrap().contains("secret"));
    }
}

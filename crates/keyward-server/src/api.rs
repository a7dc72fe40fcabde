//! HTTP routes.
//!
//! | Method | Path       | Body                      |
//! |--------|------------|---------------------------|
//! | GET    | `/`        | welcome page              |
//! | GET    | `/v1/ping` | `{"status":"ok"}`         |
//! | POST   | `/v1/sign` | `{"certificate": "..."}`  |
//! | GET    | `/v1/ca`   | `{"public_key": "..."}`   |
//!
//! Errors are `{"error": "..."}` with a 400, 401, 500 or 503 status. A
//! request that outlives [`REQUEST_TIMEOUT`] or panics gets a JSON 500.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderName, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use keyward_core::{IssueError, Issuer, SignRequest};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info_span, warn};

/// Upper bound for a whole request, backend calls included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const REQUEST_ID_HEADER: &str = "x-request-id";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>keyward</title></head>
<body>
<h1>keyward</h1>
<p>Short-lived SSH user certificates. Use the <code>keyward</code> client to request one.</p>
<p>CA public key: <a href="/v1/ca">/v1/ca</a></p>
</body>
</html>
"#;

#[derive(Clone)]
pub struct AppState {
    issuer: Arc<Issuer>,
    shutdown: CancellationToken,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(issuer: Arc<Issuer>, shutdown: CancellationToken) -> Self {
        Self {
            issuer,
            shutdown,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignResponse {
    pub certificate: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaResponse {
    pub public_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unreadable request body: {0}")]
    Body(#[from] JsonRejection),

    #[error(transparent)]
    Issue(#[from] IssueError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("handler panicked: {0}")]
    Panic(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Body(rejection) => {
                debug!(error = %rejection, "rejected request body");
                (StatusCode::BAD_REQUEST, "missing field(s) in signing request")
            }
            ApiError::Issue(err) => (err.status(), err.public_message()),
            ApiError::Timeout(_) => (StatusCode::INTERNAL_SERVER_ERROR, "request timed out"),
            ApiError::Panic(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error"),
        };
        let body = Json(ErrorBody {
            error: message.to_string(),
        });
        (status, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/", get(index))
        .route("/v1/ping", get(ping))
        .route("/v1/sign", post(sign))
        .route("/v1/ca", get(ca))
        .layer(middleware::from_fn_with_state(state.clone(), enforce_deadline))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                    let id = req
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    info_span!(
                        "request",
                        method = %req.method(),
                        path = %req.uri().path(),
                        request_id = %id,
                    )
                }))
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(CatchPanicLayer::custom(handle_panic)),
        )
}

/// Dropping the handler future aborts whatever backend call it was waiting on.
async fn enforce_deadline(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    match tokio::time::timeout(state.request_timeout, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(%path, timeout = ?state.request_timeout, "request timed out");
            ApiError::Timeout(state.request_timeout).into_response()
        }
    }
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    error!(panic = %message, "request handler panicked");
    ApiError::Panic(message).into_response()
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn sign(
    State(state): State<AppState>,
    payload: Result<Json<SignRequest>, JsonRejection>,
) -> Result<Json<SignResponse>, ApiError> {
    let Json(request) = payload?;
    let issued = state
        .issuer
        .issue_with_cancel(request, &state.shutdown)
        .await?;
    Ok(Json(SignResponse {
        certificate: issued.certificate,
    }))
}

async fn ca(State(state): State<AppState>) -> Result<Json<CaResponse>, ApiError> {
    let public_key = state.issuer.ca_public_key().await?;
    Ok(Json(CaResponse { public_key }))
}

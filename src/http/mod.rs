//! HTTP boundary.
//!
//! `POST /submit` takes the inquiry form as JSON and answers once both sends
//! have finished. `OPTIONS /submit` answers CORS preflights.

use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

use crate::delivery::DeliveryOrchestrator;
use crate::errors::RequestError;
use crate::types::{InquiryForm, InquiryRecord};

const DELIVERY_FAILED: &str = "Email delivery failed";

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    orchestrator: Arc<DeliveryOrchestrator>,
    allowed_origins: Arc<HashSet<String>>,
}

impl AppState {
    /// Creates handler state.
    pub fn new(
        orchestrator: DeliveryOrchestrator,
        allowed_origins: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            allowed_origins: Arc::new(allowed_origins.into_iter().collect()),
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/submit", post(submit).options(preflight))
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

/// Serves the router on a bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}

/// Decodes a request body into a validated inquiry.
///
/// The document must be a JSON object. A `null` document is treated like an
/// empty form.
pub fn parse_inquiry(body: &[u8]) -> Result<InquiryRecord, RequestError> {
    let root: Option<Map<String, Value>> =
        serde_json::from_slice(body).map_err(RequestError::InvalidBody)?;
    let form = match root {
        Some(fields) => serde_json::from_value::<InquiryForm>(Value::Object(fields))
            .map_err(RequestError::InvalidBody)?,
        None => InquiryForm::default(),
    };
    InquiryRecord::try_from(form)
}

async fn submit(State(state): State<AppState>, body: Bytes) -> Response {
    let record = match parse_inquiry(&body) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(error = %e, "rejected inquiry");
            return json_error(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    // Runs detached so a client that hangs up cannot cancel a send midway.
    let orchestrator = Arc::clone(&state.orchestrator);
    let delivery = tokio::spawn(async move { orchestrator.submit(&record).await });

    match delivery.await {
        Ok(result) if result.is_success() => {
            (StatusCode::OK, Json(json!({ "status": "success" }))).into_response()
        }
        Ok(_) => json_error(StatusCode::INTERNAL_SERVER_ERROR, DELIVERY_FAILED),
        Err(e) => {
            tracing::error!(error = %e, "delivery task failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, DELIVERY_FAILED)
        }
    }
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();
    let mut response = next.run(request).await;
    apply_cors(response.headers_mut(), origin, &state.allowed_origins);
    response
}

fn apply_cors(headers: &mut HeaderMap, origin: Option<HeaderValue>, allowed: &HashSet<String>) {
    if let Some(origin) = origin {
        let permitted = origin
            .to_str()
            .map(|o| allowed.contains(o))
            .unwrap_or(false);
        if permitted {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

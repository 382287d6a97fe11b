//! HTTP front end
//!
//! `GET /get_proxy` (and the legacy `/cgi-bin/get_proxy`) runs the workflow
//! and returns the proxy as an attachment. Failures return a short HTML page
//! with the failure category in `X-Certcache-Status`.

use crate::error::{CertcacheError, CertcacheResult, FailureKind};
use crate::proxy::ProxyManager;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Header carrying the failure category
pub const STATUS_HEADER: HeaderName = HeaderName::from_static("x-certcache-status");

const FAILURE_PAGE: &str = "<p>grid-proxy-init failed</p>";

/// Router with the proxy routes
pub fn router(manager: Arc<ProxyManager>) -> Router {
    Router::new()
        .route("/get_proxy", get(get_proxy))
        .route("/cgi-bin/get_proxy", get(get_proxy))
        .with_state(manager)
}

/// Bind `addr` and serve until Ctrl-C
pub async fn serve(addr: &str, manager: Arc<ProxyManager>) -> CertcacheResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| CertcacheError::io(format!("binding {}", addr), e))?;
    serve_on(listener, manager).await
}

/// Serve on an already bound listener until Ctrl-C
pub async fn serve_on(listener: TcpListener, manager: Arc<ProxyManager>) -> CertcacheResult<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "Starting HTTP server");
    }

    axum::serve(listener, router(manager))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Shutdown listener failed");
            }
        })
        .await
        .map_err(|e| CertcacheError::io("serving HTTP", e))?;

    info!("HTTP server stopped");
    Ok(())
}

async fn get_proxy(State(manager): State<Arc<ProxyManager>>) -> Response {
    info!("Proxy requested");
    match fetch_proxy(&manager).await {
        Ok(body) => proxy_response(body),
        Err(e) => {
            error!(kind = e.failure_kind().as_str(), "Proxy request failed: {}", e);
            failure_response(&e)
        }
    }
}

async fn fetch_proxy(manager: &ProxyManager) -> CertcacheResult<Vec<u8>> {
    let path = manager.generate_proxy().await?;
    tokio::fs::read(&path)
        .await
        .map_err(|e| CertcacheError::io(format!("reading {}", path.display()), e))
}

fn proxy_response(body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"userproxy.pem\""),
        ],
        body,
    )
        .into_response()
}

/// HTTP status for a failed request
pub fn status_for(err: &CertcacheError) -> StatusCode {
    match err.failure_kind() {
        FailureKind::Auth if err.is_transient() => StatusCode::BAD_GATEWAY,
        FailureKind::Auth => StatusCode::UNAUTHORIZED,
        FailureKind::Tts => StatusCode::BAD_GATEWAY,
        FailureKind::Generator | FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        FailureKind::Cache => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Failure page for `err`
pub fn failure_response(err: &CertcacheError) -> Response {
    let kind = HeaderValue::from_static(err.failure_kind().as_str());
    (
        status_for(err),
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/html")),
            (STATUS_HEADER, kind),
        ],
        FAILURE_PAGE,
    )
        .into_response()
}

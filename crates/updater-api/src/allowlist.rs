use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::state::AppState;

/// Axum middleware restricting clients to loopback plus the explicitly
/// allowed addresses (the Core container's IP, an optional bridge IP).
///
/// Applied to all routes; the control plane has no public endpoints.
pub async fn require_allowed_ip(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if state.is_allowed(addr.ip()) {
        next.run(request).await
    } else {
        warn!(client = %addr, "rejected request from disallowed address");
        (StatusCode::FORBIDDEN, "Forbidden\n").into_response()
    }
}

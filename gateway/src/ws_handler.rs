use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::auth::AuthenticatedUser;
use crate::config::Config;
use crate::session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session_manager: Arc<SessionManager>,
}

/// Upgrades `/ws` to a WebSocket. Rejects with `403` on an origin mismatch
/// and (via the `AuthenticatedUser` extractor's own rejection) with `401`
/// when the request carries no authenticated user context.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    user: AuthenticatedUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if origin != state.config.frontend_origin {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    ws.max_message_size(512)
        .on_upgrade(move |socket| async move {
            state.session_manager.accept(user.0, socket).await;
        })
        .into_response()
}

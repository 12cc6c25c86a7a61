use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// Browsers cannot set headers on an upgrade, so the token rides in `?token=JWT`.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid
/// 4004 = token subject has no synced user
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;
const CLOSE_UNKNOWN_USER: u16 = 4004;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter and resolves
/// the token subject to a stored user, whose id becomes the connection's
/// verified identity. On failure, upgrades then immediately closes with the
/// matching close code.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match jwt::validate_access_token(&state.jwt_secret, &params.token) {
        Ok(claims) => claims,
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            tracing::warn!(close_code, reason, "WebSocket auth failed");
            return ws.on_upgrade(move |socket| close_with(socket, close_code, reason));
        }
    };

    match state.store.find_user_by_external_id(&claims.sub).await {
        Ok(Some(user)) => {
            tracing::info!(
                user_id = %user.id,
                external_id = %claims.sub,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user.id))
        }
        Ok(None) => {
            tracing::warn!(external_id = %claims.sub, "WebSocket token for unsynced user");
            ws.on_upgrade(|socket| close_with(socket, CLOSE_UNKNOWN_USER, "Unknown user"))
        }
        Err(e) => {
            tracing::error!(error = %e, "User lookup failed during WebSocket upgrade");
            ws.on_upgrade(|socket| close_with(socket, CLOSE_INTERNAL_ERROR, "Internal error"))
        }
    }
}

/// Send a close frame with `code` and drop the socket.
async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let close_frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}

use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::JwtSecret;
use crate::chat::{messages, presence, users};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on the REST send path: burst of 20, refilled at 1 per second per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let send_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(1)
            .burst_size(20)
            .finish()
            .expect("Failed to build governor config"),
    );
    let send_limiter = send_governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            send_limiter.retain_recent();
        }
    });

    let send_routes = Router::new()
        .route(
            "/api/v1/messages",
            axum::routing::post(messages::send_message),
        )
        .layer(GovernorLayer {
            config: send_governor_config,
        });

    // Authenticated routes (JWT required, Claims extractor validates token)
    let authenticated_routes = Router::new()
        .route("/api/v1/users/sync", axum::routing::post(users::sync_user))
        .route("/api/v1/users", axum::routing::get(users::list_users))
        .route(
            "/api/v1/users/online",
            axum::routing::get(presence::get_online_status),
        )
        .route(
            "/api/v1/messages",
            axum::routing::get(messages::get_conversation),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(send_routes)
        .merge(authenticated_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

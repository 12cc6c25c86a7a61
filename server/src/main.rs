mod auth;
mod chat;
mod config;
mod db;
mod error;
mod routes;
mod state;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use config::{generate_config_template, Config};
use ws::router::{spawn_router, RouterOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("chatline_server=info"))?;
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .init();
    }

    tracing::info!(
        "Chatline server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let db = db::init_db(&config.data_dir)?;
    let store: Arc<dyn db::MessageStore> = Arc::new(db::SqliteStore::new(db));

    // HS256 secret shared with the identity provider
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let relay = config.relay();
    let presence = config.presence();
    let ws_config = config.ws();

    // Single task owning sessions and presence
    let router = spawn_router(
        store.clone(),
        RouterOptions {
            max_content_chars: relay.max_content_chars,
            legacy_presence_events: presence.legacy_events,
        },
    );

    let app_state = state::AppState {
        store,
        router,
        jwt_secret,
        max_content_chars: relay.max_content_chars,
        ws: state::WsTimings {
            ping_interval: ws_config.ping_interval(),
            pong_timeout: ws_config.pong_timeout(),
        },
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

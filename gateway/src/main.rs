use std::sync::Arc;

use axum::routing::get;
use axum::Router as AxumRouter;
use spdlog::prelude::{error, info};

use gateway::config::Config;
use gateway::engine::Engine;
use gateway::session::SessionManager;
use gateway::logging;
use gateway::ws_handler::{ws_upgrade, AppState};

#[tokio::main]
async fn main() {
    let config = Arc::new(Config::from_env());
    logging::init(&config.log_level);

    info!("starting realtime gateway");
    info!("upstream engine address: {}", config.tcp_server_addr);
    info!("http bind address: {}", config.http_addr);

    let engine = Engine::new(config.tcp_server_addr);
    tokio::spawn(async move {
        if let Err(err) = engine.listen().await {
            error!("tcp engine failed to start: {}", err);
            std::process::exit(1);
        }
    });

    let session_manager = SessionManager::new(&config);
    let state = AppState {
        config: config.clone(),
        session_manager,
    };

    // The real deployment inserts the auth middleware (out of scope here)
    // ahead of this router; it must populate `auth::AuthenticatedUser` as a
    // request extension before a request reaches `/ws`.
    let app = AxumRouter::new().route("/ws", get(ws_upgrade)).with_state(state);

    let listener = match tokio::net::TcpListener::bind(config.http_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind http port {}: {}", config.http_addr, err);
            std::process::exit(1);
        }
    };

    if let Err(err) = axum::serve(listener, app).await {
        error!("http server exited with error: {}", err);
        std::process::exit(1);
    }
}

//! parley server: a single-endpoint chat relay over websockets.
//!
//! Clients connect to `GET /ws?username=<id>`; every connected client
//! receives the envelope stream (chat messages, join/leave notifications,
//! online-users snapshots, typing updates) produced by the [`hub::Hub`].

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

pub mod config;
pub mod hub;
pub mod state;
pub mod ws;

pub use config::Config;
pub use state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

//! parley server binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parley_server::{app, AppState, Config};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let state = AppState::new();

    let hub = state.hub.clone();
    tokio::spawn(async move { hub.flush_typing().await });

    tracing::info!("starting server on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await.unwrap();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .unwrap();
}

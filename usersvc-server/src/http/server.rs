//! Axum setup and router configuration

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::http::{middleware, routes};
use crate::state::AppContext;

/// State shared by the HTTP handlers
pub struct HttpState {
    pub ctx: AppContext,
    pub client: reqwest::Client,
    pub hello_upstream: String,
}

/// Create the Axum router with all routes
pub fn build_router(ctx: AppContext, config: &ServerConfig) -> Router {
    let state = Arc::new(HttpState {
        ctx,
        client: reqwest::Client::new(),
        hello_upstream: config.hello_upstream.clone(),
    });

    Router::new()
        // Health
        .route("/health", get(routes::health_check))
        // Users
        .route("/users", post(routes::create_user))
        .route("/users/", post(routes::create_user))
        .route("/users/{id}", get(routes::get_user))
        // Passthrough
        .route("/hello", get(routes::hello))
        .with_state(state)
        .layer(TimeoutLayer::new(config.request_timeout))
        // Outermost, so timeouts are timed and logged too
        .layer(axum::middleware::from_fn(middleware::log_timing))
}

/// Serve `app` on an already bound listener until `shutdown` resolves, then
/// wait for in-flight requests.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on http://{}", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

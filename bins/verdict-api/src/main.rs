mod handlers;
mod metrics;
mod routes;

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use verdict_engine::ExecutionEngine;

pub struct AppState {
    pub engine: ExecutionEngine,
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber
    let json_logs = std::env::var("VERDICT_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }

    info!("Verdict API booting...");

    let engine = ExecutionEngine::from_env().expect("Failed to initialize execution engine");
    let state = Arc::new(AppState { engine });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let addr = std::env::var("VERDICT_API_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await.expect("Server error");
}

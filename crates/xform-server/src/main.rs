//! # xform-server: HTTP Service for the xform Optimizer
//!
//! Accepts a table catalog plus a logical plan tree as JSON, runs memo exploration
//! with the built-in rules and returns the cheapest plan.
//!
//! ```text
//! client
//!   |
//!   | HTTP POST /optimize (JSON tables + plan)
//!   v
//! xform-server (this binary)
//!   |
//!   +-> plan_json (build catalog, intern plan into a fresh memo)
//!   +-> CascadesSearch (normalize + explore, then plan selection)
//!   |
//!   | HTTP response (JSON plan, cost, exploration counters)
//!   v
//! client
//! ```
//!
//! ## Endpoints
//!
//! - `GET  /health`   - Health check
//! - `GET  /rules`    - List the loaded rules and their phase
//! - `POST /optimize` - Optimize a JSON plan
//!
//! ## Configuration
//!
//! See [`state::OptimizerConfig`] for the `XFORM_*` environment variables. Logging
//! is controlled by `RUST_LOG` (defaults to `xform=debug`).

mod plan_json;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("xform=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = state::OptimizerConfig::from_env();
    let addr = config.listen_addr.clone();
    let state = match state::AppState::new(config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!(error = %e, "failed to load rules");
            std::process::exit(1);
        }
    };
    info!(rules = state.rule_table.len(), "rule table loaded");

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/rules", get(routes::list_rules))
        .route("/optimize", post(routes::optimize))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!("xform-server listening on http://{addr}");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server stopped");
    }
}

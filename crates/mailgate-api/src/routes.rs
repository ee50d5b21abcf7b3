//! API routes

use axum::{
    routing::{get, post},
    Router,
};
use mailgate_core::WatcherHub;
use mailgate_store::{AccountRepository, KvClient};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, health, messages, send, watch};

/// Application state shared across handlers
pub struct AppState {
    pub accounts: Arc<dyn AccountRepository>,
    pub kv: Arc<KvClient>,
    pub hub: Arc<WatcherHub>,
    /// Interval between ping frames on push streams
    pub heartbeat: Duration,
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Health check routes (no tenant data involved)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Mailbox account routes
    let account_routes = Router::new()
        .route(
            "/",
            post(accounts::create_account).get(accounts::list_accounts),
        )
        .route(
            "/:id",
            get(accounts::get_account)
                .put(accounts::update_account)
                .delete(accounts::delete_account),
        )
        .route("/:id/test", post(accounts::test_account))
        .route("/:id/send", post(send::send_message))
        .route("/:id/messages", get(messages::list_messages))
        .route("/:id/messages/:uid", get(messages::get_message))
        .route("/:id/watch/start", post(watch::watch_start))
        .route("/:id/watch/stop", post(watch::watch_stop))
        .route("/:id/stream", get(watch::stream))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/mailbox/accounts", account_routes)
        .layer(TraceLayer::new_for_http())
}

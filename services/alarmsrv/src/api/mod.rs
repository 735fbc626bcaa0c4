//! HTTP API
//!
//! Thin layer over the subsystem: command handlers enqueue a request through
//! the place's actor and await its outcome on a oneshot, so the HTTP surface
//! never touches subsystem state directly. Reads (status, incident, call
//! tree) go straight to the stores.

mod handlers;

use crate::AppState;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/places/{place}", post(handlers::register_place))
        .route("/api/places/{place}/alarm", get(handlers::status))
        .route("/api/places/{place}/alarm/arm", post(handlers::arm))
        .route(
            "/api/places/{place}/alarm/arm-bypassed",
            post(handlers::arm_bypassed),
        )
        .route("/api/places/{place}/alarm/disarm", post(handlers::disarm))
        .route("/api/places/{place}/alarm/panic", post(handlers::panic))
        .route("/api/places/{place}/alarm/cancel", post(handlers::cancel))
        .route(
            "/api/places/{place}/alarm/incident",
            get(handlers::incident),
        )
        .route(
            "/api/places/{place}/alarm/calltree",
            get(handlers::call_tree),
        )
        .route(
            "/api/places/{place}/devices/{address}",
            put(handlers::update_device),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

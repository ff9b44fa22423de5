pub mod auth;
pub mod config;
pub mod frames;
pub mod models;
pub mod policy;
pub mod presence;
pub mod routes;
pub mod sessions;
pub mod state;
pub mod store;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

use crate::state::SharedState;

/// Assemble the full HTTP surface: `/api` REST, the WebSocket upgrade
/// at `/`, and the SPA fallback for everything else.
pub fn build_router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/login", post(routes::login::login))
        .route("/devices", get(routes::devices::list_devices))
        .route("/logs", get(routes::logs::list_logs))
        .route("/device-aliases", get(routes::aliases::list_aliases))
        .route("/device-aliases/{id}", put(routes::aliases::put_alias))
        .route("/compliance/events", get(routes::compliance::list_events))
        .route("/devices/{id}/frame", get(routes::stream::frame))
        .route("/devices/{id}/mjpeg", get(routes::stream::mjpeg))
        .route("/health", get(routes::health::health))
        .fallback(routes::api_not_found)
        .layer(middleware::from_fn(routes::no_store));

    let static_dir = state.config.static_dir.clone();
    let index = std::path::Path::new(&static_dir).join("index.html");

    Router::new()
        .nest("/api", api)
        .route("/", get(routes::ws::root_entry))
        .fallback_service(ServeDir::new(&static_dir).fallback(ServeFile::new(index)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

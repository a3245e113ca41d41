// Route definitions

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::AppState;

mod cars;
mod listing;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        // Listing sessions
        .route("/sessions", post(listing::create_session))
        .route("/sessions/:id", get(listing::get_session).delete(listing::delete_session))
        .route("/sessions/:id/search", post(listing::search))
        .route("/sessions/:id/filters/toggle", post(listing::toggle_filter))
        .route("/sessions/:id/filters/apply", post(listing::apply_filters))
        .route("/sessions/:id/filters/reset", post(listing::reset_filters))
        .route("/sessions/:id/more", post(listing::load_more))
        .route("/sessions/:id/refresh", post(listing::refresh))
        .route("/sessions/:id/connectivity", post(listing::report_connectivity))
        // Car detail actions (require a signed-in buyer)
        .route("/cars/:id/like", post(cars::toggle_like))
        .route("/cars/:id/chat", post(cars::start_chat))
        .with_state(app_state);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_router)
        .layer(TraceLayer::new_for_http())
}

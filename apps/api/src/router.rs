use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use shared_config::AppConfig;
use video_call_cell::router::video_call_routes;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Consultation call API is running!" }))
        .nest("/calls", video_call_routes(state))
}

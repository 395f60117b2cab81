// libs/video-call-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::*;

/// Signal relay and consultation status routes for the call flow.
pub fn video_call_routes(state: Arc<AppConfig>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(call_health_check));

    let protected_routes = Router::new()
        // Consultation status
        .route("/consultations/{consultation_id}", get(get_consultation))
        .route("/consultations/{consultation_id}/status", patch(update_consultation_status))
        .route("/consultations/{consultation_id}/call", post(initiate_call))
        .route("/consultations/{consultation_id}/participants", get(get_call_participants))

        // Signal relay
        .route(
            "/consultations/{consultation_id}/signals",
            post(send_signal).get(get_signals),
        )

        .route("/ice-servers", get(get_ice_servers))

        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

// libs/video-call-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::coordinator::transport::TransportConfig;
use crate::models::{SendSignalRequest, UpdateConsultationStatusRequest, VideoCallError};
use crate::services::SignalingService;

fn to_app_error(err: VideoCallError) -> AppError {
    match err {
        VideoCallError::ConsultationNotFound => {
            AppError::NotFound("Consultation not found".to_string())
        }
        VideoCallError::Unauthorized => {
            AppError::Forbidden("Not a participant of this consultation".to_string())
        }
        VideoCallError::ValidationError { message } => AppError::BadRequest(message),
        VideoCallError::DatabaseError { message } => AppError::Database(message),
        other => AppError::Internal(other.to_string()),
    }
}

// ==============================================================================
// HEALTH
// ==============================================================================

pub async fn call_health_check(State(state): State<Arc<AppConfig>>) -> Json<Value> {
    Json(json!({
        "status": if state.is_configured() { "healthy" } else { "not_configured" },
        "service": "video-call-cell",
        "signaling_configured": state.is_configured(),
        "ice_servers": state.ice_server_urls.len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

// ==============================================================================
// CONSULTATION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_consultation(
    State(state): State<Arc<AppConfig>>,
    Path(consultation_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = SignalingService::new(&state);

    let role = service
        .participant_role(consultation_id, &user, token)
        .await
        .map_err(to_app_error)?;

    let consultation = service
        .get_consultation(consultation_id, token)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "consultation": consultation,
        "role": role
    })))
}

/// Patch the consultation status (e.g. `completed` when a call ends).
#[axum::debug_handler]
pub async fn update_consultation_status(
    State(state): State<Arc<AppConfig>>,
    Path(consultation_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateConsultationStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = SignalingService::new(&state);

    let consultation = service
        .update_consultation_status(consultation_id, request.status, request.notes, &user, token)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation
    })))
}

/// Mark the consultation `in_progress` and stamp a new call attempt.
#[axum::debug_handler]
pub async fn initiate_call(
    State(state): State<Arc<AppConfig>>,
    Path(consultation_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = SignalingService::new(&state);

    let response = service
        .initiate_call(consultation_id, &user, token)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!(response)))
}

#[axum::debug_handler]
pub async fn get_call_participants(
    State(state): State<Arc<AppConfig>>,
    Path(consultation_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = SignalingService::new(&state);

    let participants = service
        .get_call_participants(consultation_id, token)
        .await
        .map_err(to_app_error)?;

    let role = participants.role_of(&user.id).ok_or_else(|| {
        AppError::Forbidden("Not a participant of this consultation".to_string())
    })?;

    Ok(Json(json!({
        "patient": participants.patient,
        "doctor": participants.doctor,
        "role": role
    })))
}

// ==============================================================================
// SIGNAL RELAY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn send_signal(
    State(state): State<Arc<AppConfig>>,
    Path(consultation_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<SendSignalRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = SignalingService::new(&state);

    let message = service
        .send_signal(consultation_id, request, &user, token)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "signal": message
    })))
}

#[axum::debug_handler]
pub async fn get_signals(
    State(state): State<Arc<AppConfig>>,
    Path(consultation_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = SignalingService::new(&state);

    let signals = service
        .get_signals(consultation_id, &user, token)
        .await
        .map_err(to_app_error)?;

    debug!("Returning {} signals to {}", signals.len(), user.id);

    Ok(Json(json!({
        "signals": signals,
        "count": signals.len()
    })))
}

/// ICE servers a client should hand to its peer transport.
pub async fn get_ice_servers(State(state): State<Arc<AppConfig>>) -> Json<Value> {
    let config = TransportConfig::from_app_config(&state);
    Json(json!({ "ice_servers": config.ice_servers }))
}

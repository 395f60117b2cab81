// libs/video-call-cell/src/services/store.rs
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use shared_models::auth::User;

use crate::models::{
    CallParticipants, Consultation, ConsultationStatus, InitiateCallResponse, NewSignal,
    SendSignalRequest, SignalMessage, VideoCallError,
};
use crate::services::signaling::SignalingService;

/// Append-only relay of signaling messages between the two participants.
/// Implementations are bound to one authenticated sender.
#[async_trait]
pub trait SignalRelay: Send + Sync {
    async fn publish(&self, signal: NewSignal) -> Result<SignalMessage, VideoCallError>;

    /// Recent signals addressed to `target_user_id`, oldest first.
    async fn fetch(
        &self,
        consultation_id: Uuid,
        target_user_id: &str,
    ) -> Result<Vec<SignalMessage>, VideoCallError>;
}

/// The slice of consultation state a call reads and writes.
#[async_trait]
pub trait ConsultationStore: Send + Sync {
    async fn get(&self, consultation_id: Uuid) -> Result<Consultation, VideoCallError>;

    async fn participants(&self, consultation_id: Uuid) -> Result<CallParticipants, VideoCallError>;

    /// Sets `in_progress` and a fresh `call_started_at`.
    async fn initiate_call(&self, consultation_id: Uuid) -> Result<InitiateCallResponse, VideoCallError>;

    async fn patch_status(
        &self,
        consultation_id: Uuid,
        status: ConsultationStatus,
    ) -> Result<(), VideoCallError>;
}

/// Both store seams over [`SignalingService`], acting as one signed-in user.
pub struct SupabaseCallStore {
    service: Arc<SignalingService>,
    user: User,
    auth_token: String,
}

impl SupabaseCallStore {
    pub fn new(service: Arc<SignalingService>, user: User, auth_token: impl Into<String>) -> Self {
        Self {
            service,
            user,
            auth_token: auth_token.into(),
        }
    }
}

#[async_trait]
impl SignalRelay for SupabaseCallStore {
    async fn publish(&self, signal: NewSignal) -> Result<SignalMessage, VideoCallError> {
        let request = SendSignalRequest {
            target_user_id: signal.target_user_id,
            signal: signal.signal,
        };
        self.service
            .send_signal(signal.consultation_id, request, &self.user, &self.auth_token)
            .await
    }

    async fn fetch(
        &self,
        consultation_id: Uuid,
        target_user_id: &str,
    ) -> Result<Vec<SignalMessage>, VideoCallError> {
        // Row-level security only lets a user read their own inbox.
        if target_user_id != self.user.id {
            return Err(VideoCallError::Unauthorized);
        }
        self.service
            .get_signals(consultation_id, &self.user, &self.auth_token)
            .await
    }
}

#[async_trait]
impl ConsultationStore for SupabaseCallStore {
    async fn get(&self, consultation_id: Uuid) -> Result<Consultation, VideoCallError> {
        self.service.get_consultation(consultation_id, &self.auth_token).await
    }

    async fn participants(&self, consultation_id: Uuid) -> Result<CallParticipants, VideoCallError> {
        self.service
            .get_call_participants(consultation_id, &self.auth_token)
            .await
    }

    async fn initiate_call(&self, consultation_id: Uuid) -> Result<InitiateCallResponse, VideoCallError> {
        self.service
            .initiate_call(consultation_id, &self.user, &self.auth_token)
            .await
    }

    async fn patch_status(
        &self,
        consultation_id: Uuid,
        status: ConsultationStatus,
    ) -> Result<(), VideoCallError> {
        self.service
            .update_consultation_status(consultation_id, status, None, &self.user, &self.auth_token)
            .await
            .map(|_| ())
    }
}

// libs/video-call-cell/src/services/signaling.rs
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{
    CallParticipants, CallRole, Consultation, ConsultationStatus, InitiateCallResponse, Participant,
    Profile, SendSignalRequest, SignalMessage, VideoCallError,
};

/// Signal relay and consultation status backed by Supabase tables
/// (`signals`, `consultations`, `profiles`).
pub struct SignalingService {
    supabase: Arc<SupabaseClient>,
    fetch_limit: usize,
}

impl SignalingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            fetch_limit: config.signal_fetch_limit,
        }
    }

    // ==============================================================================
    // CONSULTATIONS
    // ==============================================================================

    #[instrument(skip(self, auth_token))]
    pub async fn get_consultation(
        &self,
        consultation_id: Uuid,
        auth_token: &str,
    ) -> Result<Consultation, VideoCallError> {
        let rows: Vec<Consultation> = self
            .supabase
            .select("consultations", &format!("id=eq.{}", consultation_id), auth_token)
            .await?;

        rows.into_iter()
            .next()
            .ok_or(VideoCallError::ConsultationNotFound)
    }

    /// Resolves both profiles of a consultation into the fixed doctor/patient pair.
    #[instrument(skip(self, auth_token))]
    pub async fn get_call_participants(
        &self,
        consultation_id: Uuid,
        auth_token: &str,
    ) -> Result<CallParticipants, VideoCallError> {
        let consultation = self.get_consultation(consultation_id, auth_token).await?;

        let profiles: Vec<Profile> = self
            .supabase
            .select(
                "profiles",
                &format!("id=in.({},{})", consultation.patient_id, consultation.doctor_id),
                auth_token,
            )
            .await?;

        let find = |profile_id: Uuid| -> Result<Participant, VideoCallError> {
            profiles
                .iter()
                .find(|p| p.id == profile_id)
                .cloned()
                .map(Participant::from)
                .ok_or_else(|| VideoCallError::ValidationError {
                    message: format!("Profile {} not found for consultation", profile_id),
                })
        };

        Ok(CallParticipants {
            patient: find(consultation.patient_id)?,
            doctor: find(consultation.doctor_id)?,
        })
    }

    /// Marks the consultation in progress and stamps a fresh `call_started_at`.
    #[instrument(skip(self, user, auth_token), fields(user_id = %user.id))]
    pub async fn initiate_call(
        &self,
        consultation_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<InitiateCallResponse, VideoCallError> {
        let participants = self.get_call_participants(consultation_id, auth_token).await?;
        self.verify_participant(&participants, user)?;

        let call_started_at = Utc::now();
        let rows: Vec<Consultation> = self
            .supabase
            .patch(
                "consultations",
                &format!("id=eq.{}", consultation_id),
                json!({
                    "status": ConsultationStatus::InProgress,
                    "call_started_at": call_started_at,
                }),
                auth_token,
            )
            .await?;

        let consultation = rows
            .into_iter()
            .next()
            .ok_or(VideoCallError::ConsultationNotFound)?;

        info!("Call initiated for consultation {}", consultation_id);

        Ok(InitiateCallResponse {
            success: true,
            room_id: consultation.room_id,
            call_started_at: consultation.call_started_at.unwrap_or(call_started_at),
        })
    }

    #[instrument(skip(self, user, notes, auth_token), fields(user_id = %user.id))]
    pub async fn update_consultation_status(
        &self,
        consultation_id: Uuid,
        status: ConsultationStatus,
        notes: Option<String>,
        user: &User,
        auth_token: &str,
    ) -> Result<Consultation, VideoCallError> {
        let participants = self.get_call_participants(consultation_id, auth_token).await?;
        self.verify_participant(&participants, user)?;

        let mut changes = json!({ "status": status });
        if let Some(notes) = notes {
            changes["notes"] = Value::String(notes);
        }

        let rows: Vec<Consultation> = self
            .supabase
            .patch("consultations", &format!("id=eq.{}", consultation_id), changes, auth_token)
            .await?;

        info!("Consultation {} status set to {}", consultation_id, status);

        rows.into_iter()
            .next()
            .ok_or(VideoCallError::ConsultationNotFound)
    }

    // ==============================================================================
    // SIGNALS
    // ==============================================================================

    /// Appends one signal addressed to the other participant.
    #[instrument(skip(self, request, user, auth_token), fields(user_id = %user.id, kind = %request.signal.kind))]
    pub async fn send_signal(
        &self,
        consultation_id: Uuid,
        request: SendSignalRequest,
        user: &User,
        auth_token: &str,
    ) -> Result<SignalMessage, VideoCallError> {
        let participants = self.get_call_participants(consultation_id, auth_token).await?;
        let role = self.verify_participant(&participants, user)?;

        let counterpart = participants.counterpart_of(role);
        if request.target_user_id != counterpart.user_id {
            return Err(VideoCallError::ValidationError {
                message: "Signals can only be sent to the other participant".to_string(),
            });
        }

        let message = SignalMessage {
            id: Uuid::new_v4(),
            consultation_id,
            from_user_id: user.id.clone(),
            target_user_id: request.target_user_id,
            signal: request.signal,
            timestamp: Utc::now(),
        };

        let row = serde_json::to_value(&message).map_err(|e| VideoCallError::Internal {
            message: e.to_string(),
        })?;
        let _: Vec<Value> = self.supabase.insert("signals", row, auth_token).await?;

        debug!("Stored {} signal {} for {}", message.signal.kind, message.id, message.target_user_id);
        Ok(message)
    }

    /// Most recent signals addressed to the caller, oldest first.
    #[instrument(skip(self, user, auth_token), fields(user_id = %user.id))]
    pub async fn get_signals(
        &self,
        consultation_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Vec<SignalMessage>, VideoCallError> {
        let query = format!(
            "consultation_id=eq.{}&target_user_id=eq.{}&order=timestamp.desc&limit={}",
            consultation_id, user.id, self.fetch_limit
        );

        let mut signals: Vec<SignalMessage> =
            self.supabase.select("signals", &query, auth_token).await?;
        signals.reverse();

        debug!("Fetched {} signals", signals.len());
        Ok(signals)
    }

    /// Role the caller plays in the consultation, or `Unauthorized`.
    pub async fn participant_role(
        &self,
        consultation_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<CallRole, VideoCallError> {
        let participants = self.get_call_participants(consultation_id, auth_token).await?;
        self.verify_participant(&participants, user)
    }

    fn verify_participant(
        &self,
        participants: &CallParticipants,
        user: &User,
    ) -> Result<CallRole, VideoCallError> {
        participants.role_of(&user.id).ok_or_else(|| {
            warn!("User {} is not a participant of this consultation", user.id);
            VideoCallError::Unauthorized
        })
    }
}

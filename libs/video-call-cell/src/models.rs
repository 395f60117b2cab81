// libs/video-call-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::coordinator::media::MediaError;
use crate::coordinator::transport::TransportError;

// ==============================================================================
// CONSULTATION MODELS
// ==============================================================================

/// Consultation record as stored in the `consultations` table. Only the
/// fields the call flow reads or writes are modelled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consultation {
    pub id: Uuid,
    pub patient_id: Uuid,              // profile id
    pub doctor_id: Uuid,               // profile id
    pub status: ConsultationStatus,
    #[serde(rename = "type", default)]
    pub consultation_type: ConsultationType,
    #[serde(default)]
    pub room_id: Option<String>,
    /// Set each time a call is initiated; signals older than this belong to
    /// an earlier attempt.
    #[serde(default)]
    pub call_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConsultationStatus {
    #[serde(rename = "scheduled")]
    Scheduled,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "no_show")]
    NoShow,
}

impl ConsultationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationStatus::Scheduled => "scheduled",
            ConsultationStatus::InProgress => "in_progress",
            ConsultationStatus::Completed => "completed",
            ConsultationStatus::Cancelled => "cancelled",
            ConsultationStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConsultationType {
    #[default]
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "chat")]
    Chat,
}

/// Profile row joined into [`CallParticipants`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub user_id: String,
    pub profile_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl From<Profile> for Participant {
    fn from(profile: Profile) -> Self {
        Self {
            user_id: profile.user_id,
            profile_id: profile.id,
            name: profile.name,
            phone: profile.phone,
        }
    }
}

/// The two fixed participants of a consultation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallParticipants {
    pub patient: Participant,
    pub doctor: Participant,
}

impl CallParticipants {
    /// The doctor always initiates, the patient always responds.
    pub fn role_of(&self, user_id: &str) -> Option<CallRole> {
        if self.doctor.user_id == user_id {
            Some(CallRole::Initiator)
        } else if self.patient.user_id == user_id {
            Some(CallRole::Responder)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.role_of(user_id).is_some()
    }

    pub fn counterpart_of(&self, role: CallRole) -> &Participant {
        match role {
            CallRole::Initiator => &self.patient,
            CallRole::Responder => &self.doctor,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CallRole {
    #[serde(rename = "initiator")]
    Initiator,
    #[serde(rename = "responder")]
    Responder,
}

impl fmt::Display for CallRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallRole::Initiator => f.write_str("initiator"),
            CallRole::Responder => f.write_str("responder"),
        }
    }
}

// ==============================================================================
// SIGNALING MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SignalKind {
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "answer")]
    Answer,
    #[serde(rename = "ice-candidate")]
    IceCandidate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Offer => f.write_str("offer"),
            SignalKind::Answer => f.write_str("answer"),
            SignalKind::IceCandidate => f.write_str("ice-candidate"),
        }
    }
}

/// `{type, data}` envelope relayed opaquely between the two participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalPayload {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub data: Value,
}

impl SignalPayload {
    pub fn description(kind: SignalKind, description: &SessionDescription) -> Self {
        Self {
            kind,
            data: serde_json::to_value(description).unwrap_or(Value::Null),
        }
    }

    pub fn candidate(candidate: &IceCandidate) -> Self {
        Self {
            kind: SignalKind::IceCandidate,
            data: serde_json::to_value(candidate).unwrap_or(Value::Null),
        }
    }
}

/// Persisted, append-only row of the `signals` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalMessage {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub from_user_id: String,
    pub target_user_id: String,
    pub signal: SignalPayload,
    pub timestamp: DateTime<Utc>,
}

/// A signal about to be published; id and timestamp are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSignal {
    pub consultation_id: Uuid,
    pub target_user_id: String,
    pub signal: SignalPayload,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Standard WebRTC session description value (`RTCSessionDescriptionInit`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// Standard WebRTC candidate value (`RTCIceCandidateInit`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Connection state mirrored from the peer transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionState {
    pub fn status_label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Waiting to connect...",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Failed => "Connection failed",
        }
    }
}

// ==============================================================================
// API REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendSignalRequest {
    pub target_user_id: String,
    pub signal: SignalPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConsultationStatusRequest {
    pub status: ConsultationStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitiateCallResponse {
    pub success: bool,
    pub room_id: Option<String>,
    pub call_started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum VideoCallError {
    #[error("Media acquisition failed: {0}")]
    Acquisition(#[from] MediaError),

    #[error("Negotiation error: {message}")]
    Negotiation { message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No remote media received within {seconds} seconds")]
    NegotiationTimeout { seconds: u64 },

    #[error("User not authorized for this consultation")]
    Unauthorized,

    #[error("Consultation not found")]
    ConsultationNotFound,

    #[error("No active call session")]
    SessionNotActive,

    #[error("Database error: {message}")]
    DatabaseError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl VideoCallError {
    /// Text suitable for showing to the person in the call.
    pub fn user_message(&self) -> String {
        match self {
            VideoCallError::Acquisition(MediaError::PermissionDenied) => {
                "Camera/microphone access denied. Please allow permissions and try again.".to_string()
            }
            VideoCallError::Acquisition(_) => {
                "Failed to start video call. Please check your camera and microphone.".to_string()
            }
            VideoCallError::Transport(_) => "Connection failed. Please try again.".to_string(),
            VideoCallError::NegotiationTimeout { .. } => {
                "The other participant did not connect. Please try again.".to_string()
            }
            VideoCallError::Unauthorized => {
                "You are not a participant in this consultation.".to_string()
            }
            VideoCallError::ConsultationNotFound => "Consultation not found.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for VideoCallError {
    fn from(err: anyhow::Error) -> Self {
        VideoCallError::DatabaseError {
            message: err.to_string(),
        }
    }
}

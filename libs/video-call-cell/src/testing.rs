// libs/video-call-cell/src/testing.rs
//! In-memory stand-ins for the relay, consultation store, media devices and
//! peer transport. Used by this crate's tests and by anything embedding the
//! coordinator that wants to exercise it without a browser or a database.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::coordinator::media::{
    LocalStream, MediaConstraints, MediaError, MediaProvider, MediaTrack, TrackKind,
};
use crate::coordinator::transport::{
    PeerTransport, TransportConfig, TransportError, TransportEvent, TransportEventSender,
    TransportFactory,
};
use crate::models::{
    CallParticipants, Consultation, ConsultationStatus, ConsultationType, IceCandidate,
    InitiateCallResponse, NewSignal, Participant, SdpType, SessionDescription, SignalKind,
    SignalMessage, VideoCallError,
};
use crate::services::store::{ConsultationStore, SignalRelay};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==============================================================================
// STORE
// ==============================================================================

#[derive(Default)]
struct StoreState {
    consultations: HashMap<Uuid, Consultation>,
    participants: HashMap<Uuid, CallParticipants>,
    signals: Vec<SignalMessage>,
    status_history: Vec<(Uuid, ConsultationStatus)>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl StoreState {
    // Server clock that never repeats, so "older than" comparisons are strict.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_timestamp {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(stamp);
        stamp
    }
}

/// Shared backing store; hand each participant its own [`InMemoryStoreClient`].
#[derive(Clone)]
pub struct InMemoryCallStore {
    state: Arc<Mutex<StoreState>>,
    fetch_limit: usize,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            fetch_limit: 50,
        }
    }

    /// Caps how many recent signals one fetch returns, like the hosted relay.
    pub fn with_fetch_limit(fetch_limit: usize) -> Self {
        Self {
            fetch_limit,
            ..Self::new()
        }
    }

    pub fn seed_consultation(&self) -> (Uuid, CallParticipants) {
        self.seed_consultation_of_type(ConsultationType::Video)
    }

    /// Scheduled consultation between a fresh doctor and patient.
    pub fn seed_consultation_of_type(&self, consultation_type: ConsultationType) -> (Uuid, CallParticipants) {
        let id = Uuid::new_v4();
        let participants = CallParticipants {
            patient: Participant {
                user_id: format!("patient-{}", Uuid::new_v4()),
                profile_id: Uuid::new_v4(),
                name: "Test Patient".to_string(),
                phone: None,
            },
            doctor: Participant {
                user_id: format!("doctor-{}", Uuid::new_v4()),
                profile_id: Uuid::new_v4(),
                name: "Dr. Test".to_string(),
                phone: Some("+10000000000".to_string()),
            },
        };
        let consultation = Consultation {
            id,
            patient_id: participants.patient.profile_id,
            doctor_id: participants.doctor.profile_id,
            status: ConsultationStatus::Scheduled,
            consultation_type,
            room_id: Some(format!("room-{}", id)),
            call_started_at: None,
            notes: None,
        };

        let mut state = lock(&self.state);
        state.consultations.insert(id, consultation);
        state.participants.insert(id, participants.clone());
        (id, participants)
    }

    pub fn client_for(&self, user_id: &str) -> InMemoryStoreClient {
        InMemoryStoreClient {
            state: self.state.clone(),
            user_id: user_id.to_string(),
            fetch_limit: self.fetch_limit,
        }
    }

    pub fn consultation(&self, id: Uuid) -> Option<Consultation> {
        lock(&self.state).consultations.get(&id).cloned()
    }

    pub fn status(&self, id: Uuid) -> Option<ConsultationStatus> {
        self.consultation(id).map(|c| c.status)
    }

    pub fn status_history(&self, id: Uuid) -> Vec<ConsultationStatus> {
        lock(&self.state)
            .status_history
            .iter()
            .filter(|(cid, _)| *cid == id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Every signal ever published, in publish order.
    pub fn signals(&self) -> Vec<SignalMessage> {
        lock(&self.state).signals.clone()
    }

    pub fn signals_from(&self, user_id: &str, kind: SignalKind) -> Vec<SignalMessage> {
        self.signals()
            .into_iter()
            .filter(|s| s.from_user_id == user_id && s.signal.kind == kind)
            .collect()
    }

    /// Appends a raw message without any validation.
    pub fn inject(&self, message: SignalMessage) {
        lock(&self.state).signals.push(message);
    }

    pub fn set_status(&self, id: Uuid, status: ConsultationStatus) {
        let mut state = lock(&self.state);
        if let Some(consultation) = state.consultations.get_mut(&id) {
            consultation.status = status;
        }
    }
}

impl Default for InMemoryCallStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One participant's authenticated view of an [`InMemoryCallStore`].
#[derive(Clone)]
pub struct InMemoryStoreClient {
    state: Arc<Mutex<StoreState>>,
    user_id: String,
    fetch_limit: usize,
}

impl InMemoryStoreClient {
    fn require_participant(&self, state: &StoreState, consultation_id: Uuid) -> Result<(), VideoCallError> {
        let participants = state
            .participants
            .get(&consultation_id)
            .ok_or(VideoCallError::ConsultationNotFound)?;
        if participants.is_participant(&self.user_id) {
            Ok(())
        } else {
            Err(VideoCallError::Unauthorized)
        }
    }
}

#[async_trait]
impl SignalRelay for InMemoryStoreClient {
    async fn publish(&self, signal: NewSignal) -> Result<SignalMessage, VideoCallError> {
        let mut state = lock(&self.state);
        self.require_participant(&state, signal.consultation_id)?;

        let message = SignalMessage {
            id: Uuid::new_v4(),
            consultation_id: signal.consultation_id,
            from_user_id: self.user_id.clone(),
            target_user_id: signal.target_user_id,
            signal: signal.signal,
            timestamp: state.next_timestamp(),
        };
        state.signals.push(message.clone());
        Ok(message)
    }

    async fn fetch(
        &self,
        consultation_id: Uuid,
        target_user_id: &str,
    ) -> Result<Vec<SignalMessage>, VideoCallError> {
        let state = lock(&self.state);
        let mut recent: Vec<SignalMessage> = state
            .signals
            .iter()
            .rev()
            .filter(|s| s.consultation_id == consultation_id && s.target_user_id == target_user_id)
            .take(self.fetch_limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }
}

#[async_trait]
impl ConsultationStore for InMemoryStoreClient {
    async fn get(&self, consultation_id: Uuid) -> Result<Consultation, VideoCallError> {
        lock(&self.state)
            .consultations
            .get(&consultation_id)
            .cloned()
            .ok_or(VideoCallError::ConsultationNotFound)
    }

    async fn participants(&self, consultation_id: Uuid) -> Result<CallParticipants, VideoCallError> {
        lock(&self.state)
            .participants
            .get(&consultation_id)
            .cloned()
            .ok_or(VideoCallError::ConsultationNotFound)
    }

    async fn initiate_call(&self, consultation_id: Uuid) -> Result<InitiateCallResponse, VideoCallError> {
        let mut state = lock(&self.state);
        self.require_participant(&state, consultation_id)?;

        let call_started_at = state.next_timestamp();
        let consultation = state
            .consultations
            .get_mut(&consultation_id)
            .ok_or(VideoCallError::ConsultationNotFound)?;
        consultation.status = ConsultationStatus::InProgress;
        consultation.call_started_at = Some(call_started_at);
        let room_id = consultation.room_id.clone();

        state
            .status_history
            .push((consultation_id, ConsultationStatus::InProgress));

        Ok(InitiateCallResponse {
            success: true,
            room_id,
            call_started_at,
        })
    }

    async fn patch_status(
        &self,
        consultation_id: Uuid,
        status: ConsultationStatus,
    ) -> Result<(), VideoCallError> {
        let mut state = lock(&self.state);
        self.require_participant(&state, consultation_id)?;

        let consultation = state
            .consultations
            .get_mut(&consultation_id)
            .ok_or(VideoCallError::ConsultationNotFound)?;
        consultation.status = status;
        state.status_history.push((consultation_id, status));
        Ok(())
    }
}

// ==============================================================================
// MEDIA
// ==============================================================================

pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl FakeTrack {
    pub fn new(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: format!("{:?}-{}", kind, Uuid::new_v4()).to_lowercase(),
            kind,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Grants or denies device access; remembers every track it handed out.
#[derive(Default)]
pub struct FakeMediaProvider {
    denial: Option<MediaError>,
    attempts: AtomicUsize,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeMediaProvider {
    pub fn granting() -> Self {
        Self::default()
    }

    pub fn denying(error: MediaError) -> Self {
        Self {
            denial: Some(error),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        lock(&self.tracks).clone()
    }

    /// Most recently acquired track of `kind`.
    pub fn latest(&self, kind: TrackKind) -> Option<Arc<FakeTrack>> {
        lock(&self.tracks).iter().rev().find(|t| t.kind == kind).cloned()
    }
}

#[async_trait]
impl MediaProvider for FakeMediaProvider {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(denial) = &self.denial {
            return Err(denial.clone());
        }

        let mut acquired = Vec::new();
        if constraints.audio {
            acquired.push(FakeTrack::new(TrackKind::Audio));
        }
        if constraints.video {
            acquired.push(FakeTrack::new(TrackKind::Video));
        }

        lock(&self.tracks).extend(acquired.iter().cloned());
        Ok(LocalStream::new(
            acquired.into_iter().map(|t| t as Arc<dyn MediaTrack>).collect(),
        ))
    }
}

// ==============================================================================
// TRANSPORT
// ==============================================================================

/// What a [`FakeTransport`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct TransportRecord {
    pub tracks: Vec<TrackKind>,
    pub offers_created: usize,
    pub answers_created: usize,
    pub local_descriptions: Vec<SessionDescription>,
    pub remote_descriptions: Vec<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
    /// Candidates offered before any remote description existed.
    pub early_candidates: usize,
}

/// Records calls and lets tests raise transport callbacks with [`FakeTransport::emit`].
/// Descriptions whose sdp contains `corrupt` are rejected.
pub struct FakeTransport {
    serial: usize,
    events: TransportEventSender,
    record: Mutex<TransportRecord>,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn record(&self) -> TransportRecord {
        lock(&self.record).clone()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn description(&self, sdp_type: SdpType) -> SessionDescription {
        SessionDescription {
            sdp_type,
            sdp: format!("v=0\r\no=fake {} 2 IN IP4 127.0.0.1\r\ns={:?}\r\n", self.serial, sdp_type),
        }
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), TransportError> {
        self.ensure_open()?;
        lock(&self.record).tracks.push(track.kind());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        lock(&self.record).offers_created += 1;
        Ok(self.description(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        let mut record = lock(&self.record);
        if record.remote_descriptions.is_empty() {
            return Err(TransportError::Failed("no remote offer to answer".to_string()));
        }
        record.answers_created += 1;
        Ok(self.description(SdpType::Answer))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        lock(&self.record).local_descriptions.push(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        if description.sdp.contains("corrupt") {
            return Err(TransportError::InvalidDescription("unparseable sdp".to_string()));
        }
        lock(&self.record).remote_descriptions.push(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut record = lock(&self.record);
        if record.remote_descriptions.is_empty() {
            record.early_candidates += 1;
            return Err(TransportError::InvalidCandidate("no remote description".to_string()));
        }
        record.candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeTransportFactory {
    failure: Option<TransportError>,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: TransportError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        lock(&self.created).len()
    }

    pub fn latest(&self) -> Option<Arc<FakeTransport>> {
        lock(&self.created).last().cloned()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        _config: &TransportConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        let mut created = lock(&self.created);
        let transport = Arc::new(FakeTransport {
            serial: created.len() + 1,
            events,
            record: Mutex::new(TransportRecord::default()),
            closed: AtomicBool::new(false),
        });
        created.push(transport.clone());
        Ok(transport)
    }
}

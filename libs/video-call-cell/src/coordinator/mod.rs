// libs/video-call-cell/src/coordinator/mod.rs
//! # Call Session Coordinator
//!
//! Drives one participant's side of a two-party consultation call:
//!
//! - acquires camera and microphone through a [`media::MediaProvider`]
//! - opens a [`transport::PeerTransport`] and negotiates it over the signal relay
//! - keeps the consultation status in step with the call
//! - exposes mute/video toggles and observable call state
//!
//! The doctor is always the initiator and the only side that sends an offer.
//! The patient responds, joining automatically once the consultation is
//! `in_progress` for a call attempt it has not joined before.
//!
//! All phase changes go through the pure [`machine::transition`] function;
//! this module only executes the effects it returns. Transport callbacks and
//! relay polling are folded in on [`CallSessionCoordinator::tick`], so the
//! coordinator is a single-owner state machine with no internal locking.

pub mod inbox;
pub mod machine;
pub mod media;
pub mod transport;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::{default_ice_servers, AppConfig};

use crate::models::{
    CallParticipants, CallRole, ConnectionState, ConsultationStatus, ConsultationType,
    IceCandidate, IceServer, NewSignal, SessionDescription, SignalKind, SignalPayload,
    VideoCallError,
};
use crate::services::store::{ConsultationStore, SignalRelay};

use self::inbox::{IgnoreReason, InboxDecision, SignalInbox};
use self::machine::{CallEffect, CallEvent, CallPhase, CallStateMachine, FailureCause};
use self::media::{LocalStream, MediaConstraints, MediaProvider, TrackKind};
use self::transport::{
    PeerTransport, TransportConfig, TransportEvent, TransportEventReceiver, TransportFactory,
};

const STATUS_ACQUIRING: &str = "Getting camera and microphone...";
const STATUS_SETTING_UP: &str = "Setting up connection...";
const STATUS_CREATING_OFFER: &str = "Creating call offer...";
const STATUS_WAITING_FOR_PEER: &str = "Waiting for other participant...";
const STATUS_ENDED: &str = "Call ended";

/// External collaborators a coordinator talks to.
pub struct CoordinatorDeps {
    pub relay: Arc<dyn SignalRelay>,
    pub consultations: Arc<dyn ConsultationStore>,
    pub media: Arc<dyn MediaProvider>,
    pub transports: Arc<dyn TransportFactory>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub transport: TransportConfig,
    /// How long a session may sit in negotiation without remote media.
    pub negotiation_timeout: Duration,
    pub poll_interval: Duration,
}

impl CoordinatorSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            transport: TransportConfig::from_app_config(config),
            negotiation_timeout: config.negotiation_timeout(),
            poll_interval: config.signal_poll_interval(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            transport: TransportConfig {
                ice_servers: vec![IceServer {
                    urls: default_ice_servers(),
                    username: None,
                    credential: None,
                }],
            },
            negotiation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Serializable view of the observable call state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallSnapshot {
    pub consultation_id: Uuid,
    pub role: CallRole,
    pub phase: CallPhase,
    pub connection_state: ConnectionState,
    pub status_message: String,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub call_duration_secs: u64,
    pub call_duration: String,
    pub error: Option<String>,
}

/// `mm:ss` rendering of a call duration.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

enum EffectOutcome {
    Done,
    Next(CallEvent),
    /// A setup step failed; the session must be torn down.
    Failed(VideoCallError),
    /// The machine asked for a failure to be surfaced.
    Report(VideoCallError),
}

impl From<Result<(), VideoCallError>> for EffectOutcome {
    fn from(result: Result<(), VideoCallError>) -> Self {
        match result {
            Ok(()) => EffectOutcome::Done,
            Err(err) => EffectOutcome::Failed(err),
        }
    }
}

/// Devices and transport owned by one call attempt.
struct ActiveSession {
    stream: LocalStream,
    transport: Option<Arc<dyn PeerTransport>>,
    events: Option<TransportEventReceiver>,
    inbox: SignalInbox,
    negotiation_deadline: Option<Instant>,
    connected_at: Option<DateTime<Utc>>,
}

impl ActiveSession {
    async fn release(mut self) {
        self.stream.stop_all();
        self.events = None;
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.stream.stop_all();

        let Some(transport) = self.transport.take() else {
            return;
        };
        if transport.is_closed() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { transport.close().await });
            }
            Err(_) => warn!("Call session dropped outside a runtime; transport not closed"),
        }
    }
}

pub struct CallSessionCoordinator {
    consultation_id: Uuid,
    local_user_id: String,
    participants: CallParticipants,
    constraints: MediaConstraints,

    relay: Arc<dyn SignalRelay>,
    consultations: Arc<dyn ConsultationStore>,
    media: Arc<dyn MediaProvider>,
    transports: Arc<dyn TransportFactory>,
    settings: CoordinatorSettings,

    machine: CallStateMachine,
    session: Option<ActiveSession>,
    connection_state: ConnectionState,
    is_muted: bool,
    is_video_off: bool,
    status_message: String,
    last_error: Option<VideoCallError>,
    // `call_started_at` of the attempt last joined; outer None means never joined.
    joined_call: Option<Option<DateTime<Utc>>>,
}

impl CallSessionCoordinator {
    /// Resolves the participants and fails with `Unauthorized` when
    /// `local_user_id` is neither of them.
    pub async fn new(
        consultation_id: Uuid,
        local_user_id: impl Into<String>,
        deps: CoordinatorDeps,
        settings: CoordinatorSettings,
    ) -> Result<Self, VideoCallError> {
        let local_user_id = local_user_id.into();

        let participants = deps.consultations.participants(consultation_id).await?;
        let role = participants
            .role_of(&local_user_id)
            .ok_or(VideoCallError::Unauthorized)?;

        let consultation = deps.consultations.get(consultation_id).await?;
        let constraints = MediaConstraints {
            audio: true,
            video: consultation.consultation_type != ConsultationType::Audio,
        };

        info!(
            "Call coordinator ready for consultation {} as {} ({})",
            consultation_id, role, local_user_id
        );

        Ok(Self {
            consultation_id,
            local_user_id,
            participants,
            constraints,
            relay: deps.relay,
            consultations: deps.consultations,
            media: deps.media,
            transports: deps.transports,
            settings,
            machine: CallStateMachine::new(role),
            session: None,
            connection_state: ConnectionState::Idle,
            is_muted: false,
            is_video_off: !constraints.video,
            status_message: ConnectionState::Idle.status_label().to_string(),
            last_error: None,
            joined_call: None,
        })
    }

    // ==============================================================================
    // CALL CONTROL
    // ==============================================================================

    /// Starts a call attempt. A no-op while a session is already active.
    #[instrument(skip(self), fields(consultation_id = %self.consultation_id, role = %self.role()))]
    pub async fn start_call(&mut self) -> Result<(), VideoCallError> {
        if self.phase().is_active() {
            debug!("Start ignored, call already {:?}", self.phase());
            return Ok(());
        }

        self.last_error = None;
        self.connection_state = ConnectionState::Idle;
        self.fire(CallEvent::StartRequested).await
    }

    /// Releases devices and transport, then marks the consultation completed.
    #[instrument(skip(self), fields(consultation_id = %self.consultation_id, role = %self.role()))]
    pub async fn end_call(&mut self) -> Result<(), VideoCallError> {
        if !self.phase().is_active() {
            debug!("End ignored, no active call");
            return Ok(());
        }

        let result = self.fire(CallEvent::EndRequested).await;
        self.connection_state = ConnectionState::Idle;
        if result.is_ok() {
            self.status_message = STATUS_ENDED.to_string();
        }
        result
    }

    /// Tears the session down without touching the consultation status.
    pub async fn shutdown(&mut self) {
        if self.phase().is_active() {
            info!("Abandoning active call for consultation {}", self.consultation_id);
            let _ = self.fire(CallEvent::Abandoned).await;
        }
    }

    /// Flips the local audio track and returns the new muted flag.
    pub fn toggle_mute(&mut self) -> bool {
        if let Some(enabled) = self
            .session
            .as_ref()
            .and_then(|s| s.stream.toggle(TrackKind::Audio))
        {
            self.is_muted = !enabled;
            info!(muted = self.is_muted, "Microphone toggled");
        }
        self.is_muted
    }

    /// Flips the local video track and returns the new video-off flag.
    pub fn toggle_video(&mut self) -> bool {
        if let Some(enabled) = self
            .session
            .as_ref()
            .and_then(|s| s.stream.toggle(TrackKind::Video))
        {
            self.is_video_off = !enabled;
            info!(video_off = self.is_video_off, "Camera toggled");
        }
        self.is_video_off
    }

    /// One round of background work: auto-join, transport events, relay
    /// polling, negotiation deadline. Every step runs; the first error is returned.
    pub async fn tick(&mut self) -> Result<(), VideoCallError> {
        let joined = self.auto_join().await;
        let events = self.drain_transport_events().await;
        let signals = self.poll_signals().await;
        let deadline = self.check_negotiation_timeout().await;

        joined.and(events).and(signals).and(deadline)
    }

    /// Ticks on the configured poll interval until `shutdown` flips to true
    /// (or its sender goes away), then abandons any live session.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Call loop started for consultation {}", self.consultation_id);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("Call tick failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Call loop stopped for consultation {}", self.consultation_id);
    }

    // ==============================================================================
    // OBSERVERS
    // ==============================================================================

    pub fn consultation_id(&self) -> Uuid {
        self.consultation_id
    }

    pub fn role(&self) -> CallRole {
        self.machine.role()
    }

    pub fn phase(&self) -> CallPhase {
        self.machine.phase()
    }

    pub fn participants(&self) -> &CallParticipants {
        &self.participants
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn connection_status_message(&self) -> &str {
        &self.status_message
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_video_off(&self) -> bool {
        self.is_video_off
    }

    pub fn last_error(&self) -> Option<&VideoCallError> {
        self.last_error.as_ref()
    }

    /// Time since remote media first arrived; zero when not connected.
    pub fn call_duration(&self) -> Duration {
        self.session
            .as_ref()
            .and_then(|s| s.connected_at)
            .and_then(|at| (Utc::now() - at).to_std().ok())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let duration = self.call_duration();
        CallSnapshot {
            consultation_id: self.consultation_id,
            role: self.role(),
            phase: self.phase(),
            connection_state: self.connection_state,
            status_message: self.status_message.clone(),
            is_muted: self.is_muted,
            is_video_off: self.is_video_off,
            call_duration_secs: duration.as_secs(),
            call_duration: format_duration(duration),
            error: self.last_error.as_ref().map(|e| e.user_message()),
        }
    }

    // ==============================================================================
    // STATE MACHINE DRIVER
    // ==============================================================================

    async fn fire(&mut self, event: CallEvent) -> Result<(), VideoCallError> {
        let mut queue = VecDeque::from([event]);
        let mut first_error: Option<VideoCallError> = None;

        while let Some(event) = queue.pop_front() {
            let from = self.machine.phase();
            let effects = self.machine.handle(&event);
            debug!(?event, ?from, to = ?self.machine.phase(), "Call transition");

            for effect in effects {
                match self.execute(effect).await {
                    EffectOutcome::Done => {}
                    EffectOutcome::Next(next) => queue.push_back(next),
                    EffectOutcome::Failed(err) => {
                        warn!("Call setup step failed: {}", err);
                        queue.push_front(CallEvent::Failed(FailureCause::Setup(err.to_string())));
                        first_error.get_or_insert(err);
                        break;
                    }
                    EffectOutcome::Report(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => {
                error!("Call for consultation {} failed: {}", self.consultation_id, err);
                if self.session.is_none() && self.connection_state == ConnectionState::Idle {
                    self.connection_state = ConnectionState::Failed;
                }
                self.record_error(err.clone());
                Err(err)
            }
            None => Ok(()),
        }
    }

    async fn execute(&mut self, effect: CallEffect) -> EffectOutcome {
        match effect {
            CallEffect::AcquireMedia => self.acquire_media().await,
            CallEffect::OpenTransport => self.open_transport().await.into(),
            CallEffect::MarkConsultationInProgress => self.mark_in_progress().await.into(),
            CallEffect::SendOffer => self.send_offer().await.into(),
            CallEffect::StartCallClock => {
                if let Some(session) = self.session.as_mut() {
                    session.connected_at = Some(Utc::now());
                    session.negotiation_deadline = None;
                }
                info!("Remote media received, call connected");
                EffectOutcome::Done
            }
            CallEffect::ReleaseResources => {
                self.release_session().await;
                EffectOutcome::Done
            }
            CallEffect::MarkConsultationCompleted => self
                .consultations
                .patch_status(self.consultation_id, ConsultationStatus::Completed)
                .await
                .map(|()| info!("Consultation {} marked completed", self.consultation_id))
                .into(),
            CallEffect::ReportFailure(cause) => EffectOutcome::Report(cause.into()),
        }
    }

    fn record_error(&mut self, err: VideoCallError) {
        self.status_message = err.user_message();
        self.last_error = Some(err);
    }

    // ==============================================================================
    // EFFECTS
    // ==============================================================================

    async fn acquire_media(&mut self) -> EffectOutcome {
        self.status_message = STATUS_ACQUIRING.to_string();

        match self.media.acquire(self.constraints).await {
            Ok(stream) => {
                info!("Acquired local media: {:?}", stream);
                self.session = Some(ActiveSession {
                    stream,
                    transport: None,
                    events: None,
                    inbox: SignalInbox::new(self.consultation_id, self.local_user_id.clone(), self.role()),
                    negotiation_deadline: None,
                    connected_at: None,
                });
                self.is_muted = false;
                self.is_video_off = !self.constraints.video;
                EffectOutcome::Next(CallEvent::MediaAcquired)
            }
            Err(err) => {
                warn!("Media acquisition failed: {}", err);
                EffectOutcome::Next(CallEvent::Failed(FailureCause::Acquisition(err)))
            }
        }
    }

    async fn open_transport(&mut self) -> Result<(), VideoCallError> {
        self.status_message = STATUS_SETTING_UP.to_string();
        self.connection_state = ConnectionState::Connecting;

        let session = self.session.as_mut().ok_or(VideoCallError::SessionNotActive)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self.transports.create(&self.settings.transport, events_tx).await?;

        // Owned by the session from here so a later failure still closes it.
        session.transport = Some(transport.clone());
        session.events = Some(events_rx);
        session.negotiation_deadline = Some(Instant::now() + self.settings.negotiation_timeout);

        for track in session.stream.tracks() {
            transport.add_track(track.clone()).await?;
        }

        debug!("Transport open with {} local tracks", session.stream.tracks().len());
        Ok(())
    }

    async fn mark_in_progress(&mut self) -> Result<(), VideoCallError> {
        let call_started_at = match self.role() {
            CallRole::Initiator => {
                Some(self.consultations.initiate_call(self.consultation_id).await?.call_started_at)
            }
            CallRole::Responder => {
                let consultation = self.consultations.get(self.consultation_id).await?;
                if consultation.status == ConsultationStatus::InProgress {
                    consultation.call_started_at
                } else {
                    Some(self.consultations.initiate_call(self.consultation_id).await?.call_started_at)
                }
            }
        };

        if let Some(session) = self.session.as_mut() {
            session.inbox.set_cutoff(call_started_at);
        }
        self.joined_call = Some(call_started_at);

        info!("Consultation {} in progress", self.consultation_id);
        Ok(())
    }

    async fn send_offer(&mut self) -> Result<(), VideoCallError> {
        self.status_message = STATUS_CREATING_OFFER.to_string();

        let transport = self.current_transport().ok_or(VideoCallError::SessionNotActive)?;
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        self.publish_description(SignalKind::Offer, &offer).await?;

        self.status_message = STATUS_WAITING_FOR_PEER.to_string();
        info!("Offer sent to {}", self.counterpart_user_id());
        Ok(())
    }

    async fn release_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.release().await;
            info!("Released call resources for consultation {}", self.consultation_id);
        }
        // Keep a terminal state reported by the transport, otherwise nothing is in flight.
        if !matches!(
            self.connection_state,
            ConnectionState::Failed | ConnectionState::Disconnected
        ) {
            self.connection_state = ConnectionState::Idle;
        }
        self.is_muted = false;
        self.is_video_off = !self.constraints.video;
    }

    // ==============================================================================
    // BACKGROUND WORK
    // ==============================================================================

    async fn auto_join(&mut self) -> Result<(), VideoCallError> {
        if self.role() != CallRole::Responder || self.phase().is_active() {
            return Ok(());
        }

        let consultation = self.consultations.get(self.consultation_id).await?;
        if consultation.status != ConsultationStatus::InProgress {
            return Ok(());
        }
        // One automatic attempt per call; a failed join waits for a new call.
        if self.joined_call == Some(consultation.call_started_at) {
            return Ok(());
        }

        info!("Consultation {} is in progress, joining call", self.consultation_id);
        self.joined_call = Some(consultation.call_started_at);
        self.start_call().await
    }

    async fn drain_transport_events(&mut self) -> Result<(), VideoCallError> {
        let mut pending = Vec::new();
        if let Some(events) = self.session.as_mut().and_then(|s| s.events.as_mut()) {
            while let Ok(event) = events.try_recv() {
                pending.push(event);
            }
        }

        let mut outcome = Ok(());
        for event in pending {
            let result = match event {
                TransportEvent::LocalCandidate(candidate) => {
                    self.publish_candidate(candidate).await;
                    Ok(())
                }
                TransportEvent::RemoteTrack { track_id, kind } => {
                    debug!("Remote {:?} track {} received", kind, track_id);
                    self.fire(CallEvent::RemoteTrackReceived).await
                }
                TransportEvent::StateChanged(state) => self.on_connection_state(state).await,
            };
            if let Err(e) = result {
                outcome = outcome.and(Err(e));
            }
        }
        outcome
    }

    async fn on_connection_state(&mut self, state: ConnectionState) -> Result<(), VideoCallError> {
        // Late callbacks from a transport that was already released.
        if self.session.is_none() {
            return Ok(());
        }

        info!("Connection state: {:?}", state);
        self.connection_state = state;
        self.status_message = state.status_label().to_string();
        self.fire(CallEvent::TransportStateChanged(state)).await
    }

    async fn poll_signals(&mut self) -> Result<(), VideoCallError> {
        let Some(transport) = self.current_transport() else {
            return Ok(());
        };

        let messages = self
            .relay
            .fetch(self.consultation_id, &self.local_user_id)
            .await?;

        for message in messages {
            let Some(session) = self.session.as_mut() else {
                break;
            };

            match session.inbox.accept(&message) {
                InboxDecision::ApplyOffer(offer) => self.apply_offer(&transport, offer).await?,
                InboxDecision::ApplyAnswer(answer) => self.apply_answer(&transport, answer).await,
                InboxDecision::ApplyCandidate(candidate) => {
                    self.apply_candidate(&transport, candidate).await
                }
                InboxDecision::Buffered => {
                    debug!("Buffered ICE candidate {} until remote description is set", message.id)
                }
                InboxDecision::Ignored(IgnoreReason::Duplicate) => {}
                InboxDecision::Ignored(IgnoreReason::Malformed(reason)) => warn!(
                    "Dropped malformed {} signal {}: {}",
                    message.signal.kind, message.id, reason
                ),
                InboxDecision::Ignored(reason) => {
                    debug!("Ignored {} signal {}: {:?}", message.signal.kind, message.id, reason)
                }
            }
        }

        Ok(())
    }

    async fn check_negotiation_timeout(&mut self) -> Result<(), VideoCallError> {
        if self.phase() != CallPhase::Negotiating {
            return Ok(());
        }

        let expired = self
            .session
            .as_ref()
            .and_then(|s| s.negotiation_deadline)
            .is_some_and(|deadline| Instant::now() >= deadline);

        if !expired {
            return Ok(());
        }

        let seconds = self.settings.negotiation_timeout.as_secs();
        warn!("No remote media after {}s, giving up", seconds);
        self.fire(CallEvent::NegotiationTimedOut { seconds }).await
    }

    // ==============================================================================
    // NEGOTIATION
    // ==============================================================================

    async fn apply_offer(
        &mut self,
        transport: &Arc<dyn PeerTransport>,
        offer: SessionDescription,
    ) -> Result<(), VideoCallError> {
        if let Err(e) = transport.set_remote_description(offer).await {
            warn!("Dropped offer that could not be applied: {}", e);
            return Ok(());
        }
        self.flush_candidates(transport).await;

        if let Err(err) = self.send_answer(transport).await {
            let _ = self
                .fire(CallEvent::Failed(FailureCause::Setup(err.to_string())))
                .await;
            self.record_error(err.clone());
            return Err(err);
        }
        Ok(())
    }

    async fn send_answer(&mut self, transport: &Arc<dyn PeerTransport>) -> Result<(), VideoCallError> {
        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        self.publish_description(SignalKind::Answer, &answer).await?;

        info!("Answer sent to {}", self.counterpart_user_id());
        Ok(())
    }

    async fn apply_answer(&mut self, transport: &Arc<dyn PeerTransport>, answer: SessionDescription) {
        match transport.set_remote_description(answer).await {
            Ok(()) => {
                info!("Answer applied");
                self.flush_candidates(transport).await;
            }
            Err(e) => warn!("Dropped answer that could not be applied: {}", e),
        }
    }

    async fn apply_candidate(&mut self, transport: &Arc<dyn PeerTransport>, candidate: IceCandidate) {
        if let Err(e) = transport.add_ice_candidate(candidate).await {
            warn!("Dropped ICE candidate: {}", e);
        }
    }

    async fn flush_candidates(&mut self, transport: &Arc<dyn PeerTransport>) {
        let pending = match self.session.as_mut() {
            Some(session) => session.inbox.mark_remote_description_set(),
            None => return,
        };

        if !pending.is_empty() {
            debug!("Applying {} buffered ICE candidates", pending.len());
        }
        for candidate in pending {
            self.apply_candidate(transport, candidate).await;
        }
    }

    async fn publish_candidate(&mut self, candidate: IceCandidate) {
        if self.session.is_none() {
            return;
        }
        let signal = self.outgoing(SignalPayload::candidate(&candidate));
        if let Err(e) = self.relay.publish(signal).await {
            warn!("Failed to publish ICE candidate: {}", e);
        }
    }

    async fn publish_description(
        &self,
        kind: SignalKind,
        description: &SessionDescription,
    ) -> Result<(), VideoCallError> {
        let signal = self.outgoing(SignalPayload::description(kind, description));
        self.relay.publish(signal).await.map(|_| ())
    }

    fn outgoing(&self, signal: SignalPayload) -> NewSignal {
        NewSignal {
            consultation_id: self.consultation_id,
            target_user_id: self.counterpart_user_id().to_string(),
            signal,
        }
    }

    fn counterpart_user_id(&self) -> &str {
        &self.participants.counterpart_of(self.role()).user_id
    }

    fn current_transport(&self) -> Option<Arc<dyn PeerTransport>> {
        self.session.as_ref().and_then(|s| s.transport.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::media::{MediaError, MockMediaProvider};
    use crate::testing::{FakeTransportFactory, InMemoryCallStore};
    use assert_matches::assert_matches;

    async fn coordinator_with_media(
        store: &InMemoryCallStore,
        consultation_id: Uuid,
        user_id: &str,
        media: MockMediaProvider,
    ) -> CallSessionCoordinator {
        let client = Arc::new(store.client_for(user_id));
        let deps = CoordinatorDeps {
            relay: client.clone(),
            consultations: client,
            media: Arc::new(media),
            transports: Arc::new(FakeTransportFactory::new()),
        };
        CallSessionCoordinator::new(consultation_id, user_id, deps, CoordinatorSettings::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_audio_consultation_requests_audio_only() {
        let store = InMemoryCallStore::new();
        let (id, participants) = store.seed_consultation_of_type(ConsultationType::Audio);

        let mut media = MockMediaProvider::new();
        media
            .expect_acquire()
            .withf(|c| c.audio && !c.video)
            .times(1)
            .returning(|_| Err(MediaError::DeviceUnavailable("no microphone".to_string())));

        let mut doctor = coordinator_with_media(&store, id, &participants.doctor.user_id, media).await;
        assert!(doctor.is_video_off());

        let err = doctor.start_call().await.unwrap_err();
        assert_matches!(err, VideoCallError::Acquisition(MediaError::DeviceUnavailable(_)));
        assert_eq!(doctor.phase(), CallPhase::Terminated);
        assert!(store.signals().is_empty());
        assert_eq!(store.status(id), Some(ConsultationStatus::Scheduled));
        assert_eq!(
            doctor.connection_status_message(),
            "Failed to start video call. Please check your camera and microphone."
        );
    }

    #[tokio::test]
    async fn test_end_without_session_is_noop() {
        let store = InMemoryCallStore::new();
        let (id, participants) = store.seed_consultation();

        let mut media = MockMediaProvider::new();
        media.expect_acquire().never();

        let mut patient = coordinator_with_media(&store, id, &participants.patient.user_id, media).await;
        patient.end_call().await.unwrap();

        assert_eq!(patient.phase(), CallPhase::Idle);
        assert_eq!(store.status(id), Some(ConsultationStatus::Scheduled));
        assert!(!patient.toggle_mute());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(format_duration(Duration::from_secs(75)), "01:15");
        assert_eq!(format_duration(Duration::from_secs(3600)), "60:00");
    }
}

// libs/video-call-cell/src/coordinator/machine.rs
//! Pure call-session state machine: `(role, phase, event) -> (phase, effects)`.
//! The coordinator executes the effects; nothing in here performs I/O.

use serde::Serialize;

use crate::coordinator::media::MediaError;
use crate::coordinator::transport::TransportError;
use crate::models::{CallRole, ConnectionState, VideoCallError};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    #[default]
    Idle,
    AcquiringMedia,
    Negotiating,
    Connected,
    Terminated,
}

impl CallPhase {
    /// A session exists and owns (or is about to own) devices and transport.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallPhase::AcquiringMedia | CallPhase::Negotiating | CallPhase::Connected
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    Acquisition(MediaError),
    Transport(String),
    Timeout { seconds: u64 },
    Setup(String),
}

impl From<FailureCause> for VideoCallError {
    fn from(cause: FailureCause) -> Self {
        match cause {
            FailureCause::Acquisition(err) => VideoCallError::Acquisition(err),
            FailureCause::Transport(message) => {
                VideoCallError::Transport(TransportError::Failed(message))
            }
            FailureCause::Timeout { seconds } => VideoCallError::NegotiationTimeout { seconds },
            FailureCause::Setup(message) => VideoCallError::Negotiation { message },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StartRequested,
    MediaAcquired,
    RemoteTrackReceived,
    TransportStateChanged(ConnectionState),
    NegotiationTimedOut { seconds: u64 },
    Failed(FailureCause),
    EndRequested,
    /// The owner went away without ending the call (navigation, shutdown).
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallEffect {
    AcquireMedia,
    OpenTransport,
    MarkConsultationInProgress,
    SendOffer,
    StartCallClock,
    ReleaseResources,
    MarkConsultationCompleted,
    ReportFailure(FailureCause),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub phase: CallPhase,
    pub effects: Vec<CallEffect>,
}

impl Transition {
    fn to(phase: CallPhase, effects: Vec<CallEffect>) -> Self {
        Self { phase, effects }
    }

    fn stay(phase: CallPhase) -> Self {
        Self { phase, effects: Vec::new() }
    }
}

pub fn transition(role: CallRole, phase: CallPhase, event: &CallEvent) -> Transition {
    use CallEffect::*;
    use CallPhase::*;

    match (phase, event) {
        (Idle | Terminated, CallEvent::StartRequested) => Transition::to(AcquiringMedia, vec![AcquireMedia]),

        (AcquiringMedia, CallEvent::MediaAcquired) => {
            let mut effects = vec![OpenTransport, MarkConsultationInProgress];
            // Only the initiator ever offers.
            if role == CallRole::Initiator {
                effects.push(SendOffer);
            }
            Transition::to(Negotiating, effects)
        }

        (Negotiating, CallEvent::RemoteTrackReceived) => Transition::to(Connected, vec![StartCallClock]),

        (Negotiating | Connected, CallEvent::TransportStateChanged(ConnectionState::Failed)) => {
            Transition::to(
                Terminated,
                vec![
                    ReleaseResources,
                    ReportFailure(FailureCause::Transport(
                        "peer connection reported failed".to_string(),
                    )),
                ],
            )
        }

        (Connected, CallEvent::TransportStateChanged(ConnectionState::Disconnected)) => {
            Transition::to(Terminated, vec![ReleaseResources])
        }

        (Negotiating, CallEvent::NegotiationTimedOut { seconds }) => Transition::to(
            Terminated,
            vec![
                ReleaseResources,
                ReportFailure(FailureCause::Timeout { seconds: *seconds }),
            ],
        ),

        (AcquiringMedia | Negotiating | Connected, CallEvent::Failed(cause)) => Transition::to(
            Terminated,
            vec![ReleaseResources, ReportFailure(cause.clone())],
        ),

        (AcquiringMedia | Negotiating | Connected, CallEvent::EndRequested) => Transition::to(
            Terminated,
            vec![ReleaseResources, MarkConsultationCompleted],
        ),

        (AcquiringMedia | Negotiating | Connected, CallEvent::Abandoned) => {
            Transition::to(Terminated, vec![ReleaseResources])
        }

        (current, _) => Transition::stay(current),
    }
}

/// Holds the current phase for one participant's session.
#[derive(Debug, Clone)]
pub struct CallStateMachine {
    role: CallRole,
    phase: CallPhase,
}

impl CallStateMachine {
    pub fn new(role: CallRole) -> Self {
        Self {
            role,
            phase: CallPhase::Idle,
        }
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn handle(&mut self, event: &CallEvent) -> Vec<CallEffect> {
        let Transition { phase, effects } = transition(self.role, self.phase, event);
        self.phase = phase;
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offers_in(effects: &[CallEffect]) -> usize {
        effects.iter().filter(|e| **e == CallEffect::SendOffer).count()
    }

    #[test]
    fn test_only_initiator_offers() {
        let initiator = transition(CallRole::Initiator, CallPhase::AcquiringMedia, &CallEvent::MediaAcquired);
        let responder = transition(CallRole::Responder, CallPhase::AcquiringMedia, &CallEvent::MediaAcquired);

        assert_eq!(initiator.phase, CallPhase::Negotiating);
        assert_eq!(responder.phase, CallPhase::Negotiating);
        assert_eq!(offers_in(&initiator.effects), 1);
        assert_eq!(offers_in(&responder.effects), 0);
    }

    #[test]
    fn test_status_marked_before_offer() {
        let t = transition(CallRole::Initiator, CallPhase::AcquiringMedia, &CallEvent::MediaAcquired);
        let mark = t.effects.iter().position(|e| *e == CallEffect::MarkConsultationInProgress);
        let offer = t.effects.iter().position(|e| *e == CallEffect::SendOffer);
        assert!(mark.unwrap() < offer.unwrap());
    }

    #[test]
    fn test_full_happy_path() {
        let mut machine = CallStateMachine::new(CallRole::Initiator);

        assert_eq!(machine.handle(&CallEvent::StartRequested), vec![CallEffect::AcquireMedia]);
        machine.handle(&CallEvent::MediaAcquired);
        machine.handle(&CallEvent::TransportStateChanged(ConnectionState::Connecting));
        assert_eq!(machine.phase(), CallPhase::Negotiating);

        assert_eq!(machine.handle(&CallEvent::RemoteTrackReceived), vec![CallEffect::StartCallClock]);
        assert_eq!(machine.phase(), CallPhase::Connected);

        // Audio and video each raise a track event.
        assert!(machine.handle(&CallEvent::RemoteTrackReceived).is_empty());

        let effects = machine.handle(&CallEvent::EndRequested);
        assert_eq!(effects, vec![CallEffect::ReleaseResources, CallEffect::MarkConsultationCompleted]);
        assert_eq!(machine.phase(), CallPhase::Terminated);
    }

    #[test]
    fn test_acquisition_failure_terminates_without_status_change() {
        let mut machine = CallStateMachine::new(CallRole::Responder);
        machine.handle(&CallEvent::StartRequested);

        let effects = machine.handle(&CallEvent::Failed(FailureCause::Acquisition(MediaError::PermissionDenied)));
        assert_eq!(machine.phase(), CallPhase::Terminated);
        assert!(effects.contains(&CallEffect::ReleaseResources));
        assert!(!effects.contains(&CallEffect::MarkConsultationCompleted));
    }

    #[test]
    fn test_transport_failure_and_disconnect() {
        let failed = transition(
            CallRole::Initiator,
            CallPhase::Negotiating,
            &CallEvent::TransportStateChanged(ConnectionState::Failed),
        );
        assert_eq!(failed.phase, CallPhase::Terminated);
        assert!(matches!(failed.effects.last(), Some(CallEffect::ReportFailure(FailureCause::Transport(_)))));

        // A transient disconnect while still negotiating is not terminal.
        let negotiating = transition(
            CallRole::Initiator,
            CallPhase::Negotiating,
            &CallEvent::TransportStateChanged(ConnectionState::Disconnected),
        );
        assert_eq!(negotiating.phase, CallPhase::Negotiating);

        let connected = transition(
            CallRole::Initiator,
            CallPhase::Connected,
            &CallEvent::TransportStateChanged(ConnectionState::Disconnected),
        );
        assert_eq!(connected.phase, CallPhase::Terminated);
        assert_eq!(connected.effects, vec![CallEffect::ReleaseResources]);
    }

    #[test]
    fn test_start_while_active_is_noop() {
        for phase in [CallPhase::AcquiringMedia, CallPhase::Negotiating, CallPhase::Connected] {
            let t = transition(CallRole::Initiator, phase, &CallEvent::StartRequested);
            assert_eq!(t.phase, phase);
            assert!(t.effects.is_empty());
        }
    }

    #[test]
    fn test_restart_after_termination() {
        let t = transition(CallRole::Initiator, CallPhase::Terminated, &CallEvent::StartRequested);
        assert_eq!(t.phase, CallPhase::AcquiringMedia);
    }

    #[test]
    fn test_timeout_only_applies_while_negotiating() {
        let event = CallEvent::NegotiationTimedOut { seconds: 30 };
        assert_eq!(
            transition(CallRole::Responder, CallPhase::Negotiating, &event).phase,
            CallPhase::Terminated
        );
        assert_eq!(
            transition(CallRole::Responder, CallPhase::Connected, &event).phase,
            CallPhase::Connected
        );
    }

    #[test]
    fn test_idle_ignores_end_and_abandon() {
        assert!(transition(CallRole::Initiator, CallPhase::Idle, &CallEvent::EndRequested).effects.is_empty());
        assert!(transition(CallRole::Initiator, CallPhase::Idle, &CallEvent::Abandoned).effects.is_empty());
    }
}

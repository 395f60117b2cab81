// libs/video-call-cell/src/coordinator/inbox.rs
//! Per-session filter between the signal relay and the peer transport.
//!
//! The relay hands back the most recent signals on every fetch, so the same
//! message is seen many times. The inbox decides what each message means for
//! this session exactly once, and holds ICE candidates back until a remote
//! description exists for them to attach to.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{
    CallRole, IceCandidate, SdpType, SessionDescription, SignalKind, SignalMessage,
};

#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreReason {
    WrongConsultation,
    NotAddressedToUs,
    Duplicate,
    /// Older than the current call attempt.
    Stale,
    UnexpectedKind(SignalKind),
    DescriptionAlreadyApplied,
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboxDecision {
    ApplyOffer(SessionDescription),
    ApplyAnswer(SessionDescription),
    ApplyCandidate(IceCandidate),
    Buffered,
    Ignored(IgnoreReason),
}

#[derive(Debug)]
pub struct SignalInbox {
    consultation_id: Uuid,
    local_user_id: String,
    role: CallRole,
    cutoff: Option<DateTime<Utc>>,
    seen_ids: HashSet<Uuid>,
    known_candidates: HashSet<IceCandidate>,
    pending_candidates: Vec<IceCandidate>,
    remote_description_set: bool,
}

impl SignalInbox {
    pub fn new(consultation_id: Uuid, local_user_id: impl Into<String>, role: CallRole) -> Self {
        Self {
            consultation_id,
            local_user_id: local_user_id.into(),
            role,
            cutoff: None,
            seen_ids: HashSet::new(),
            known_candidates: HashSet::new(),
            pending_candidates: Vec::new(),
            remote_description_set: false,
        }
    }

    /// Signals stamped before `cutoff` are treated as leftovers of an earlier attempt.
    pub fn set_cutoff(&mut self, cutoff: Option<DateTime<Utc>>) {
        self.cutoff = cutoff;
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn accept(&mut self, message: &SignalMessage) -> InboxDecision {
        if message.consultation_id != self.consultation_id {
            return InboxDecision::Ignored(IgnoreReason::WrongConsultation);
        }
        if message.target_user_id != self.local_user_id {
            return InboxDecision::Ignored(IgnoreReason::NotAddressedToUs);
        }
        if !self.seen_ids.insert(message.id) {
            return InboxDecision::Ignored(IgnoreReason::Duplicate);
        }
        if let Some(cutoff) = self.cutoff {
            if message.timestamp < cutoff {
                return InboxDecision::Ignored(IgnoreReason::Stale);
            }
        }

        match (message.signal.kind, self.role) {
            (SignalKind::Offer, CallRole::Responder) => {
                self.description(message, SdpType::Offer).map_or_else(InboxDecision::Ignored, InboxDecision::ApplyOffer)
            }
            (SignalKind::Answer, CallRole::Initiator) => {
                self.description(message, SdpType::Answer).map_or_else(InboxDecision::Ignored, InboxDecision::ApplyAnswer)
            }
            (SignalKind::IceCandidate, _) => self.candidate(message),
            (kind, _) => InboxDecision::Ignored(IgnoreReason::UnexpectedKind(kind)),
        }
    }

    /// Records that the remote description was applied and hands back the
    /// buffered candidates in arrival order.
    pub fn mark_remote_description_set(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        std::mem::take(&mut self.pending_candidates)
    }

    fn description(
        &self,
        message: &SignalMessage,
        expected: SdpType,
    ) -> Result<SessionDescription, IgnoreReason> {
        // One description per attempt; later duplicates under new ids are dropped.
        if self.remote_description_set {
            return Err(IgnoreReason::DescriptionAlreadyApplied);
        }

        let description: SessionDescription = serde_json::from_value(message.signal.data.clone())
            .map_err(|e| IgnoreReason::Malformed(e.to_string()))?;

        if description.sdp_type != expected {
            return Err(IgnoreReason::Malformed(format!(
                "{} signal carried a {:?} description",
                message.signal.kind, description.sdp_type
            )));
        }
        if description.sdp.trim().is_empty() {
            return Err(IgnoreReason::Malformed("empty sdp".to_string()));
        }

        Ok(description)
    }

    fn candidate(&mut self, message: &SignalMessage) -> InboxDecision {
        let candidate: IceCandidate = match serde_json::from_value(message.signal.data.clone()) {
            Ok(candidate) => candidate,
            Err(e) => return InboxDecision::Ignored(IgnoreReason::Malformed(e.to_string())),
        };

        if !self.known_candidates.insert(candidate.clone()) {
            return InboxDecision::Ignored(IgnoreReason::Duplicate);
        }

        if self.remote_description_set {
            InboxDecision::ApplyCandidate(candidate)
        } else {
            self.pending_candidates.push(candidate);
            InboxDecision::Buffered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalPayload;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use serde_json::json;

    const DOCTOR: &str = "doctor-user";
    const PATIENT: &str = "patient-user";

    fn message(consultation_id: Uuid, to: &str, kind: SignalKind, data: serde_json::Value) -> SignalMessage {
        SignalMessage {
            id: Uuid::new_v4(),
            consultation_id,
            from_user_id: if to == DOCTOR { PATIENT } else { DOCTOR }.to_string(),
            target_user_id: to.to_string(),
            signal: SignalPayload { kind, data },
            timestamp: Utc::now(),
        }
    }

    fn offer(consultation_id: Uuid) -> SignalMessage {
        message(consultation_id, PATIENT, SignalKind::Offer, json!({"type": "offer", "sdp": "v=0 offer"}))
    }

    fn answer(consultation_id: Uuid) -> SignalMessage {
        message(consultation_id, DOCTOR, SignalKind::Answer, json!({"type": "answer", "sdp": "v=0 answer"}))
    }

    fn candidate(consultation_id: Uuid, to: &str, n: u16) -> SignalMessage {
        message(
            consultation_id,
            to,
            SignalKind::IceCandidate,
            json!({"candidate": format!("candidate:{} 1 udp 2122260223 10.0.0.{} 5000 typ host", n, n), "sdpMid": "0", "sdpMLineIndex": 0}),
        )
    }

    #[test]
    fn test_responder_applies_offer_once() {
        let id = Uuid::new_v4();
        let mut inbox = SignalInbox::new(id, PATIENT, CallRole::Responder);
        let msg = offer(id);

        assert_matches!(inbox.accept(&msg), InboxDecision::ApplyOffer(d) if d.sdp == "v=0 offer");
        assert_eq!(inbox.accept(&msg), InboxDecision::Ignored(IgnoreReason::Duplicate));
    }

    #[test]
    fn test_role_filters_description_kinds() {
        let id = Uuid::new_v4();
        let mut doctor = SignalInbox::new(id, DOCTOR, CallRole::Initiator);
        let mut patient = SignalInbox::new(id, PATIENT, CallRole::Responder);

        let mut stray_offer = offer(id);
        stray_offer.target_user_id = DOCTOR.to_string();
        assert_eq!(
            doctor.accept(&stray_offer),
            InboxDecision::Ignored(IgnoreReason::UnexpectedKind(SignalKind::Offer))
        );

        let mut stray_answer = answer(id);
        stray_answer.target_user_id = PATIENT.to_string();
        assert_eq!(
            patient.accept(&stray_answer),
            InboxDecision::Ignored(IgnoreReason::UnexpectedKind(SignalKind::Answer))
        );
    }

    #[test]
    fn test_second_answer_ignored_after_remote_description() {
        let id = Uuid::new_v4();
        let mut inbox = SignalInbox::new(id, DOCTOR, CallRole::Initiator);

        assert_matches!(inbox.accept(&answer(id)), InboxDecision::ApplyAnswer(_));
        inbox.mark_remote_description_set();

        assert_eq!(
            inbox.accept(&answer(id)),
            InboxDecision::Ignored(IgnoreReason::DescriptionAlreadyApplied)
        );
    }

    #[test]
    fn test_candidates_buffered_until_remote_description() {
        let id = Uuid::new_v4();
        let mut inbox = SignalInbox::new(id, PATIENT, CallRole::Responder);

        let first = candidate(id, PATIENT, 1);
        let second = candidate(id, PATIENT, 2);
        assert_eq!(inbox.accept(&first), InboxDecision::Buffered);
        assert_eq!(inbox.accept(&second), InboxDecision::Buffered);
        assert_eq!(inbox.pending_candidates(), 2);

        assert_matches!(inbox.accept(&offer(id)), InboxDecision::ApplyOffer(_));
        let drained = inbox.mark_remote_description_set();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].candidate.contains("10.0.0.1"));
        assert!(drained[1].candidate.contains("10.0.0.2"));
        assert_eq!(inbox.pending_candidates(), 0);

        assert_matches!(inbox.accept(&candidate(id, PATIENT, 3)), InboxDecision::ApplyCandidate(_));
    }

    #[test]
    fn test_same_candidate_under_new_id_is_duplicate() {
        let id = Uuid::new_v4();
        let mut inbox = SignalInbox::new(id, DOCTOR, CallRole::Initiator);
        inbox.mark_remote_description_set();

        let original = candidate(id, DOCTOR, 7);
        let mut republished = original.clone();
        republished.id = Uuid::new_v4();

        assert_matches!(inbox.accept(&original), InboxDecision::ApplyCandidate(_));
        assert_eq!(inbox.accept(&republished), InboxDecision::Ignored(IgnoreReason::Duplicate));
    }

    #[test]
    fn test_stale_signals_dropped() {
        let id = Uuid::new_v4();
        let mut inbox = SignalInbox::new(id, PATIENT, CallRole::Responder);
        inbox.set_cutoff(Some(Utc::now()));

        let mut old = offer(id);
        old.timestamp = Utc::now() - Duration::minutes(10);
        assert_eq!(inbox.accept(&old), InboxDecision::Ignored(IgnoreReason::Stale));

        let mut fresh = offer(id);
        fresh.timestamp = Utc::now() + Duration::seconds(1);
        assert_matches!(inbox.accept(&fresh), InboxDecision::ApplyOffer(_));
    }

    #[test]
    fn test_foreign_messages_ignored() {
        let id = Uuid::new_v4();
        let mut inbox = SignalInbox::new(id, PATIENT, CallRole::Responder);

        assert_eq!(
            inbox.accept(&offer(Uuid::new_v4())),
            InboxDecision::Ignored(IgnoreReason::WrongConsultation)
        );
        assert_eq!(
            inbox.accept(&candidate(id, DOCTOR, 1)),
            InboxDecision::Ignored(IgnoreReason::NotAddressedToUs)
        );
    }

    #[test]
    fn test_malformed_payloads_dropped() {
        let id = Uuid::new_v4();
        let mut inbox = SignalInbox::new(id, PATIENT, CallRole::Responder);

        let garbage = message(id, PATIENT, SignalKind::Offer, json!({"nonsense": true}));
        assert_matches!(inbox.accept(&garbage), InboxDecision::Ignored(IgnoreReason::Malformed(_)));

        let mislabelled = message(id, PATIENT, SignalKind::Offer, json!({"type": "answer", "sdp": "v=0"}));
        assert_matches!(inbox.accept(&mislabelled), InboxDecision::Ignored(IgnoreReason::Malformed(_)));

        let bad_candidate = message(id, PATIENT, SignalKind::IceCandidate, json!("not-a-candidate"));
        assert_matches!(inbox.accept(&bad_candidate), InboxDecision::Ignored(IgnoreReason::Malformed(_)));

        // A good offer still goes through afterwards.
        assert_matches!(inbox.accept(&offer(id)), InboxDecision::ApplyOffer(_));
    }
}

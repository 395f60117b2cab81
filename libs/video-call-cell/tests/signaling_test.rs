use assert_matches::assert_matches;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_utils::test_utils::{MockSupabaseResponses, TestConfig, TestUser};
use video_call_cell::models::{ConsultationStatus, NewSignal, SignalKind, VideoCallError};
use video_call_cell::services::{ConsultationStore, SignalRelay, SignalingService, SupabaseCallStore};

const TOKEN: &str = "test-token";

struct Setup {
    server: MockServer,
    service: SignalingService,
    config: shared_config::AppConfig,
    consultation_id: Uuid,
    doctor: TestUser,
    patient: TestUser,
}

async fn setup() -> Setup {
    let server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(server.uri()).to_app_config();

    let consultation_id = Uuid::new_v4();
    let patient_profile = Uuid::new_v4();
    let doctor_profile = Uuid::new_v4();
    let doctor = TestUser::doctor("doctor@example.com");
    let patient = TestUser::patient("patient@example.com");

    let mut in_progress = MockSupabaseResponses::consultation_response(
        &consultation_id.to_string(),
        &patient_profile.to_string(),
        &doctor_profile.to_string(),
        "scheduled",
    );

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([in_progress.clone()])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::profile_response(&patient_profile.to_string(), &patient.id, "Pat Patient", "patient"),
            MockSupabaseResponses::profile_response(&doctor_profile.to_string(), &doctor.id, "Dr. Doc", "doctor")
        ])))
        .mount(&server)
        .await;

    in_progress["status"] = json!("in_progress");
    in_progress["call_started_at"] = json!("2024-06-01T10:00:00Z");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([in_progress])))
        .mount(&server)
        .await;

    Setup {
        server,
        service: SignalingService::new(&config),
        config,
        consultation_id,
        doctor,
        patient,
    }
}

#[tokio::test]
async fn test_participants_resolved_from_profiles() {
    let s = setup().await;

    let participants = s
        .service
        .get_call_participants(s.consultation_id, TOKEN)
        .await
        .unwrap();

    assert_eq!(participants.doctor.user_id, s.doctor.id);
    assert_eq!(participants.patient.user_id, s.patient.id);
    assert_eq!(participants.doctor.name, "Dr. Doc");
}

#[tokio::test]
async fn test_missing_profile_is_validation_error() {
    let server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(server.uri()).to_app_config();
    let consultation_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::consultation_response(
                &consultation_id.to_string(),
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                "scheduled"
            )
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let service = SignalingService::new(&config);
    let result = service.get_call_participants(consultation_id, TOKEN).await;

    assert_matches!(result, Err(VideoCallError::ValidationError { .. }));
}

#[tokio::test]
async fn test_send_signal_persists_row() {
    let s = setup().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/signals"))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({
            "consultation_id": s.consultation_id,
            "from_user_id": s.doctor.id,
            "target_user_id": s.patient.id,
            "signal": { "type": "offer" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&s.server)
        .await;

    let request = serde_json::from_value(json!({
        "target_user_id": s.patient.id,
        "signal": { "type": "offer", "data": { "type": "offer", "sdp": "v=0" } }
    }))
    .unwrap();

    let message = s
        .service
        .send_signal(s.consultation_id, request, &s.doctor.to_user(), TOKEN)
        .await
        .unwrap();

    assert_eq!(message.signal.kind, SignalKind::Offer);
    assert_eq!(message.from_user_id, s.doctor.id);
}

#[tokio::test]
async fn test_get_signals_oldest_first() {
    let s = setup().await;
    let cid = s.consultation_id.to_string();

    // PostgREST returns newest first for `order=timestamp.desc`.
    Mock::given(method("GET"))
        .and(path("/rest/v1/signals"))
        .and(query_param("order", "timestamp.desc"))
        .and(query_param("limit", "50"))
        .and(query_param("target_user_id", format!("eq.{}", s.patient.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::signal_response(&cid, &s.doctor.id, &s.patient.id, "ice-candidate", 1),
            MockSupabaseResponses::signal_response(&cid, &s.doctor.id, &s.patient.id, "offer", 5)
        ])))
        .mount(&s.server)
        .await;

    let signals = s
        .service
        .get_signals(s.consultation_id, &s.patient.to_user(), TOKEN)
        .await
        .unwrap();

    assert_eq!(signals.len(), 2);
    assert_eq!(signals[0].signal.kind, SignalKind::Offer);
    assert_eq!(signals[1].signal.kind, SignalKind::IceCandidate);
    assert!(signals[0].timestamp < signals[1].timestamp);
}

#[tokio::test]
async fn test_initiate_call_marks_in_progress() {
    let s = setup().await;

    let response = s
        .service
        .initiate_call(s.consultation_id, &s.doctor.to_user(), TOKEN)
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.call_started_at.to_rfc3339(), "2024-06-01T10:00:00+00:00");
    assert_eq!(response.room_id, Some(format!("room-{}", s.consultation_id)));
}

#[tokio::test]
async fn test_outsider_cannot_update_status() {
    let s = setup().await;
    let outsider = TestUser::patient("outsider@example.com");

    let result = s
        .service
        .update_consultation_status(
            s.consultation_id,
            ConsultationStatus::Completed,
            None,
            &outsider.to_user(),
            TOKEN,
        )
        .await;

    assert_matches!(result, Err(VideoCallError::Unauthorized));
}

#[tokio::test]
async fn test_database_error_surfaces() {
    let server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(server.uri()).to_app_config();

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(500).set_body_json(
            MockSupabaseResponses::error_response("boom", "500"),
        ))
        .mount(&server)
        .await;

    let service = SignalingService::new(&config);
    let result = service.get_consultation(Uuid::new_v4(), TOKEN).await;

    assert_matches!(result, Err(VideoCallError::DatabaseError { .. }));
}

// ==============================================================================
// CALL STORE ADAPTER
// ==============================================================================

fn call_store(s: &Setup, user: &TestUser) -> SupabaseCallStore {
    SupabaseCallStore::new(Arc::new(SignalingService::new(&s.config)), user.to_user(), TOKEN)
}

#[tokio::test]
async fn test_call_store_refuses_foreign_inbox() {
    let s = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/signals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&s.server)
        .await;

    let store = call_store(&s, &s.patient);
    let result = store.fetch(s.consultation_id, &s.doctor.id).await;

    assert_matches!(result, Err(VideoCallError::Unauthorized));
}

#[tokio::test]
async fn test_call_store_fetches_own_inbox() {
    let s = setup().await;
    let cid = s.consultation_id.to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/signals"))
        .and(query_param("target_user_id", format!("eq.{}", s.patient.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::signal_response(&cid, &s.doctor.id, &s.patient.id, "offer", 2)
        ])))
        .expect(1)
        .mount(&s.server)
        .await;

    let store = call_store(&s, &s.patient);
    let signals = store.fetch(s.consultation_id, &s.patient.id).await.unwrap();

    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].signal.kind, SignalKind::Offer);
}

#[tokio::test]
async fn test_call_store_publishes_as_signed_in_user() {
    let s = setup().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/signals"))
        .and(body_partial_json(json!({
            "consultation_id": s.consultation_id,
            "from_user_id": s.patient.id,
            "target_user_id": s.doctor.id,
            "signal": { "type": "answer" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&s.server)
        .await;

    let store = call_store(&s, &s.patient);
    let message = store
        .publish(NewSignal {
            consultation_id: s.consultation_id,
            target_user_id: s.doctor.id.clone(),
            signal: serde_json::from_value(json!({
                "type": "answer",
                "data": { "type": "answer", "sdp": "v=0" }
            }))
            .unwrap(),
        })
        .await
        .unwrap();

    assert_eq!(message.from_user_id, s.patient.id);
    assert_eq!(message.target_user_id, s.doctor.id);
    assert_eq!(message.signal.kind, SignalKind::Answer);
}

#[tokio::test]
async fn test_call_store_patches_status() {
    let s = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/consultations"))
        .and(query_param("id", format!("eq.{}", s.consultation_id)))
        .and(body_partial_json(json!({ "status": "completed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::consultation_response(
                &s.consultation_id.to_string(),
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                "completed"
            )
        ])))
        .with_priority(1)
        .expect(1)
        .mount(&s.server)
        .await;

    let store = call_store(&s, &s.doctor);
    let result = store
        .patch_status(s.consultation_id, ConsultationStatus::Completed)
        .await;

    assert!(result.is_ok());
}

// libs/video-call-cell/src/lib.rs
//! # Video Call Cell
//!
//! Peer-to-peer consultation calls between a doctor and a patient. Media
//! flows directly between the two participants; this cell only carries the
//! negotiation messages and keeps the consultation status in step.
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------------+
//! |                     Video Call Cell                        |
//! +------------------------------------------------------------+
//! |  handlers.rs        |  HTTP endpoint handlers              |
//! |  router.rs          |  Route definitions                   |
//! |  models.rs          |  Consultation, signal and error types|
//! |  services/          |  Relay and status persistence        |
//! |    signaling.rs     |  Supabase-backed signal relay        |
//! |    store.rs         |  Store seams used by the coordinator |
//! |  coordinator/       |  Client-side call session driver     |
//! |    machine.rs       |  Pure phase transitions              |
//! |    inbox.rs         |  Dedupe, staleness, ICE buffering    |
//! |    media.rs         |  Camera/microphone seam              |
//! |    transport.rs     |  Peer transport seam                 |
//! |  testing.rs         |  In-memory doubles                   |
//! +------------------------------------------------------------+
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /consultations/{id}` - Consultation and the caller's role
//! - `PATCH /consultations/{id}/status` - Update consultation status
//! - `POST /consultations/{id}/call` - Mark in progress, stamp `call_started_at`
//! - `GET /consultations/{id}/participants` - Doctor and patient profiles
//! - `POST /consultations/{id}/signals` - Send offer/answer/ICE candidate
//! - `GET /consultations/{id}/signals` - Recent signals addressed to the caller
//! - `GET /ice-servers` - STUN/TURN servers for the peer transport
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use video_call_cell::router::video_call_routes;
//! use shared_config::AppConfig;
//! use std::sync::Arc;
//!
//! let config = Arc::new(AppConfig::from_env());
//! let call_routes = video_call_routes(config);
//! ```
//!
//! Driving a call from a client:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use video_call_cell::coordinator::{CallSessionCoordinator, CoordinatorDeps, CoordinatorSettings};
//! use video_call_cell::testing::{FakeMediaProvider, FakeTransportFactory, InMemoryCallStore};
//!
//! # async fn demo() -> Result<(), video_call_cell::models::VideoCallError> {
//! let store = InMemoryCallStore::new();
//! let (consultation_id, participants) = store.seed_consultation();
//! let client = Arc::new(store.client_for(&participants.doctor.user_id));
//!
//! let deps = CoordinatorDeps {
//!     relay: client.clone(),
//!     consultations: client,
//!     media: Arc::new(FakeMediaProvider::granting()),
//!     transports: Arc::new(FakeTransportFactory::new()),
//! };
//! let mut call = CallSessionCoordinator::new(
//!     consultation_id,
//!     participants.doctor.user_id.clone(),
//!     deps,
//!     CoordinatorSettings::default(),
//! )
//! .await?;
//!
//! call.start_call().await?;
//! call.toggle_mute();
//! call.end_call().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! - `ICE_SERVER_URLS` - Comma-separated STUN/TURN urls (defaults to public STUN)
//! - `CALL_NEGOTIATION_TIMEOUT_SECS` - Give up when no remote media arrives (default 60)
//! - `SIGNAL_POLL_INTERVAL_MS` - Relay polling interval (default 1000)
//! - `SIGNAL_FETCH_LIMIT` - Recent signals returned per fetch (default 50)

pub mod coordinator;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod testing;

pub use coordinator::{CallSessionCoordinator, CallSnapshot, CoordinatorDeps, CoordinatorSettings};
pub use models::VideoCallError;
pub use router::video_call_routes;

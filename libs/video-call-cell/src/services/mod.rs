// libs/video-call-cell/src/services/mod.rs

pub mod signaling;
pub mod store;

pub use signaling::SignalingService;
pub use store::{ConsultationStore, SignalRelay, SupabaseCallStore};

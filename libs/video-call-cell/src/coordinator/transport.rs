// libs/video-call-cell/src/coordinator/transport.rs
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use shared_config::AppConfig;

use crate::coordinator::media::{MediaTrack, TrackKind};
use crate::models::{ConnectionState, IceCandidate, IceServer, SessionDescription};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer connection failed: {0}")]
    Failed(String),
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("invalid ICE candidate: {0}")]
    InvalidCandidate(String),
    #[error("peer connection is closed")]
    Closed,
}

/// Native transport callbacks, translated into events the coordinator drains.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack { track_id: String, kind: TrackKind },
    StateChanged(ConnectionState),
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServer>,
}

impl TransportConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            ice_servers: config
                .ice_server_urls
                .iter()
                .map(|url| IceServer {
                    urls: vec![url.clone()],
                    username: None,
                    credential: None,
                })
                .collect(),
        }
    }
}

/// One peer-to-peer media transport. Never reused across call attempts.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), TransportError>;
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<(), TransportError>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), TransportError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;
    async fn close(&self);
    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        config: &TransportConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}

pub mod connection;
pub mod ice;
pub mod session;
pub mod types;

pub use connection::{RtcPeer, RtcPeerFactory};
pub use session::PeerSession;
pub use types::{IceCandidate, SdpType, ServerConfig, SessionDescription};

use crate::config::CallConfig;
use crate::error::PeerError;
use crate::media::MediaTrack;
use async_trait::async_trait;
use std::sync::Arc;

/// `None` означает конец сбора кандидатов
pub type LocalCandidateHandler = Arc<dyn Fn(Option<IceCandidate>) + Send + Sync>;

pub type RemoteTrackHandler = Arc<dyn Fn(Arc<MediaTrack>) + Send + Sync>;

/// Транспорт peer connection: ICE, DTLS, RTP живут по ту сторону этого трейта
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    /// Требует уже применённого remote offer
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    fn on_local_candidate(&self, handler: LocalCandidateHandler);

    fn on_remote_track(&self, handler: RemoteTrackHandler);

    async fn close(&self) -> Result<(), PeerError>;
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, config: &CallConfig) -> Result<Arc<dyn PeerTransport>, PeerError>;
}

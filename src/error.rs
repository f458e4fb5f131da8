use thiserror::Error;

/// Ошибки хранилища документов (rendezvous store)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("room {0} has no offer yet")]
    OfferMissing(String),

    #[error("field `{field}` of {path} is write-once and already set")]
    AlreadyWritten { path: String, field: &'static str },

    #[error("malformed document: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Ошибки peer connection
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer connection is closed")]
    Closed,

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<webrtc::Error> for PeerError {
    fn from(e: webrtc::Error) -> Self {
        PeerError::Transport(e.to_string())
    }
}

/// Ошибки захвата локального медиа
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("media permission denied: {0}")]
    PermissionDenied(String),

    #[error("no capture device: {0}")]
    NoDevice(String),
}

/// Ошибки конфигурации
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid ICE server `{id}`: {reason}")]
    InvalidIceServer { id: String, reason: &'static str },

    #[error("invalid environment variable {name}: {reason}")]
    Env { name: &'static str, reason: String },

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Ошибки жизненного цикла звонка
#[derive(Debug, Error)]
pub enum CallError {
    #[error("joiner requires a non-empty room id")]
    MissingRoomId,

    #[error("a call session is already active")]
    SessionActive,

    #[error(transparent)]
    PermissionDenied(#[from] MediaError),

    #[error("room {0} does not exist")]
    RoomNotFound(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Peer(#[from] PeerError),
}

pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod rendezvous;
pub mod session;
pub mod signaling;
pub mod store;
mod utils;

pub use commands::{check_ice_server_availability, CallController};
pub use config::CallConfig;
pub use error::{CallError, ConfigError, MediaError, PeerError, StoreError};
pub use media::{LocalMedia, MediaDevices, MediaTrack, RemoteMedia, SampleDevices};
pub use peer::{PeerFactory, PeerSession, PeerTransport, RtcPeerFactory};
pub use rendezvous::{CandidateCollection, RendezvousClient, Room, RoomId};
pub use signaling::{CallPhase, Coordinator, MediaPermission, Role};
pub use store::{DocumentStore, MemoryStore};

use std::sync::Arc;
use std::time::Duration;

/// Сколько демо ждёт, пока хост применит answer
const LOOPBACK_ANSWER_WAIT: Duration = Duration::from_secs(5);

/// Демо: хост и joiner в одном процессе через `MemoryStore` и настоящие webrtc-rs соединения
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = CallConfig::from_env()?;
    logger::init(&config.log_filter);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("p2pcall")
        .build()?;
    runtime.block_on(loopback(config))
}

async fn loopback(config: CallConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let host = CallController::new(
        config.clone(),
        store.clone(),
        Arc::new(SampleDevices::new()),
        Arc::new(RtcPeerFactory),
    );
    let joiner = CallController::new(
        config,
        store,
        Arc::new(SampleDevices::new()),
        Arc::new(RtcPeerFactory),
    );

    let room_id = host.start(Role::Host, None).await?;
    println!("Room ID: {room_id}");

    let result = joiner.start(Role::Joiner, Some(&room_id)).await;
    if let Err(e) = &result {
        tracing::error!("Joiner failed: {e}");
    } else if let Some(peer) = host.peer().await {
        let applied = tokio::time::timeout(LOOPBACK_ANSWER_WAIT, async {
            while peer.remote_description().await.is_none() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .is_ok();
        println!("Host phase: {:?}", host.phase());
        println!("Joiner phase: {:?}", joiner.phase());
        println!("Answer applied on host: {applied}");
    }

    let joiner_summary = joiner.stop().await;
    let host_summary = host.stop().await;
    tracing::debug!("Joiner teardown: {:?}", joiner_summary);
    tracing::debug!("Host teardown: {:?}", host_summary);

    result.map(|_| ()).map_err(Into::into)
}

use crate::config::CallConfig;
use crate::error::CallError;
use crate::media::{LocalMedia, MediaConstraints, MediaDevices, MediaTrack};
use crate::peer::{PeerFactory, PeerSession};
use crate::rendezvous::{RendezvousClient, RoomId};
use crate::session::{CallSession, TeardownSummary};
use crate::signaling::{CallEvent, CallPhase, Coordinator, Effect, Role};
use crate::store::DocumentStore;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Точка входа для слоя представления: старт и завершение звонка
pub struct CallController {
    pub(crate) config: RwLock<CallConfig>,
    coordinator: Arc<Coordinator>,
    devices: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerFactory>,
    session: Mutex<Option<CallSession>>,
}

impl CallController {
    pub fn new(
        config: CallConfig,
        store: Arc<dyn DocumentStore>,
        devices: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        let rendezvous = RendezvousClient::with_collection(store, config.rooms_collection.clone());
        Self {
            config: RwLock::new(config),
            coordinator: Arc::new(Coordinator::new(rendezvous)),
            devices,
            peers,
            session: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn phase(&self) -> CallPhase {
        self.coordinator.phase()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallPhase> {
        self.coordinator.subscribe()
    }

    /// Id комнаты, как только хост её опубликовал (или joiner в неё вошёл)
    pub fn room_id(&self) -> Option<RoomId> {
        self.coordinator.room_id()
    }

    pub async fn is_active(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn local_media(&self) -> Option<LocalMedia> {
        self.session.lock().await.as_ref()?.local_media()
    }

    pub async fn remote_tracks(&self) -> Vec<Arc<MediaTrack>> {
        match self.session.lock().await.as_ref() {
            Some(session) => session.remote.tracks(),
            None => Vec::new(),
        }
    }

    pub async fn peer(&self) -> Option<Arc<PeerSession>> {
        Some(self.session.lock().await.as_ref()?.peer.clone())
    }

    /// Начинает звонок. Хост получает id новой комнаты, joiner входит в `room_id`.
    ///
    /// При отказе в доступе к медиа сессия остаётся активной в фазе
    /// `AwaitingLocalMedia(Denied)` и ждёт `stop()`.
    pub async fn start(&self, role: Role, room_id: Option<&str>) -> Result<RoomId, CallError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(CallError::SessionActive);
        }

        let room_id = match role {
            Role::Host => None,
            Role::Joiner => Some(validate_room_id(room_id)?),
        };
        tracing::info!("Starting call as {:?}", role);

        self.coordinator.dispatch(CallEvent::RoleSelected(role));
        let remote = Arc::new(crate::media::RemoteMedia::new());
        self.coordinator.dispatch(CallEvent::RemoteSinkCreated);

        let config = self.config.read().clone();
        let transport = match self.peers.create(&config).await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!("Failed to create peer connection: {e}");
                self.coordinator.dispatch(CallEvent::TornDown);
                return Err(e.into());
            }
        };
        let peer = Arc::new(PeerSession::new(transport));
        let session = slot.insert(CallSession::new(role, room_id, peer, remote));
        self.coordinator.dispatch(CallEvent::PeerCreated);

        match self.devices.get_user_media(MediaConstraints::default()).await {
            Ok(media) => {
                tracing::debug!("Local media acquired: {} tracks", media.tracks.len());
                session.set_local_media(media);
            }
            Err(e) => {
                tracing::warn!("Local media unavailable: {e}");
                self.coordinator.dispatch(CallEvent::MediaDenied);
                return Err(e.into());
            }
        }

        match self.coordinator.dispatch(CallEvent::MediaGranted) {
            Some(Effect::BeginRoomSetup) => self.coordinator.set_up_room(session).await,
            None => Err(CallError::Protocol(format!(
                "room setup did not start in {:?}",
                self.coordinator.phase()
            ))),
        }
    }

    /// Завершает звонок: подписки, локальные треки, удалённые треки, peer,
    /// комната (только хост), затем `Idle`. Ошибки уборки только логируются.
    pub async fn stop(&self) -> TeardownSummary {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            tracing::debug!("stop() without an active call");
            return TeardownSummary::default();
        };
        tracing::info!("Stopping call as {:?}", session.role);

        let mut summary = TeardownSummary {
            subscriptions_cancelled: session.subscriptions.cancel_all(),
            ..Default::default()
        };

        summary.local_tracks_stopped = session
            .local_media()
            .map_or(0, |media| media.stop_live());
        summary.remote_tracks_stopped = session.remote.stop_all();

        if let Err(e) = session.peer.close().await {
            tracing::warn!("Failed to close peer connection: {e}");
        }

        if session.role == Role::Host {
            if let Some(room_id) = session.room_id() {
                let report = self.coordinator.rendezvous().delete_room_tree(&room_id).await;
                if report.failed > 0 {
                    tracing::warn!(
                        "Room {room_id} cleanup incomplete: {} of {} deletions failed",
                        report.failed,
                        report.failed + report.deleted
                    );
                }
                summary.room_cleanup = Some(report);
            }
        }

        self.coordinator.dispatch(CallEvent::TornDown);
        drop(slot);
        summary
    }
}

fn validate_room_id(room_id: Option<&str>) -> Result<RoomId, CallError> {
    let id = room_id.map(str::trim).unwrap_or_default();
    if id.is_empty() {
        return Err(CallError::MissingRoomId);
    }
    // id должен быть одним сегментом пути
    if id.contains('/') {
        return Err(CallError::RoomNotFound(id.to_string()));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_validation() {
        assert!(matches!(validate_room_id(None), Err(CallError::MissingRoomId)));
        assert!(matches!(validate_room_id(Some("  ")), Err(CallError::MissingRoomId)));
        assert!(matches!(
            validate_room_id(Some("a/b")),
            Err(CallError::RoomNotFound(_))
        ));
        assert_eq!(validate_room_id(Some(" abc ")).unwrap(), "abc");
    }
}

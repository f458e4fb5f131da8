pub mod machine;

pub use machine::{CallEvent, CallPhase, Effect, Machine, MediaPermission, Role};

use crate::error::CallError;
use crate::rendezvous::{RendezvousClient, Room, RoomId};
use crate::session::CallSession;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

const PHASE_CHANNEL_CAPACITY: usize = 32;

fn protocol<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> CallError {
    move |cause| CallError::Protocol(format!("{context}: {cause}"))
}

/// Координатор сигналинга: единственная точка изменения фазы и протокол комнаты
pub struct Coordinator {
    rendezvous: RendezvousClient,
    machine: Mutex<Machine>,
    phases: broadcast::Sender<CallPhase>,
}

impl Coordinator {
    pub fn new(rendezvous: RendezvousClient) -> Self {
        let (phases, _) = broadcast::channel(PHASE_CHANNEL_CAPACITY);
        Self {
            rendezvous,
            machine: Mutex::new(Machine::default()),
            phases,
        }
    }

    pub fn rendezvous(&self) -> &RendezvousClient {
        &self.rendezvous
    }

    pub fn phase(&self) -> CallPhase {
        self.machine.lock().phase().clone()
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.machine.lock().room_id().map(String::from)
    }

    /// Каждая смена фазы, по порядку
    pub fn subscribe(&self) -> broadcast::Receiver<CallPhase> {
        self.phases.subscribe()
    }

    /// Единственная точка перехода. Фаза публикуется под той же блокировкой,
    /// так что подписчики видят переходы в порядке применения.
    pub fn dispatch(&self, event: CallEvent) -> Option<Effect> {
        let mut machine = self.machine.lock();
        tracing::trace!("Dispatching {:?} in {:?}", event, machine.phase());
        let transition = machine.apply(event);
        if let Some(phase) = transition.phase {
            tracing::info!("Call phase changed to {:?}", phase);
            // нет подписчиков, не ошибка
            let _ = self.phases.send(phase);
        }
        transition.effect
    }

    /// Протокол комнаты. Выполняется один раз за сессию в фазе `CreatingRoom`,
    /// любой сбой переводит звонок в `Error` с сохранённой причиной.
    pub async fn set_up_room(self: &Arc<Self>, session: &CallSession) -> Result<RoomId, CallError> {
        match self.run_room_setup(session).await {
            Ok(room_id) => {
                self.dispatch(CallEvent::SetupCompleted(room_id.clone()));
                Ok(room_id)
            }
            Err(e) => {
                tracing::error!("Room setup failed: {e}");
                self.dispatch(CallEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_room_setup(self: &Arc<Self>, session: &CallSession) -> Result<RoomId, CallError> {
        let role = session.role;
        let peer = &session.peer;

        // 1. комната: хост выделяет id, joiner ищет существующую без повторов
        let (room_id, joined_room) = match role {
            Role::Host => {
                let id = self.rendezvous.create_room();
                session.set_room_id(id.clone());
                (id, None)
            }
            Role::Joiner => {
                let id = session.room_id().ok_or(CallError::MissingRoomId)?;
                let room = self
                    .rendezvous
                    .get_room(&id)
                    .await
                    .map_err(protocol("room lookup"))?
                    .ok_or_else(|| CallError::RoomNotFound(id.clone()))?;
                (id, Some(room))
            }
        };
        tracing::info!("Setting up room {room_id} as {:?}", role);

        // 2. зеркальные коллекции кандидатов
        let local_collection = role.local_collection();
        let remote_collection = role.remote_collection();

        // 3. локальные треки
        let local = session
            .local_media()
            .ok_or_else(|| CallError::Protocol("local media is not acquired".into()))?;
        for track in &local.tracks {
            peer.add_track(track.clone())
                .await
                .map_err(protocol("attach local track"))?;
        }

        // 4. свои кандидаты уходят в хранилище, ошибки только логируются
        if let Some(mut candidates) = peer.local_candidates() {
            let rendezvous = self.rendezvous.clone();
            let room = room_id.clone();
            session.subscriptions.spawn("local-candidates", async move {
                while let Some(candidate) = candidates.next().await {
                    if let Err(e) = rendezvous
                        .append_candidate(&room, local_collection, &candidate)
                        .await
                    {
                        tracing::warn!("Failed to publish local candidate: {e}");
                    }
                }
            });
        }

        // 5. удалённые треки добавляются в приёмник по одному
        if let Some(mut tracks) = peer.remote_tracks() {
            let sink = session.remote.clone();
            session.subscriptions.spawn("remote-tracks", async move {
                while let Some(track) = tracks.next().await {
                    sink.add_track(track);
                }
            });
        }

        // 6. обмен offer/answer
        match joined_room {
            None => {
                let offer = peer
                    .create_offer()
                    .await
                    .map_err(protocol("create offer"))?;
                peer.set_local_description(offer.clone())
                    .await
                    .map_err(protocol("apply local offer"))?;
                self.rendezvous
                    .set_offer(&room_id, &offer)
                    .await
                    .map_err(protocol("write offer"))?;
                self.dispatch(CallEvent::RoomPublished(room_id.clone()));
                tracing::info!("Room {room_id} published, waiting for answer");

                self.watch_answer(session, &room_id);
            }
            Some(room) => {
                let offer = room
                    .offer
                    .ok_or_else(|| CallError::Protocol(format!("room {room_id} has no offer")))?;
                let answer = peer
                    .create_answer(offer)
                    .await
                    .map_err(protocol("create answer"))?;
                peer.set_local_description(answer.clone())
                    .await
                    .map_err(protocol("apply local answer"))?;
                self.rendezvous
                    .set_answer(&room_id, &answer)
                    .await
                    .map_err(protocol("write answer"))?;
            }
        }

        // 7. кандидаты пира, только добавленные
        let mut incoming = self
            .rendezvous
            .subscribe_candidates(&room_id, remote_collection);
        let remote_peer = peer.clone();
        session.subscriptions.spawn("remote-candidates", async move {
            while let Some(candidate) = incoming.next().await {
                match candidate {
                    Ok(candidate) => {
                        if let Err(e) = remote_peer.add_remote_candidate(candidate).await {
                            tracing::warn!("Failed to add remote candidate: {e}");
                        }
                    }
                    Err(e) => tracing::warn!("Skipping malformed remote candidate: {e}"),
                }
            }
        });

        Ok(room_id)
    }

    /// Хост: первый снимок с answer применяется как remote description.
    /// Повторные доставки отсекает сам `PeerSession`.
    fn watch_answer(self: &Arc<Self>, session: &CallSession, room_id: &str) {
        let mut rooms = self.rendezvous.subscribe_room(room_id);
        let peer = session.peer.clone();
        let coordinator = Arc::clone(self);
        session.subscriptions.spawn("room-answer", async move {
            while let Some(snapshot) = rooms.next().await {
                let answer = match snapshot {
                    Ok(Some(Room {
                        answer: Some(answer),
                        ..
                    })) => answer,
                    Ok(Some(_)) => continue,
                    Ok(None) => {
                        tracing::debug!("Room document is gone");
                        continue;
                    }
                    Err(e) => {
                        coordinator.dispatch(CallEvent::Failed(format!("room snapshot: {e}")));
                        break;
                    }
                };
                match peer.set_remote_description(answer).await {
                    Ok(true) => tracing::info!("Remote answer applied"),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!("Failed to apply remote answer: {e}");
                        coordinator.dispatch(CallEvent::Failed(format!("apply answer: {e}")));
                        break;
                    }
                }
            }
        });
    }
}

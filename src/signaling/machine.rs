//! Автомат жизненного цикла звонка. Чистая функция переходов: все источники
//! событий (захват медиа, снимки хранилища, протокол комнаты) проходят через `apply`.

use crate::rendezvous::{CandidateCollection, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Joiner,
}

impl Role {
    /// Куда пишем свои кандидаты
    pub fn local_collection(self) -> CandidateCollection {
        match self {
            Role::Host => CandidateCollection::Host,
            Role::Joiner => CandidateCollection::Joiner,
        }
    }

    /// Откуда читаем кандидаты пира
    pub fn remote_collection(self) -> CandidateCollection {
        match self {
            Role::Host => CandidateCollection::Joiner,
            Role::Joiner => CandidateCollection::Host,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaPermission {
    #[default]
    Pending,
    Granted,
    Denied,
}

/// Фаза звонка, видимая слою представления
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallPhase {
    #[default]
    Idle,
    AwaitingLocalMedia(MediaPermission),
    CreatingRoom,
    Ready {
        room_id: RoomId,
    },
    Error {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    RoleSelected(Role),
    PeerCreated,
    RemoteSinkCreated,
    MediaGranted,
    MediaDenied,
    /// Хост записал offer, id можно показывать
    RoomPublished(RoomId),
    SetupCompleted(RoomId),
    Failed(String),
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    BeginRoomSetup,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Transition {
    /// Новая фаза, если она изменилась
    pub phase: Option<CallPhase>,
    pub effect: Option<Effect>,
}

#[derive(Debug, Default)]
pub struct Machine {
    phase: CallPhase,
    role: Option<Role>,
    permission: MediaPermission,
    peer_ready: bool,
    sink_ready: bool,
    media_ready: bool,
    setup_started: bool,
    room_id: Option<RoomId>,
}

impl Machine {
    pub fn phase(&self) -> &CallPhase {
        &self.phase
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn apply(&mut self, event: CallEvent) -> Transition {
        let before = self.phase.clone();
        let mut effect = None;

        match event {
            CallEvent::RoleSelected(role) => {
                if self.phase == CallPhase::Idle && self.role.is_none() {
                    self.role = Some(role);
                } else {
                    tracing::warn!("Role {:?} ignored in {:?}", role, self.phase);
                }
            }
            CallEvent::PeerCreated => self.peer_ready = true,
            CallEvent::RemoteSinkCreated => self.sink_ready = true,
            CallEvent::MediaGranted => {
                self.media_ready = true;
                self.permission = MediaPermission::Granted;
            }
            CallEvent::MediaDenied => {
                self.media_ready = false;
                self.permission = MediaPermission::Denied;
            }
            CallEvent::RoomPublished(room_id) => {
                if self.phase == CallPhase::CreatingRoom {
                    self.room_id = Some(room_id);
                } else {
                    tracing::debug!("Room {room_id} published in {:?}, ignored", self.phase);
                }
            }
            CallEvent::SetupCompleted(room_id) => {
                if self.phase == CallPhase::CreatingRoom {
                    self.room_id = Some(room_id.clone());
                    self.phase = CallPhase::Ready { room_id };
                } else {
                    tracing::debug!("Setup of {room_id} completed in {:?}, ignored", self.phase);
                }
            }
            CallEvent::Failed(reason) => {
                if self.phase != CallPhase::Idle {
                    self.phase = CallPhase::Error { reason };
                } else {
                    tracing::debug!("Failure while idle ignored: {reason}");
                }
            }
            CallEvent::TornDown => *self = Machine::default(),
        }

        // idle -> awaitingLocalMedia: peer и пустой приёмник уже есть
        if self.phase == CallPhase::Idle && self.role.is_some() && self.peer_ready && self.sink_ready
        {
            self.phase = CallPhase::AwaitingLocalMedia(self.permission);
        }
        if let CallPhase::AwaitingLocalMedia(permission) = &mut self.phase {
            *permission = self.permission;
        }

        // барьер: все четыре условия одновременно, и только один раз за сессию
        if matches!(self.phase, CallPhase::AwaitingLocalMedia(_))
            && self.peer_ready
            && self.media_ready
            && self.sink_ready
            && self.role.is_some()
            && !self.setup_started
        {
            self.setup_started = true;
            self.phase = CallPhase::CreatingRoom;
            effect = Some(Effect::BeginRoomSetup);
        }

        Transition {
            phase: (self.phase != before).then(|| self.phase.clone()),
            effect,
        }
    }
}

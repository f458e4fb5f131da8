#![allow(dead_code)]

use async_trait::async_trait;
use p2pcall_lib::config::CallConfig;
use p2pcall_lib::error::{MediaError, PeerError, StoreError};
use p2pcall_lib::media::{LocalMedia, MediaConstraints, MediaDevices, MediaTrack, SampleDevices, TrackKind};
use p2pcall_lib::peer::types::{IceCandidate, SessionDescription};
use p2pcall_lib::peer::{LocalCandidateHandler, PeerFactory, PeerTransport, RemoteTrackHandler};
use p2pcall_lib::store::{Document, DocumentChange, DocumentStore, MemoryStore, SnapshotStream};
use p2pcall_lib::{CallController, CallPhase};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 192.168.1.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

#[derive(Default)]
pub struct FakeState {
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub remote_sets: usize,
    pub candidates: Vec<IceCandidate>,
    pub tracks: Vec<Arc<MediaTrack>>,
    pub closed: bool,
}

/// Транспорт без сети: при установке local description выдаёт `emit` кандидатов и маркер
/// конца сбора, при установке remote description отдаёт один удалённый видеотрек.
pub struct FakeTransport {
    pub name: String,
    pub emit: u32,
    pub fail_remote: bool,
    pub state: Mutex<FakeState>,
    on_candidate: Mutex<Option<LocalCandidateHandler>>,
    on_track: Mutex<Option<RemoteTrackHandler>>,
}

impl FakeTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            emit: 2,
            fail_remote: false,
            state: Mutex::new(FakeState::default()),
            on_candidate: Mutex::new(None),
            on_track: Mutex::new(None),
        }
    }

    pub fn failing_remote(name: &str) -> Self {
        Self {
            fail_remote: true,
            ..Self::new(name)
        }
    }

    pub fn remote_sets(&self) -> usize {
        self.state.lock().remote_sets
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().candidates.clone()
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        Ok(SessionDescription::offer(format!("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns={}\r\n", self.name)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        if self.state.lock().remote.is_none() {
            return Err(PeerError::InvalidDescription("no remote offer".into()));
        }
        Ok(SessionDescription::answer(format!("v=0\r\no=- 2 2 IN IP4 0.0.0.0\r\ns={}\r\n", self.name)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.state.lock().local = Some(desc);
        let handler = self.on_candidate.lock().clone();
        if let Some(handler) = handler {
            for n in 1..=self.emit {
                handler(Some(candidate(n)));
            }
            handler(None);
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        if self.fail_remote {
            return Err(PeerError::Transport("remote description rejected".into()));
        }
        {
            let mut state = self.state.lock();
            state.remote = Some(desc);
            state.remote_sets += 1;
        }
        let handler = self.on_track.lock().clone();
        if let Some(handler) = handler {
            handler(Arc::new(MediaTrack::local(
                TrackKind::Video,
                format!("{}-remote-video", self.name),
                "remote-stream",
            )));
        }
        Ok(())
    }

    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<(), PeerError> {
        self.state.lock().tracks.push(track);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(PeerError::InvalidCandidate("remote description is not set".into()));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        *self.on_candidate.lock() = Some(handler);
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        *self.on_track.lock() = Some(handler);
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Выдаёт `FakeTransport` и запоминает их для проверок
pub struct FakeFactory {
    pub fail: bool,
    pub emit: u32,
    pub created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::with_emit(2)
    }

    pub fn with_emit(emit: u32) -> Self {
        Self {
            fail: false,
            emit,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.created.lock().last().cloned().expect("no transport created")
    }
}

#[async_trait]
impl PeerFactory for FakeFactory {
    async fn create(&self, _config: &CallConfig) -> Result<Arc<dyn PeerTransport>, PeerError> {
        if self.fail {
            return Err(PeerError::Transport("peer connection unavailable".into()));
        }
        let mut created = self.created.lock();
        let transport = Arc::new(FakeTransport {
            emit: self.emit,
            ..FakeTransport::new(&format!("peer{}", created.len()))
        });
        created.push(transport.clone());
        Ok(transport)
    }
}

pub struct FakeDevices {
    pub deny: bool,
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<LocalMedia, MediaError> {
        if self.deny {
            return Err(MediaError::PermissionDenied("user dismissed the prompt".into()));
        }
        SampleDevices::new().get_user_media(constraints).await
    }
}

/// `MemoryStore`, у которого удаление документов под `fail_prefix` всегда падает
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_prefix: Mutex<Option<String>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_prefix: Mutex::new(None),
        }
    }

    pub fn fail_deletes_under(&self, prefix: impl Into<String>) {
        *self.fail_prefix.lock() = Some(prefix.into());
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    fn new_id(&self) -> String {
        self.inner.new_id()
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, data: Value) -> Result<(), StoreError> {
        self.inner.set(path, data).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.inner.update(path, fields).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let failing = self
            .fail_prefix
            .lock()
            .as_deref()
            .is_some_and(|prefix| path.starts_with(prefix));
        if failing {
            return Err(StoreError::Backend(format!("delete of {path} refused")));
        }
        self.inner.delete(path).await
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        self.inner.add(collection, data).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.inner.list(collection).await
    }

    fn watch_document(&self, path: &str) -> SnapshotStream<Option<Value>> {
        self.inner.watch_document(path)
    }

    fn watch_collection(&self, collection: &str) -> SnapshotStream<Vec<DocumentChange>> {
        self.inner.watch_collection(collection)
    }
}

pub fn controller(
    store: Arc<dyn DocumentStore>,
    factory: Arc<FakeFactory>,
    deny_media: bool,
) -> CallController {
    CallController::new(
        CallConfig::default(),
        store,
        Arc::new(FakeDevices { deny: deny_media }),
        factory,
    )
}

/// Все фазы, уже лежащие в канале
pub fn drain(rx: &mut broadcast::Receiver<CallPhase>) -> Vec<CallPhase> {
    let mut phases = Vec::new();
    while let Ok(phase) = rx.try_recv() {
        phases.push(phase);
    }
    phases
}

/// Ждёт, пока условие станет истинным; фоновые подписки работают в других задачах
pub async fn eventually<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

use crate::error::PeerError;
use crate::logger::dump_candidate;
use crate::media::MediaTrack;
use crate::peer::ice::{analyze_candidates, apply_pending_candidates};
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::peer::PeerTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Состояние удалённой стороны: описание и кандидаты, пришедшие раньше него
#[derive(Default)]
struct RemoteState {
    description: Option<SessionDescription>,
    pending: Vec<IceCandidate>,
}

/// Обёртка над транспортом: идемпотентный remote description, очередь ранних
/// кандидатов и потоки событий. После `close()` входящие события молча игнорируются.
pub struct PeerSession {
    transport: Arc<dyn PeerTransport>,
    local: parking_lot::Mutex<Option<SessionDescription>>,
    remote: tokio::sync::Mutex<RemoteState>,
    gathered: Arc<parking_lot::Mutex<Vec<IceCandidate>>>,
    closed: AtomicBool,
    candidates_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<IceCandidate>>>,
    tracks_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Arc<MediaTrack>>>>,
}

impl PeerSession {
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        let (cand_tx, cand_rx) = mpsc::unbounded_channel();
        let (track_tx, track_rx) = mpsc::unbounded_channel();
        let gathered = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let gathered_ref = gathered.clone();
        transport.on_local_candidate(Arc::new(move |cand: Option<IceCandidate>| match cand {
            Some(c) => {
                dump_candidate("LOCAL", &c);
                gathered_ref.lock().push(c.clone());
                // получатель закрыт после завершения звонка
                let _ = cand_tx.send(c);
            }
            None => {
                tracing::debug!("ICE candidate gathering completed (null candidate received)");
                analyze_candidates(&gathered_ref.lock());
            }
        }));

        transport.on_remote_track(Arc::new(move |track: Arc<MediaTrack>| {
            tracing::debug!("Remote track arrived: {} ({:?})", track.id(), track.kind());
            let _ = track_tx.send(track);
        }));

        Self {
            transport,
            local: parking_lot::Mutex::new(None),
            remote: tokio::sync::Mutex::new(RemoteState::default()),
            gathered,
            closed: AtomicBool::new(false),
            candidates_rx: parking_lot::Mutex::new(Some(cand_rx)),
            tracks_rx: parking_lot::Mutex::new(Some(track_rx)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.is_closed() {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }

    /// Локальные кандидаты без маркера конца сбора. Отдаётся один раз.
    pub fn local_candidates(&self) -> Option<UnboundedReceiverStream<IceCandidate>> {
        self.candidates_rx
            .lock()
            .take()
            .map(UnboundedReceiverStream::new)
    }

    /// Удалённые треки по мере прихода. Отдаётся один раз.
    pub fn remote_tracks(&self) -> Option<UnboundedReceiverStream<Arc<MediaTrack>>> {
        self.tracks_rx.lock().take().map(UnboundedReceiverStream::new)
    }

    pub fn gathered_candidates(&self) -> Vec<IceCandidate> {
        self.gathered.lock().clone()
    }

    pub async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        self.transport.create_offer().await
    }

    /// Применяет удалённый offer и создаёт answer
    pub async fn create_answer(
        &self,
        remote_offer: SessionDescription,
    ) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        self.set_remote_description(remote_offer).await?;
        self.transport.create_answer().await
    }

    pub async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        tracing::debug!("Setting local {:?} [{}]", desc.kind, desc.fingerprint());
        self.transport.set_local_description(desc.clone()).await?;
        *self.local.lock() = Some(desc);
        Ok(())
    }

    /// Применяет remote description один раз. Возвращает `false`, если описание уже
    /// было применено или сессия закрыта; тогда ничего не меняется.
    pub async fn set_remote_description(&self, desc: SessionDescription) -> Result<bool, PeerError> {
        let mut remote = self.remote.lock().await;
        if self.is_closed() {
            tracing::debug!("Remote description after close ignored");
            return Ok(false);
        }
        if remote.description.is_some() {
            tracing::debug!("Remote description already set, ignoring {:?}", desc.kind);
            return Ok(false);
        }

        tracing::debug!("Setting remote {:?} [{}]", desc.kind, desc.fingerprint());
        self.transport.set_remote_description(desc.clone()).await?;
        remote.description = Some(desc);

        let pending = std::mem::take(&mut remote.pending);
        if !pending.is_empty() {
            tracing::debug!("Flushing {} queued remote candidates", pending.len());
        }
        apply_pending_candidates(self.transport.as_ref(), pending).await;
        Ok(true)
    }

    pub async fn add_track(&self, track: Arc<MediaTrack>) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.transport.add_track(track).await
    }

    /// Кандидаты до remote description откладываются; после `close()` no-op
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let mut remote = self.remote.lock().await;
        if self.is_closed() {
            tracing::debug!("Remote candidate after close dropped");
            return Ok(());
        }
        dump_candidate("REMOTE", &candidate);
        if remote.description.is_none() {
            tracing::debug!("Remote description not set yet, queuing candidate");
            remote.pending.push(candidate);
            return Ok(());
        }
        self.transport.add_ice_candidate(candidate).await
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    pub async fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().await.description.clone()
    }

    pub async fn pending_candidates(&self) -> usize {
        self.remote.lock().await.pending.len()
    }

    /// Повторный вызов ничего не делает
    pub async fn close(&self) -> Result<(), PeerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.remote.lock().await.pending.clear();
        self.candidates_rx.lock().take();
        self.tracks_rx.lock().take();
        self.transport.close().await
    }
}

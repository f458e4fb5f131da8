use crate::media::{LocalMedia, RemoteMedia};
use crate::peer::PeerSession;
use crate::rendezvous::{CleanupReport, RoomId};
use crate::signaling::Role;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Долгоживущие подписки звонка. Отменяются явно при завершении и при drop.
#[derive(Default)]
pub struct Subscriptions {
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    cancelled: Mutex<bool>,
}

impl Subscriptions {
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        if *self.cancelled.lock() {
            tracing::debug!("Subscription {name} spawned after teardown, aborting");
            handle.abort();
            return;
        }
        self.tasks.lock().push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Отменяет все подписки, возвращает их количество
    pub fn cancel_all(&self) -> usize {
        *self.cancelled.lock() = true;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, handle) in &tasks {
            tracing::debug!("Cancelling subscription {name}");
            handle.abort();
        }
        tasks.len()
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Активный звонок. Один на процесс.
pub struct CallSession {
    pub role: Role,
    room_id: Mutex<Option<RoomId>>,
    pub peer: Arc<PeerSession>,
    local: Mutex<Option<LocalMedia>>,
    pub remote: Arc<RemoteMedia>,
    pub subscriptions: Subscriptions,
}

impl CallSession {
    pub fn new(
        role: Role,
        room_id: Option<RoomId>,
        peer: Arc<PeerSession>,
        remote: Arc<RemoteMedia>,
    ) -> Self {
        Self {
            role,
            room_id: Mutex::new(room_id),
            peer,
            local: Mutex::new(None),
            remote,
            subscriptions: Subscriptions::default(),
        }
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id.lock().clone()
    }

    pub fn set_room_id(&self, id: RoomId) {
        *self.room_id.lock() = Some(id);
    }

    pub fn local_media(&self) -> Option<LocalMedia> {
        self.local.lock().clone()
    }

    pub fn set_local_media(&self, media: LocalMedia) {
        *self.local.lock() = Some(media);
    }
}

/// Что сделал `stop()`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownSummary {
    pub subscriptions_cancelled: usize,
    pub local_tracks_stopped: usize,
    pub remote_tracks_stopped: usize,
    /// Только у хоста
    pub room_cleanup: Option<CleanupReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_subscriptions_stop_running() {
        let subs = Subscriptions::default();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        subs.spawn("late", async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(subs.cancel_all(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn spawn_after_cancel_is_aborted() {
        let subs = Subscriptions::default();
        subs.cancel_all();
        subs.spawn("after", std::future::pending());
        assert_eq!(subs.len(), 0);
    }
}

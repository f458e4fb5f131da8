//! Комнаты в rendezvous хранилище.
//!
//! ```text
//! rooms/{roomId}                      { offer: {type, sdp}, answer?: {type, sdp} }
//! rooms/{roomId}/hostCandidates/{id}  кандидаты хоста
//! rooms/{roomId}/joinerCandidates/{id} кандидаты присоединившегося
//! ```

use crate::config::DEFAULT_ROOMS_COLLECTION;
use crate::error::StoreError;
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::store::{child_path, ChangeType, DocumentStore, SnapshotStream};
use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub type RoomId = String;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Room {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
}

/// Коллекции кандидатов внутри комнаты
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateCollection {
    Host,
    Joiner,
}

impl CandidateCollection {
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateCollection::Host => "hostCandidates",
            CandidateCollection::Joiner => "joinerCandidates",
        }
    }
}

/// Итог удаления комнаты: ошибки отдельных документов не прерывают уборку
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct RendezvousClient {
    store: Arc<dyn DocumentStore>,
    rooms: String,
}

impl RendezvousClient {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_collection(store, DEFAULT_ROOMS_COLLECTION)
    }

    pub fn with_collection(store: Arc<dyn DocumentStore>, rooms: impl Into<String>) -> Self {
        Self {
            store,
            rooms: rooms.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn room_path(&self, id: &str) -> String {
        child_path(&self.rooms, id)
    }

    pub fn candidates_path(&self, id: &str, collection: CandidateCollection) -> String {
        child_path(&self.room_path(id), collection.as_str())
    }

    /// Выделяет id новой комнаты. Документ появится только при записи offer.
    pub fn create_room(&self) -> RoomId {
        self.store.new_id()
    }

    pub async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        match self.store.get(&self.room_path(id)).await? {
            Some(data) => Ok(Some(serde_json::from_value(data)?)),
            None => Ok(None),
        }
    }

    /// Пишет offer. Повторная запись отклоняется.
    pub async fn set_offer(&self, id: &str, offer: &SessionDescription) -> Result<(), StoreError> {
        let path = self.room_path(id);
        if let Some(room) = self.get_room(id).await? {
            if room.offer.is_some() {
                return Err(StoreError::AlreadyWritten {
                    path,
                    field: "offer",
                });
            }
        }
        let room = Room {
            offer: Some(offer.clone()),
            answer: None,
        };
        self.store.set(&path, serde_json::to_value(room)?).await
    }

    /// Пишет answer. Только после offer и только один раз.
    pub async fn set_answer(&self, id: &str, answer: &SessionDescription) -> Result<(), StoreError> {
        let path = self.room_path(id);
        let room = self
            .get_room(id)
            .await?
            .ok_or_else(|| StoreError::OfferMissing(id.to_string()))?;
        if room.offer.is_none() {
            return Err(StoreError::OfferMissing(id.to_string()));
        }
        if room.answer.is_some() {
            return Err(StoreError::AlreadyWritten {
                path,
                field: "answer",
            });
        }

        let mut fields = Map::new();
        fields.insert("answer".into(), serde_json::to_value(answer)?);
        self.store.update(&path, fields).await
    }

    /// Снимки комнаты; `None`, если комната удалена или ещё не создана
    pub fn subscribe_room(&self, id: &str) -> SnapshotStream<Option<Room>> {
        self.store
            .watch_document(&self.room_path(id))
            .map(|snapshot| {
                snapshot.and_then(|data| match data {
                    Some(data) => Ok(Some(serde_json::from_value(data)?)),
                    None => Ok(None),
                })
            })
            .boxed()
    }

    pub async fn append_candidate(
        &self,
        id: &str,
        collection: CandidateCollection,
        candidate: &IceCandidate,
    ) -> Result<String, StoreError> {
        self.store
            .add(
                &self.candidates_path(id, collection),
                serde_json::to_value(candidate)?,
            )
            .await
    }

    /// Только добавленные кандидаты; изменения и удаления пропускаются
    pub fn subscribe_candidates(
        &self,
        id: &str,
        collection: CandidateCollection,
    ) -> SnapshotStream<IceCandidate> {
        self.store
            .watch_collection(&self.candidates_path(id, collection))
            .flat_map(|batch| {
                let items: Vec<Result<IceCandidate, StoreError>> = match batch {
                    Ok(changes) => changes
                        .into_iter()
                        .filter(|change| change.kind == ChangeType::Added)
                        .map(|change| serde_json::from_value(change.doc.data).map_err(StoreError::from))
                        .collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .boxed()
    }

    /// Удаляет обе коллекции кандидатов, затем саму комнату. Best-effort.
    pub async fn delete_room_tree(&self, id: &str) -> CleanupReport {
        let mut report = CleanupReport::default();

        for collection in [CandidateCollection::Joiner, CandidateCollection::Host] {
            let path = self.candidates_path(id, collection);
            let docs = match self.store.list(&path).await {
                Ok(docs) => docs,
                Err(e) => {
                    tracing::warn!("Failed to list {path}: {e}");
                    report.failed += 1;
                    continue;
                }
            };
            let results =
                future::join_all(docs.iter().map(|doc| self.store.delete(&doc.path))).await;
            for (doc, result) in docs.iter().zip(results) {
                match result {
                    Ok(()) => report.deleted += 1,
                    Err(e) => {
                        tracing::warn!("Failed to delete candidate {}: {e}", doc.path);
                        report.failed += 1;
                    }
                }
            }
        }

        match self.store.delete(&self.room_path(id)).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                tracing::warn!("Failed to delete room {id}: {e}");
                report.failed += 1;
            }
        }

        tracing::debug!(
            "Room {id} cleanup: {} deleted, {} failed",
            report.deleted,
            report.failed
        );
        report
    }
}

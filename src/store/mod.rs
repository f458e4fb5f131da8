//! Rendezvous хранилище: документы по путям `collection/id[/subcollection/id...]`
//! с подписками на снимки. Консистентность и репликация на стороне бэкенда.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub path: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeType,
    pub doc: Document,
}

/// Бесконечный поток снимков; перезапускается повторной подпиской
pub type SnapshotStream<T> = BoxStream<'static, Result<T, StoreError>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Новый id документа без записи
    fn new_id(&self) -> String;

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Создаёт или полностью перезаписывает документ
    async fn set(&self, path: &str, data: Value) -> Result<(), StoreError>;

    /// Сливает поля в существующий документ; `NotFound`, если его нет
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Удаление отсутствующего документа не ошибка
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Добавляет документ с новым id в коллекцию, возвращает id
    async fn add(&self, collection: &str, data: Value) -> Result<String, StoreError>;

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Сначала текущее состояние, дальше каждое изменение. `None`: документа нет
    fn watch_document(&self, path: &str) -> SnapshotStream<Option<Value>>;

    /// Сначала текущее содержимое как `Added`, дальше пачки изменений
    fn watch_collection(&self, collection: &str) -> SnapshotStream<Vec<DocumentChange>>;
}

pub fn child_path(parent: &str, id: &str) -> String {
    format!("{parent}/{id}")
}

/// Коллекция, в которой лежит документ
pub fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

pub fn id_of(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let p = child_path("rooms/abc/hostCandidates", "x1");
        assert_eq!(p, "rooms/abc/hostCandidates/x1");
        assert_eq!(parent_of(&p), Some("rooms/abc/hostCandidates"));
        assert_eq!(id_of(&p), "x1");
        assert_eq!(parent_of("rooms"), None);
        assert_eq!(id_of("rooms"), "rooms");
    }
}

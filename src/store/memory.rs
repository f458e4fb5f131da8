use super::{
    child_path, id_of, parent_of, ChangeType, Document, DocumentChange, DocumentStore,
    SnapshotStream,
};
use crate::error::StoreError;
use crate::utils::document_id;
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone)]
struct StoreEvent {
    path: String,
    kind: ChangeType,
    /// Для `Removed` последнее значение документа
    data: Value,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, Value>,
    watchers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl Inner {
    fn publish(&mut self, event: StoreEvent) {
        // закрытые подписки выкидываем здесь же
        self.watchers.retain(|w| w.send(event.clone()).is_ok());
    }

    fn watch(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.push(tx);
        rx
    }
}

/// Хранилище в памяти процесса. Подходит для звонка внутри одного процесса и для тестов.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Количество документов, чей путь начинается с `prefix`
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.inner
            .lock()
            .docs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }
}

fn segments(path: &str) -> usize {
    path.split('/').count()
}

fn check_document_path(path: &str) -> Result<(), StoreError> {
    if path.is_empty() || path.split('/').any(str::is_empty) || segments(path) % 2 != 0 {
        return Err(StoreError::Backend(format!("invalid document path `{path}`")));
    }
    Ok(())
}

fn check_collection_path(path: &str) -> Result<(), StoreError> {
    if path.is_empty() || path.split('/').any(str::is_empty) || segments(path) % 2 != 1 {
        return Err(StoreError::Backend(format!("invalid collection path `{path}`")));
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn new_id(&self) -> String {
        document_id()
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        check_document_path(path)?;
        Ok(self.inner.lock().docs.get(path).cloned())
    }

    async fn set(&self, path: &str, data: Value) -> Result<(), StoreError> {
        check_document_path(path)?;
        let mut inner = self.inner.lock();
        let kind = match inner.docs.insert(path.to_string(), data.clone()) {
            Some(_) => ChangeType::Modified,
            None => ChangeType::Added,
        };
        inner.publish(StoreEvent {
            path: path.to_string(),
            kind,
            data,
        });
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        check_document_path(path)?;
        let mut inner = self.inner.lock();
        let data = match inner.docs.get_mut(path) {
            None => return Err(StoreError::NotFound(path.to_string())),
            Some(Value::Object(obj)) => {
                obj.extend(fields);
                Value::Object(obj.clone())
            }
            Some(_) => return Err(StoreError::Backend(format!("{path} is not an object"))),
        };
        inner.publish(StoreEvent {
            path: path.to_string(),
            kind: ChangeType::Modified,
            data,
        });
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        check_document_path(path)?;
        let mut inner = self.inner.lock();
        if let Some(old) = inner.docs.remove(path) {
            inner.publish(StoreEvent {
                path: path.to_string(),
                kind: ChangeType::Removed,
                data: old,
            });
        }
        Ok(())
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        check_collection_path(collection)?;
        let id = self.new_id();
        self.set(&child_path(collection, &id), data).await?;
        Ok(id)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        check_collection_path(collection)?;
        let inner = self.inner.lock();
        Ok(inner
            .docs
            .iter()
            .filter(|(path, _)| parent_of(path) == Some(collection))
            .map(|(path, data)| Document {
                id: id_of(path).to_string(),
                path: path.clone(),
                data: data.clone(),
            })
            .collect())
    }

    fn watch_document(&self, path: &str) -> SnapshotStream<Option<Value>> {
        if let Err(e) = check_document_path(path) {
            return stream::once(future::ready(Err(e))).boxed();
        }
        // снимок и регистрация под одной блокировкой: ни пропусков, ни дублей
        let (initial, rx) = {
            let mut inner = self.inner.lock();
            (inner.docs.get(path).cloned(), inner.watch())
        };
        let path = path.to_string();
        let updates = UnboundedReceiverStream::new(rx).filter_map(move |ev| {
            future::ready((ev.path == path).then(|| match ev.kind {
                ChangeType::Removed => Ok(None),
                _ => Ok(Some(ev.data)),
            }))
        });
        stream::once(future::ready(Ok(initial))).chain(updates).boxed()
    }

    fn watch_collection(&self, collection: &str) -> SnapshotStream<Vec<DocumentChange>> {
        if let Err(e) = check_collection_path(collection) {
            return stream::once(future::ready(Err(e))).boxed();
        }
        let (initial, rx) = {
            let mut inner = self.inner.lock();
            let initial: Vec<DocumentChange> = inner
                .docs
                .iter()
                .filter(|(path, _)| parent_of(path) == Some(collection))
                .map(|(path, data)| DocumentChange {
                    kind: ChangeType::Added,
                    doc: Document {
                        id: id_of(path).to_string(),
                        path: path.clone(),
                        data: data.clone(),
                    },
                })
                .collect();
            (initial, inner.watch())
        };
        let collection = collection.to_string();
        let updates = UnboundedReceiverStream::new(rx).filter_map(move |ev| {
            future::ready((parent_of(&ev.path) == Some(collection.as_str())).then(|| {
                Ok(vec![DocumentChange {
                    kind: ev.kind,
                    doc: Document {
                        id: id_of(&ev.path).to_string(),
                        path: ev.path,
                        data: ev.data,
                    },
                }])
            }))
        });
        stream::once(future::ready(Ok(initial))).chain(updates).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_update_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("rooms/r1").await.unwrap(), None);
        store.set("rooms/r1", json!({ "a": 1 })).await.unwrap();

        let mut fields = Map::new();
        fields.insert("b".into(), json!(2));
        store.update("rooms/r1", fields).await.unwrap();
        assert_eq!(
            store.get("rooms/r1").await.unwrap(),
            Some(json!({ "a": 1, "b": 2 }))
        );

        store.delete("rooms/r1").await.unwrap();
        store.delete("rooms/r1").await.unwrap();
        assert_eq!(store.get("rooms/r1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store.update("rooms/nope", Map::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn malformed_paths_are_rejected() {
        let store = MemoryStore::new();
        assert!(store.get("rooms").await.is_err());
        assert!(store.set("rooms//x", json!({})).await.is_err());
        assert!(store.add("rooms/r1", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn add_and_list_only_direct_children() {
        let store = MemoryStore::new();
        let id = store.add("rooms/r1/hostCandidates", json!({ "n": 1 })).await.unwrap();
        store.add("rooms/r1/joinerCandidates", json!({ "n": 2 })).await.unwrap();
        store.set("rooms/r1", json!({})).await.unwrap();

        let docs = store.list("rooms/r1/hostCandidates").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert_eq!(store.list("rooms").await.unwrap().len(), 1);
        assert_eq!(store.count_prefix("rooms/r1"), 3);
    }

    #[tokio::test]
    async fn document_watch_sees_current_state_then_changes() {
        let store = MemoryStore::new();
        store.set("rooms/r1", json!({ "offer": 1 })).await.unwrap();
        let mut watch = store.watch_document("rooms/r1");
        assert_eq!(watch.next().await.unwrap().unwrap(), Some(json!({ "offer": 1 })));

        store.set("rooms/other", json!({})).await.unwrap();
        let mut fields = Map::new();
        fields.insert("answer".into(), json!(2));
        store.update("rooms/r1", fields).await.unwrap();
        assert_eq!(
            watch.next().await.unwrap().unwrap(),
            Some(json!({ "offer": 1, "answer": 2 }))
        );

        store.delete("rooms/r1").await.unwrap();
        assert_eq!(watch.next().await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn collection_watch_tags_changes() {
        let store = MemoryStore::new();
        store.add("rooms/r1/hostCandidates", json!({ "n": 1 })).await.unwrap();
        let mut watch = store.watch_collection("rooms/r1/hostCandidates");

        let initial = watch.next().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].kind, ChangeType::Added);

        let id = store.add("rooms/r1/hostCandidates", json!({ "n": 2 })).await.unwrap();
        store.add("rooms/r1/joinerCandidates", json!({ "n": 3 })).await.unwrap();
        let path = child_path("rooms/r1/hostCandidates", &id);
        store.set(&path, json!({ "n": 4 })).await.unwrap();
        store.delete(&path).await.unwrap();

        let kinds: Vec<_> = watch
            .take(3)
            .map(|batch| batch.unwrap()[0].kind)
            .collect()
            .await;
        assert_eq!(
            kinds,
            vec![ChangeType::Added, ChangeType::Modified, ChangeType::Removed]
        );
    }

    #[tokio::test]
    async fn dropped_watchers_are_pruned() {
        let store = MemoryStore::new();
        drop(store.watch_document("rooms/r1"));
        store.set("rooms/r1", json!({})).await.unwrap();
        assert!(store.inner.lock().watchers.is_empty());
    }
}

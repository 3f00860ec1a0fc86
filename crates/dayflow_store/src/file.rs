//! File-based local store for persistent storage.

use crate::collection::Collection;
use crate::error::{StoreError, StoreResult};
use crate::store::LocalStore;
use async_trait::async_trait;
use dayflow_core::{Entity, EntityDraft, EntityId, EntityKind, Fields};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Current on-disk format version.
const FORMAT_VERSION: u32 = 1;

/// On-disk representation of one collection.
#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile {
    version: u32,
    kind: EntityKind,
    entities: Vec<Entity>,
}

/// A file-based local store.
///
/// Each collection lives in `<dir>/<collection>.json` and survives process
/// restarts. The whole collection is kept in memory; every mutating call
/// rewrites the file through a temporary sibling and an atomic rename.
///
/// # Example
///
/// ```no_run
/// use dayflow_core::EntityKind;
/// use dayflow_store::FileStore;
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("data"), EntityKind::Todo).unwrap();
/// assert!(store.path().ends_with("todos.json"));
/// ```
#[derive(Debug)]
pub struct FileStore {
    kind: EntityKind,
    path: PathBuf,
    collection: Mutex<Collection>,
}

impl FileStore {
    /// Opens or creates the collection file for `kind` inside `dir`.
    ///
    /// Parent directories are created if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the file cannot
    /// be read, or its contents are not a valid collection.
    pub fn open(dir: &Path, kind: EntityKind) -> StoreResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", kind.collection_name()));

        let collection = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let file: CollectionFile = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupted(format!("{}: {e}", path.display())))?;
            if file.kind != kind {
                return Err(StoreError::Corrupted(format!(
                    "{} holds {} entities, expected {}",
                    path.display(),
                    file.kind,
                    kind
                )));
            }
            if file.version > FORMAT_VERSION {
                return Err(StoreError::Corrupted(format!(
                    "unsupported format version {}",
                    file.version
                )));
            }
            debug!(path = %path.display(), count = file.entities.len(), "loaded collection");
            Collection::from_entities(kind, file.entities)
        } else {
            Collection::new(kind)
        };

        Ok(Self {
            kind,
            path,
            collection: Mutex::new(collection),
        })
    }

    /// Returns the path to the collection file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, collection: &Collection) -> StoreResult<()> {
        let file = CollectionFile {
            version: FORMAT_VERSION,
            kind: collection.kind(),
            entities: collection.all(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FileStore {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn get_all(&self) -> StoreResult<Vec<Entity>> {
        Ok(self.collection.lock().await.all())
    }

    async fn get(&self, id: &EntityId) -> StoreResult<Option<Entity>> {
        Ok(self.collection.lock().await.get(id))
    }

    async fn add(&self, draft: EntityDraft) -> StoreResult<Entity> {
        let mut collection = self.collection.lock().await;
        let mut next = collection.clone();
        let entity = next.add(draft)?;
        self.persist(&next).await?;
        *collection = next;
        Ok(entity)
    }

    async fn update(&self, id: &EntityId, patch: &Fields) -> StoreResult<Entity> {
        let mut collection = self.collection.lock().await;
        let mut next = collection.clone();
        let entity = next.update(id, patch)?;
        self.persist(&next).await?;
        *collection = next;
        Ok(entity)
    }

    async fn delete(&self, id: &EntityId) -> StoreResult<()> {
        let mut collection = self.collection.lock().await;
        let mut next = collection.clone();
        next.delete(id);
        self.persist(&next).await?;
        *collection = next;
        Ok(())
    }

    async fn sync(&self, entity: Entity) -> StoreResult<()> {
        let mut collection = self.collection.lock().await;
        let mut next = collection.clone();
        next.sync(entity);
        self.persist(&next).await?;
        *collection = next;
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut collection = self.collection.lock().await;
        let mut next = collection.clone();
        next.clear();
        self.persist(&next).await?;
        *collection = next;
        Ok(())
    }

    async fn replace_all(&self, entities: Vec<Entity>) -> StoreResult<()> {
        let mut collection = self.collection.lock().await;
        let mut next = collection.clone();
        next.replace(entities);
        self.persist(&next).await?;
        *collection = next;
        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> StoreResult<Option<Entity>> {
        Ok(self.collection.lock().await.find_by_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_create_new() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), EntityKind::Routine).unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
        assert_eq!(store.kind(), EntityKind::Routine);
        assert!(store.path().ends_with("routines.json"));
    }

    #[tokio::test]
    async fn file_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path(), EntityKind::Todo).unwrap();
            store
                .add(EntityDraft::new().with_id("t1").field("title", "Buy milk"))
                .await
                .unwrap();
            let mut patch = Fields::new();
            patch.insert("done".into(), json!(true));
            store.update(&EntityId::from("t1"), &patch).await.unwrap();
        }

        let reopened = FileStore::open(dir.path(), EntityKind::Todo).unwrap();
        let all = reopened.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get_str("title"), Some("Buy milk"));
        assert_eq!(all[0].get("done"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn file_clear_persists() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), EntityKind::Tag).unwrap();
        store.add(EntityDraft::new().field("name", "a")).await.unwrap();
        store.clear().await.unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path(), EntityKind::Tag).unwrap();
        assert!(reopened.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_failed_add_leaves_collection_unchanged() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), EntityKind::Todo).unwrap();
        store.add(EntityDraft::new().with_id("t1")).await.unwrap();
        assert!(store.add(EntityDraft::new().with_id("t1")).await.is_err());
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_replace_all_persists() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), EntityKind::Todo).unwrap();
        store.add(EntityDraft::new().with_id("t1")).await.unwrap();
        let remote = EntityDraft::new().with_id("t2").into_entity();
        store.replace_all(vec![remote.clone()]).await.unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path(), EntityKind::Todo).unwrap();
        assert_eq!(reopened.get_all().await.unwrap(), vec![remote]);
    }

    #[test]
    fn file_corrupted_is_reported() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("todos.json"), b"not json").unwrap();
        let result = FileStore::open(dir.path(), EntityKind::Todo);
        assert!(matches!(result, Err(StoreError::Corrupted(_))));
    }

    #[test]
    fn file_kind_mismatch_is_reported() {
        let dir = tempdir().unwrap();
        let body = json!({"version": 1, "kind": "tag", "entities": []});
        std::fs::write(dir.path().join("todos.json"), body.to_string()).unwrap();
        let result = FileStore::open(dir.path(), EntityKind::Todo);
        assert!(matches!(result, Err(StoreError::Corrupted(_))));
    }
}

//! Outbox persistence: one JSON document per queued order.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use crate::application::repos::{OutboxError, OutboxRepo};
use crate::cache::lock::mutex_lock;
use crate::domain::entities::OutboxItem;

use super::fs::write_atomic;

const SOURCE: &str = "infra::outbox";

/// Filesystem-backed outbox. Writes go to a unique temporary file first and
/// are renamed into place, so a crash never leaves a half-written item.
#[derive(Debug, Clone)]
pub struct FsOutboxRepo {
    root: PathBuf,
}

impl FsOutboxRepo {
    /// Initialise storage rooted at `root`, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Open an existing directory without creating it.
    pub fn open(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, OutboxError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(OutboxError::NotFound(id.to_string()));
        }
        Ok(self.root.join(format!("{id}.json")))
    }

    async fn write(&self, item: &OutboxItem) -> Result<(), OutboxError> {
        let path = self.path_for(&item.id)?;
        let encoded = serde_json::to_vec_pretty(item).map_err(|err| OutboxError::Encode {
            id: item.id.clone(),
            message: err.to_string(),
        })?;

        write_atomic(&self.root, &path, encoded)
            .await
            .map_err(OutboxError::from_persistence)
    }
}

#[async_trait]
impl OutboxRepo for FsOutboxRepo {
    async fn append(&self, item: &OutboxItem) -> Result<(), OutboxError> {
        self.write(item).await
    }

    async fn save(&self, item: &OutboxItem) -> Result<(), OutboxError> {
        let path = self.path_for(&item.id)?;
        match fs::metadata(&path).await {
            Ok(_) => self.write(item).await,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(OutboxError::NotFound(item.id.clone()))
            }
            Err(err) => Err(OutboxError::from_persistence(err)),
        }
    }

    async fn remove(&self, id: &str) -> Result<bool, OutboxError> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(OutboxError::from_persistence(err)),
        }
    }

    async fn load_all(&self) -> Result<Vec<OutboxItem>, OutboxError> {
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(OutboxError::from_persistence)?;

        let mut items = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(OutboxError::from_persistence)?
        {
            let path = entry.path();
            let is_item = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".json") && !name.starts_with('.'));
            if !is_item {
                continue;
            }

            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(OutboxError::from_persistence(err)),
            };
            match serde_json::from_slice::<OutboxItem>(&raw) {
                Ok(item) => items.push(item),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable outbox item");
                }
            }
        }

        items.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(items)
    }
}

/// Non-durable outbox for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryOutboxRepo {
    items: Mutex<Vec<OutboxItem>>,
}

impl MemoryOutboxRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.items, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutboxRepo for MemoryOutboxRepo {
    async fn append(&self, item: &OutboxItem) -> Result<(), OutboxError> {
        mutex_lock(&self.items, SOURCE, "append").push(item.clone());
        Ok(())
    }

    async fn save(&self, item: &OutboxItem) -> Result<(), OutboxError> {
        let mut items = mutex_lock(&self.items, SOURCE, "save");
        let slot = items
            .iter_mut()
            .find(|existing| existing.id == item.id)
            .ok_or_else(|| OutboxError::NotFound(item.id.clone()))?;
        *slot = item.clone();
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, OutboxError> {
        let mut items = mutex_lock(&self.items, SOURCE, "remove");
        let before = items.len();
        items.retain(|item| item.id != id);
        Ok(items.len() != before)
    }

    async fn load_all(&self) -> Result<Vec<OutboxItem>, OutboxError> {
        let mut items = mutex_lock(&self.items, SOURCE, "load_all").clone();
        items.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::entities::OrderPayload;
    use crate::domain::types::OutboxStatus;

    fn order(name: &str) -> OutboxItem {
        let payload: OrderPayload =
            serde_json::from_value(json!({ "items": [{ "name": name, "quantity": 1 }] })).unwrap();
        OutboxItem::new(payload)
    }

    #[tokio::test]
    async fn fs_repo_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsOutboxRepo::new(dir.path().to_path_buf()).unwrap();
        let first = order("espresso");
        let second = order("latte");
        repo.append(&first).await.unwrap();
        repo.append(&second).await.unwrap();

        let reopened = FsOutboxRepo::open(dir.path().to_path_buf());
        let items = reopened.load_all().await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.contains(&first));
        assert!(items.contains(&second));
    }

    #[tokio::test]
    async fn fs_repo_save_overwrites_and_remove_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsOutboxRepo::new(dir.path().to_path_buf()).unwrap();
        let mut item = order("mocha");
        repo.append(&item).await.unwrap();

        item.begin_attempt().unwrap();
        repo.save(&item).await.unwrap();
        assert_eq!(
            repo.load_all().await.unwrap()[0].status,
            OutboxStatus::InFlight
        );

        assert!(repo.remove(&item.id).await.unwrap());
        assert!(!repo.remove(&item.id).await.unwrap());
        assert!(repo.load_all().await.unwrap().is_empty());
        assert!(matches!(
            repo.save(&item).await,
            Err(OutboxError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fs_repo_concurrent_saves_leave_one_readable_copy() {
        let dir = tempfile::tempdir().unwrap();
        let repo = std::sync::Arc::new(FsOutboxRepo::new(dir.path().to_path_buf()).unwrap());
        let item = order("americano");
        repo.append(&item).await.unwrap();

        let saves: Vec<_> = (0..16)
            .map(|_| {
                let repo = std::sync::Arc::clone(&repo);
                let item = item.clone();
                tokio::spawn(async move { repo.save(&item).await })
            })
            .collect();
        for save in saves {
            save.await.unwrap().unwrap();
        }

        assert_eq!(repo.load_all().await.unwrap(), vec![item]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn fs_repo_skips_corrupt_documents() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsOutboxRepo::new(dir.path().to_path_buf()).unwrap();
        repo.append(&order("flat white")).await.unwrap();
        std::fs::write(dir.path().join("ord_broken.json"), b"{not json").unwrap();

        assert_eq!(repo.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fs_repo_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsOutboxRepo::new(dir.path().to_path_buf()).unwrap();
        assert!(repo.remove("../escape").await.is_err());
    }

    #[tokio::test]
    async fn unreadable_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();

        let repo = FsOutboxRepo::open(file);
        assert!(repo.load_all().await.is_err());
    }

    #[tokio::test]
    async fn memory_repo_tracks_items() {
        let repo = MemoryOutboxRepo::new();
        let item = order("cortado");
        repo.append(&item).await.unwrap();
        assert_eq!(repo.len(), 1);
        assert!(repo.remove(&item.id).await.unwrap());
        assert!(repo.is_empty());
    }
}

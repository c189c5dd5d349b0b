//! Durable cache store set: one directory per store, one file per entry.
//!
//! Entry files are named by the SHA-256 of the request key, so any URL maps to
//! a fixed-length, filesystem-safe name. Each file starts with a single-line
//! JSON header (key, content type, size, insertion time) followed by the
//! base64 payload, which lets listings read the header alone. Writes land in
//! a unique temporary file and are renamed into place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::warn;

use crate::cache::{CacheStoreSet, EntryMeta, StoreError};
use crate::domain::entities::{CacheEntry, RequestKey};

use super::fs::write_atomic;

const ENTRY_EXTENSION: &str = "entry";
/// Upper bound on a header line; keys carry full URLs.
const HEADER_LIMIT: u64 = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryHeader {
    key: RequestKey,
    content_type: String,
    size: u64,
    #[serde(with = "time::serde::rfc3339")]
    inserted_at: OffsetDateTime,
}

impl From<&CacheEntry> for EntryHeader {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            content_type: entry.content_type.clone(),
            size: entry.size,
            inserted_at: entry.inserted_at,
        }
    }
}

fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>, serde_json::Error> {
    let mut encoded = serde_json::to_vec(&EntryHeader::from(entry))?;
    encoded.push(b'\n');
    encoded.extend_from_slice(STANDARD.encode(&entry.payload).as_bytes());
    Ok(encoded)
}

fn decode_entry(store: &str, raw: &[u8]) -> Result<CacheEntry, StoreError> {
    let split = raw
        .iter()
        .position(|byte| *byte == b'\n')
        .ok_or_else(|| StoreError::corrupt(store, "entry has no header line"))?;
    let header: EntryHeader = serde_json::from_slice(&raw[..split])
        .map_err(|err| StoreError::corrupt(store, format!("unreadable header: {err}")))?;
    let payload = STANDARD
        .decode(&raw[split + 1..])
        .map_err(|err| StoreError::corrupt(store, format!("payload is not base64: {err}")))?;
    if payload.len() as u64 != header.size {
        return Err(StoreError::corrupt(
            store,
            format!(
                "entry `{}` declares {} bytes but holds {}",
                header.key,
                header.size,
                payload.len()
            ),
        ));
    }
    Ok(CacheEntry {
        key: header.key,
        payload: Bytes::from(payload),
        content_type: header.content_type,
        size: header.size,
        inserted_at: header.inserted_at,
    })
}

#[derive(Debug, Clone)]
pub struct DiskStoreSet {
    root: PathBuf,
}

impl DiskStoreSet {
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, store: &str) -> Result<PathBuf, StoreError> {
        let valid = !store.is_empty()
            && !store.starts_with('.')
            && store
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StoreError::io(
                store,
                std::io::Error::new(ErrorKind::InvalidInput, "invalid store name"),
            ));
        }
        Ok(self.root.join(store))
    }

    fn entry_path(&self, store: &str, key: &RequestKey) -> Result<PathBuf, StoreError> {
        let mut hasher = Sha256::new();
        hasher.update(key.method().as_bytes());
        hasher.update(b" ");
        hasher.update(key.url().as_bytes());
        let name = hex::encode(hasher.finalize());
        Ok(self
            .store_dir(store)?
            .join(format!("{name}.{ENTRY_EXTENSION}")))
    }

    /// Entry documents of a store; a missing store yields nothing.
    async fn entry_files(&self, store: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.store_dir(store)?;
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(store, err)),
        };

        let mut files = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|err| StoreError::io(store, err))?
        {
            let path = entry.path();
            let is_entry = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    !name.starts_with('.') && name.ends_with(&format!(".{ENTRY_EXTENSION}"))
                });
            if is_entry {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Header of one entry file, without reading its payload.
    async fn read_header(
        &self,
        store: &str,
        path: &Path,
    ) -> Result<Option<EntryHeader>, StoreError> {
        let file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(store, err)),
        };
        let mut line = Vec::new();
        BufReader::new(file)
            .take(HEADER_LIMIT)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|err| StoreError::io(store, err))?;

        if line.pop() != Some(b'\n') {
            warn!(store, path = %path.display(), "Skipping cache entry without header line");
            return Ok(None);
        }
        match serde_json::from_slice::<EntryHeader>(&line) {
            Ok(header) => Ok(Some(header)),
            Err(err) => {
                warn!(store, path = %path.display(), error = %err, "Skipping unreadable cache entry");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CacheStoreSet for DiskStoreSet {
    async fn open(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.store_dir(name)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| StoreError::io(name, err))
    }

    async fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CacheEntry>, StoreError> {
        let path = self.entry_path(store, key)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(store, err)),
        };
        let entry = decode_entry(store, &raw)?;
        if &entry.key != key {
            return Err(StoreError::corrupt(
                store,
                format!("digest collision between `{}` and `{key}`", entry.key),
            ));
        }
        Ok(Some(entry))
    }

    async fn put(&self, store: &str, entry: CacheEntry) -> Result<(), StoreError> {
        let path = self.entry_path(store, &entry.key)?;
        self.open(store).await?;

        let encoded = encode_entry(&entry).map_err(|source| StoreError::Encode {
            store: store.to_string(),
            source,
        })?;
        write_atomic(&self.store_dir(store)?, &path, encoded)
            .await
            .map_err(|err| StoreError::io(store, err))
    }

    async fn delete(&self, store: &str, key: &RequestKey) -> Result<bool, StoreError> {
        let path = self.entry_path(store, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::io(store, err)),
        }
    }

    async fn list_keys(&self, store: &str) -> Result<Vec<RequestKey>, StoreError> {
        let mut keys: Vec<RequestKey> = self
            .list_entries(store)
            .await?
            .into_iter()
            .map(|meta| meta.key)
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_entries(&self, store: &str) -> Result<Vec<EntryMeta>, StoreError> {
        let mut entries = Vec::new();
        for path in self.entry_files(store).await? {
            if let Some(header) = self.read_header(store, &path).await? {
                entries.push(EntryMeta {
                    key: header.key,
                    size: header.size,
                    inserted_at: header.inserted_at,
                });
            }
        }
        Ok(entries)
    }

    async fn delete_store(&self, name: &str) -> Result<bool, StoreError> {
        let dir = self.store_dir(name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::io(name, err)),
        }
    }

    async fn store_names(&self) -> Result<Vec<String>, StoreError> {
        let root = self.root.display().to_string();
        let mut reader = match fs::read_dir(&self.root).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(root, err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|err| StoreError::io(root.clone(), err))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|err| StoreError::io(root.clone(), err))?
                .is_dir();
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use url::Url;

    use super::*;

    fn entry(path: &str, body: &'static [u8]) -> CacheEntry {
        let url = Url::parse("http://origin.test/").unwrap().join(path).unwrap();
        CacheEntry::new(RequestKey::get(&url), Bytes::from_static(body), "text/plain")
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let stores = DiskStoreSet::new(dir.path().to_path_buf()).unwrap();
        let stored = entry("/api/menu.json?lang=en", b"{\"items\":[]}");
        stores.put("outpost-data-v1", stored.clone()).await.unwrap();

        let reopened = DiskStoreSet::new(dir.path().to_path_buf()).unwrap();
        let loaded = reopened
            .get("outpost-data-v1", &stored.key)
            .await
            .unwrap()
            .expect("entry present");
        assert_eq!(loaded.payload, stored.payload);
        assert_eq!(loaded.content_type, "text/plain");
        assert_eq!(loaded.size, stored.size);
    }

    #[tokio::test]
    async fn put_replaces_and_delete_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let stores = DiskStoreSet::new(dir.path().to_path_buf()).unwrap();
        let first = entry("/a", b"one");
        let second = CacheEntry::new(first.key.clone(), Bytes::from_static(b"two"), "text/plain")
            .with_inserted_at(first.inserted_at + Duration::seconds(1));

        stores.put("dyn", first.clone()).await.unwrap();
        stores.put("dyn", second).await.unwrap();
        let keys = stores.list_keys("dyn").await.unwrap();
        assert_eq!(keys, vec![first.key.clone()]);
        assert_eq!(
            stores.get("dyn", &first.key).await.unwrap().unwrap().payload,
            Bytes::from_static(b"two")
        );

        assert!(stores.delete("dyn", &first.key).await.unwrap());
        assert!(!stores.delete("dyn", &first.key).await.unwrap());
    }

    #[tokio::test]
    async fn missing_store_behaves_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let stores = DiskStoreSet::new(dir.path().to_path_buf()).unwrap();
        let sample = entry("/x", b"x");

        assert!(stores.get("nowhere", &sample.key).await.unwrap().is_none());
        assert!(stores.list_entries("nowhere").await.unwrap().is_empty());
        assert!(!stores.delete_store("nowhere").await.unwrap());
    }

    #[tokio::test]
    async fn store_names_are_sorted_directories() {
        let dir = tempfile::tempdir().unwrap();
        let stores = DiskStoreSet::new(dir.path().to_path_buf()).unwrap();
        stores.open("outpost-static-v1").await.unwrap();
        stores.put("outpost-data-v1", entry("/api/x", b"{}")).await.unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"").unwrap();

        assert_eq!(
            stores.store_names().await.unwrap(),
            vec!["outpost-data-v1".to_string(), "outpost-static-v1".to_string()]
        );
        assert!(stores.delete_store("outpost-static-v1").await.unwrap());
        assert_eq!(stores.store_names().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let stores = DiskStoreSet::new(dir.path().to_path_buf()).unwrap();
        let sample = entry("/broken", b"ok");
        stores.put("dyn", sample.clone()).await.unwrap();
        let path = stores.entry_path("dyn", &sample.key).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            stores.get("dyn", &sample.key).await,
            Err(StoreError::Corrupt { .. })
        ));
        assert!(stores.list_entries("dyn").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_of_one_key_stay_readable() {
        let dir = tempfile::tempdir().unwrap();
        let stores = std::sync::Arc::new(DiskStoreSet::new(dir.path().to_path_buf()).unwrap());
        let key = entry("/shared.css", b"").key;

        for round in 0..20 {
            let writers: Vec<_> = (0..8)
                .map(|writer| {
                    let stores = std::sync::Arc::clone(&stores);
                    let body = Bytes::from(format!("round {round} writer {writer}").repeat(64));
                    let entry = CacheEntry::new(key.clone(), body, "text/css");
                    tokio::spawn(async move { stores.put("dyn", entry).await })
                })
                .collect();
            let reader = {
                let stores = std::sync::Arc::clone(&stores);
                let key = key.clone();
                tokio::spawn(async move { stores.get("dyn", &key).await })
            };

            for writer in writers {
                writer.await.unwrap().unwrap();
            }
            reader.await.unwrap().unwrap();
        }

        assert_eq!(stores.list_keys("dyn").await.unwrap(), vec![key]);
        let leftovers = std::fs::read_dir(dir.path().join("dyn"))
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with('.')
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn listing_reads_headers_only() {
        let dir = tempfile::tempdir().unwrap();
        let stores = DiskStoreSet::new(dir.path().to_path_buf()).unwrap();
        let stored = entry("/big.js", b"payload");
        stores.put("dyn", stored.clone()).await.unwrap();

        let path = stores.entry_path("dyn", &stored.key).unwrap();
        let raw = std::fs::read(&path).unwrap();
        let header_end = raw.iter().position(|byte| *byte == b'\n').unwrap();
        let mut damaged = raw[..=header_end].to_vec();
        damaged.extend_from_slice(b"!!! not base64 !!!");
        std::fs::write(&path, damaged).unwrap();

        let listed = stores.list_entries("dyn").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, stored.key);
        assert_eq!(listed[0].size, 7);
        assert!(matches!(
            stores.get("dyn", &stored.key).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_path_like_store_names() {
        let dir = tempfile::tempdir().unwrap();
        let stores = DiskStoreSet::new(dir.path().to_path_buf()).unwrap();
        assert!(stores.open("../escape").await.is_err());
        assert!(stores.delete_store("..").await.is_err());
    }
}

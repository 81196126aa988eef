use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::RwLock,
};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    mime,
};

/// File name of the persisted metadata index inside the store directory.
const INDEX_FILE: &str = "index.json";

/// Metadata for one stored upload.
///
/// The on-disk name is always `<id><ext>`; the user-supplied name is kept for
/// display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub original_name: String,
    pub file_name: String,
    #[serde(rename = "mimetype")]
    pub mime_type: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Tunables for an [`AttachmentStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub max_file_bytes: usize,
    pub persist_index: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: 25 * 1024 * 1024,
            persist_index: true,
        }
    }
}

/// Directory-backed attachment storage.
///
/// Bytes are written before the index entry is published, so the index never
/// points at a file that was not fully written. The index lock is never held
/// across file I/O.
pub struct AttachmentStore {
    dir: PathBuf,
    options: StoreOptions,
    index: RwLock<HashMap<String, Attachment>>,
    /// Serializes index snapshots written to disk.
    persist_lock: tokio::sync::Mutex<()>,
}

impl AttachmentStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>, options: StoreOptions) -> Result<Self> {
        let dir = dir.into();
        let load_dir = dir.clone();
        let persist = options.persist_index;
        let index = tokio::task::spawn_blocking(move || -> Result<HashMap<String, Attachment>> {
            fs::create_dir_all(&load_dir)?;
            if persist {
                load_index(&load_dir)
            } else {
                Ok(HashMap::new())
            }
        })
        .await??;

        info!(dir = %dir.display(), entries = index.len(), "attachment store opened");

        Ok(Self {
            dir,
            options,
            index: RwLock::new(index),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute location of an attachment's bytes.
    pub fn path_for(&self, attachment: &Attachment) -> PathBuf {
        self.dir.join(&attachment.file_name)
    }

    /// Store `bytes` under a freshly generated id and index it.
    pub async fn put(
        &self,
        bytes: Vec<u8>,
        original_name: &str,
        mime_type: Option<&str>,
    ) -> Result<Attachment> {
        if bytes.is_empty() {
            return Err(Error::invalid_input("empty upload"));
        }
        if bytes.len() > self.options.max_file_bytes {
            return Err(Error::TooLarge {
                size: bytes.len(),
                limit: self.options.max_file_bytes,
            });
        }

        let original_name = match original_name.trim() {
            "" => "upload".to_string(),
            name => name.to_string(),
        };
        let id = uuid::Uuid::new_v4().to_string();
        let file_name = stored_file_name(&id, &original_name);
        let path = self.dir.join(&file_name);
        let size_bytes = bytes.len() as u64;

        let write_path = path.clone();
        tokio::task::spawn_blocking(move || write_new_file(&write_path, &bytes))
            .await?
            .map_err(|e| Error::storage_write(path, e))?;

        let attachment = Attachment {
            id: id.clone(),
            mime_type: mime::resolve(mime_type, &original_name),
            original_name,
            file_name,
            size_bytes,
            uploaded_at: Utc::now(),
        };

        self.index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), attachment.clone());
        info!(id, size = size_bytes, mime = %attachment.mime_type, "stored attachment");

        self.persist().await;
        Ok(attachment)
    }

    /// All indexed attachments, oldest first.
    pub fn list(&self) -> Vec<Attachment> {
        let mut all: Vec<Attachment> = self
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    pub fn get(&self, id: &str) -> Result<Attachment> {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }

    /// Metadata plus the stored bytes.
    ///
    /// A concurrent delete can remove the file after the index lookup; that
    /// surfaces as [`Error::NotFound`] as well.
    pub async fn read(&self, id: &str) -> Result<(Attachment, Vec<u8>)> {
        let attachment = self.get(id)?;
        let path = self.path_for(&attachment);
        let data = tokio::task::spawn_blocking(move || fs::read(path)).await?;
        match data {
            Ok(bytes) => Ok((attachment, bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::not_found(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the index entry, then remove the file. A file that is already
    /// gone is not an error.
    pub async fn delete(&self, id: &str) -> Result<Attachment> {
        let removed = self
            .index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        let attachment = removed.ok_or_else(|| Error::not_found(id))?;

        let path = self.path_for(&attachment);
        let outcome = tokio::task::spawn_blocking(move || fs::remove_file(path)).await?;
        self.persist().await;

        match outcome {
            Ok(()) => {
                info!(id, "deleted attachment");
                Ok(attachment)
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(id, "attachment file already absent");
                Ok(attachment)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Write the current index to disk. Failures are logged; the in-memory
    /// index stays authoritative.
    async fn persist(&self) {
        if !self.options.persist_index {
            return;
        }
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.list();
        let dir = self.dir.clone();
        let result = tokio::task::spawn_blocking(move || write_index(&dir, &snapshot)).await;
        match result {
            Ok(Ok(())) => {},
            Ok(Err(e)) => warn!(error = %e, "failed to persist attachment index"),
            Err(e) => warn!(error = %e, "attachment index writer panicked"),
        }
    }
}

fn stored_file_name(id: &str, original_name: &str) -> String {
    format!("{id}{}", mime::storage_extension(original_name))
}

fn write_new_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn write_index(dir: &Path, entries: &[Attachment]) -> Result<()> {
    let tmp = dir.join(format!("{INDEX_FILE}.tmp"));
    let json = serde_json::to_vec_pretty(entries)?;
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, dir.join(INDEX_FILE))?;
    Ok(())
}

/// Load a persisted index, keeping only entries whose file name matches the
/// id-derived form and whose bytes are still on disk.
fn load_index(dir: &Path) -> Result<HashMap<String, Attachment>> {
    let path = dir.join(INDEX_FILE);
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let entries: Vec<Attachment> = match serde_json::from_slice(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable attachment index");
            return Ok(HashMap::new());
        },
    };

    let mut index = HashMap::with_capacity(entries.len());
    for entry in entries {
        if entry.file_name != stored_file_name(&entry.id, &entry.original_name) {
            warn!(id = %entry.id, "dropping index entry with unexpected file name");
            continue;
        }
        if !dir.join(&entry.file_name).is_file() {
            debug!(id = %entry.id, "dropping index entry without stored bytes");
            continue;
        }
        index.insert(entry.id.clone(), entry);
    }
    Ok(index)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    async fn temp_store(options: StoreOptions) -> (AttachmentStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::open(dir.path().join("uploads"), options)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn put_then_get_reports_size() {
        let (store, _dir) = temp_store(StoreOptions::default()).await;
        let bytes = vec![7u8; 1234];
        let stored = store.put(bytes.clone(), "blob.bin", None).await.unwrap();

        let fetched = store.get(&stored.id).unwrap();
        assert_eq!(fetched.size_bytes, bytes.len() as u64);
        assert_eq!(fetched, stored);

        let (_, read_back) = store.read(&stored.id).await.unwrap();
        assert_eq!(read_back, bytes);
    }

    #[tokio::test]
    async fn upload_list_delete_scenario() {
        let (store, _dir) = temp_store(StoreOptions::default()).await;
        let stored = store
            .put(vec![b'a'; 500], "report.csv", Some("text/csv"))
            .await
            .unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stored.id);
        assert_eq!(listed[0].original_name, "report.csv");
        assert_eq!(listed[0].size_bytes, 500);
        assert_eq!(listed[0].mime_type, "text/csv");

        store.delete(&stored.id).await.unwrap();
        assert!(matches!(store.get(&stored.id), Err(Error::NotFound { .. })));
        assert!(!store.path_for(&stored).exists());
    }

    #[tokio::test]
    async fn delete_unknown_id_is_not_found() {
        let (store, _dir) = temp_store(StoreOptions::default()).await;
        let err = store.delete("does-not-exist").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { id } if id == "does-not-exist"));
    }

    #[tokio::test]
    async fn delete_tolerates_missing_file() {
        let (store, _dir) = temp_store(StoreOptions::default()).await;
        let stored = store.put(b"hello".to_vec(), "a.txt", None).await.unwrap();
        fs::remove_file(store.path_for(&stored)).unwrap();
        store.delete(&stored.id).await.unwrap();
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn read_after_file_vanished_is_not_found() {
        let (store, _dir) = temp_store(StoreOptions::default()).await;
        let stored = store.put(b"hello".to_vec(), "a.txt", None).await.unwrap();
        fs::remove_file(store.path_for(&stored)).unwrap();
        let err = store.read(&stored.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn storage_path_ignores_original_name() {
        let (store, _dir) = temp_store(StoreOptions::default()).await;
        let stored = store
            .put(b"#!/bin/sh".to_vec(), "../../evil.sh", None)
            .await
            .unwrap();
        assert_eq!(stored.file_name, format!("{}.sh", stored.id));
        assert_eq!(store.path_for(&stored).parent(), Some(store.dir()));
        assert_eq!(stored.original_name, "../../evil.sh");
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_uploads() {
        let (store, _dir) = temp_store(StoreOptions {
            max_file_bytes: 10,
            persist_index: false,
        })
        .await;
        assert!(matches!(
            store.put(Vec::new(), "x.txt", None).await,
            Err(Error::InvalidInput { .. })
        ));
        assert!(matches!(
            store.put(vec![0; 11], "x.txt", None).await,
            Err(Error::TooLarge { size: 11, limit: 10 })
        ));
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn concurrent_puts_get_distinct_ids() {
        let (store, _dir) = temp_store(StoreOptions::default()).await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .put(vec![i as u8; 8], "same-name.csv", None)
                    .await
                    .unwrap()
            }));
        }
        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            let stored = handle.await.unwrap();
            assert!(store.path_for(&stored).is_file());
            ids.insert(stored.id);
        }
        assert_eq!(ids.len(), 16);
        assert_eq!(store.list().len(), 16);
    }

    #[tokio::test]
    async fn persisted_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let kept_id;
        {
            let store = AttachmentStore::open(&root, StoreOptions::default())
                .await
                .unwrap();
            kept_id = store
                .put(b"keep".to_vec(), "keep.txt", None)
                .await
                .unwrap()
                .id;
            let dropped = store.put(b"drop".to_vec(), "drop.txt", None).await.unwrap();
            // Simulate bytes lost while the process was down.
            fs::remove_file(store.path_for(&dropped)).unwrap();
        }

        let reopened = AttachmentStore::open(&root, StoreOptions::default())
            .await
            .unwrap();
        let listed = reopened.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept_id);
        assert_eq!(listed[0].mime_type, "text/plain");
    }

    #[tokio::test]
    async fn in_memory_index_is_not_persisted_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let options = StoreOptions {
            persist_index: false,
            ..StoreOptions::default()
        };
        {
            let store = AttachmentStore::open(&root, options.clone()).await.unwrap();
            store.put(b"x".to_vec(), "x.txt", None).await.unwrap();
        }
        assert!(!root.join(INDEX_FILE).exists());
        let reopened = AttachmentStore::open(&root, options).await.unwrap();
        assert!(reopened.list().is_empty());
    }
}

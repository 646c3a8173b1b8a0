// rendezvous-core/src/store/local.rs

//! Shared-directory advertisement store.
//!
//! Each participant owns one entry, `<role>_<ordinal>.tfcluster`, holding its
//! advertisement as JSON. Entries are written to a hidden temp file in the
//! same directory and renamed into place, so readers never observe a
//! partially written entry.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::traits::AdvertisementStore;
use crate::config::StoreConfig;
use crate::error::{Result, RendezvousError};
use crate::topology::Advertisement;

/// File extension of published entries.
pub const ENTRY_EXTENSION: &str = "tfcluster";

/// Advertisement store backed by a directory visible to every participant.
///
/// Suitable for a local directory as well as a network filesystem, as long
/// as renames within the directory are atomic.
#[derive(Debug, Clone)]
pub struct FileAdvertisementStore {
    dir: PathBuf,
}

impl FileAdvertisementStore {
    /// Create a store rooted at `dir`. The directory is created on first publish.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.location())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, advertisement: &Advertisement) -> PathBuf {
        self.dir
            .join(format!("{}.{}", advertisement.entry_stem(), ENTRY_EXTENSION))
    }

    async fn read_entry(&self, path: &Path) -> Result<Advertisement> {
        let content = fs::read(path)
            .await
            .map_err(|e| RendezvousError::corrupt(path, format!("unreadable: {e}")))?;
        serde_json::from_slice(&content)
            .map_err(|e| RendezvousError::corrupt(path, format!("invalid JSON: {e}")))
    }

    async fn write_entry(&self, temp_path: &Path, content: &[u8]) -> Result<()> {
        let mut file = File::create(temp_path).await.map_err(|e| {
            RendezvousError::store_with_source(temp_path, "failed to create temp file", e)
        })?;
        file.write_all(content).await.map_err(|e| {
            RendezvousError::store_with_source(temp_path, "failed to write entry", e)
        })?;
        file.flush().await.map_err(|e| {
            RendezvousError::store_with_source(temp_path, "failed to flush entry", e)
        })?;
        file.sync_all().await.map_err(|e| {
            RendezvousError::store_with_source(temp_path, "failed to sync entry", e)
        })
    }
}

#[async_trait]
impl AdvertisementStore for FileAdvertisementStore {
    async fn publish(&self, advertisement: &Advertisement) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            RendezvousError::store_with_source(&self.dir, "failed to create directory", e)
        })?;

        let content = serde_json::to_vec(advertisement).map_err(|e| {
            RendezvousError::serialization(format!("failed to encode advertisement: {e}"))
        })?;

        let final_path = self.entry_path(advertisement);
        let temp_path = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            advertisement.entry_stem(),
            ENTRY_EXTENSION,
            Uuid::new_v4()
        ));

        if let Err(e) = self.write_entry(&temp_path, &content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(RendezvousError::store_with_source(
                &final_path,
                "failed to rename entry into place",
                e,
            ));
        }

        tracing::debug!(
            "Published {} {} at {}",
            advertisement.role,
            advertisement.ordinal,
            final_path.display()
        );
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Advertisement>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            // Nobody has published yet.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RendezvousError::store_with_source(
                    &self.dir,
                    "failed to list directory",
                    e,
                ))
            }
        };

        let mut advertisements = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(RendezvousError::store_with_source(
                        &self.dir,
                        "failed to list directory",
                        e,
                    ))
                }
            };

            let path = entry.path();
            // Temp files end in `.tmp` and are skipped here.
            if path.extension() != Some(OsStr::new(ENTRY_EXTENSION)) {
                continue;
            }

            match self.read_entry(&path).await {
                Ok(ad) => advertisements.push(ad),
                Err(e) => tracing::warn!("Skipping advertisement: {}", e),
            }
        }

        advertisements.sort_by(|a, b| {
            a.key()
                .cmp(&b.key())
                .then_with(|| a.endpoint.to_string().cmp(&b.endpoint.to_string()))
        });
        let before = advertisements.len();
        advertisements.dedup_by_key(|ad| ad.key());
        if advertisements.len() < before {
            tracing::debug!(
                "Ignored {} duplicate advertisements in {}",
                before - advertisements.len(),
                self.dir.display()
            );
        }

        Ok(advertisements)
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Endpoint, Role};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ad(ordinal: u32, host: &str, port: u16) -> Advertisement {
        Advertisement::new(ordinal, Endpoint::new(host, port))
    }

    fn entry_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_publish_and_read_all() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileAdvertisementStore::new(temp_dir.path().join("comm"));

        store.publish(&ad(1, "10.0.0.2", 49300)).await.unwrap();
        store.publish(&ad(0, "10.0.0.1", 49200)).await.unwrap();

        let ads = store.read_all().await.unwrap();
        assert_eq!(ads, vec![ad(0, "10.0.0.1", 49200), ad(1, "10.0.0.2", 49300)]);
        assert_eq!(
            entry_names(store.dir()),
            vec!["ps_0.tfcluster", "worker_1.tfcluster"]
        );
    }

    #[tokio::test]
    async fn test_republish_replaces_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileAdvertisementStore::new(temp_dir.path());

        store.publish(&ad(2, "10.0.0.3", 50000)).await.unwrap();
        store.publish(&ad(2, "10.0.0.3", 50001)).await.unwrap();

        let ads = store.read_all().await.unwrap();
        assert_eq!(ads, vec![ad(2, "10.0.0.3", 50001)]);
        assert_eq!(entry_names(temp_dir.path()), vec!["worker_2.tfcluster"]);
    }

    #[tokio::test]
    async fn test_read_all_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileAdvertisementStore::new(temp_dir.path().join("not-yet"));

        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_all_skips_corrupt_and_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileAdvertisementStore::new(temp_dir.path());
        store.publish(&ad(0, "10.0.0.1", 49200)).await.unwrap();

        std::fs::write(temp_dir.path().join("worker_1.tfcluster"), b"{\"role\": \"wor").unwrap();
        std::fs::write(temp_dir.path().join(".worker_2.tfcluster.abc.tmp"), b"{}").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::create_dir(temp_dir.path().join("nested")).unwrap();

        let ads = store.read_all().await.unwrap();
        assert_eq!(ads, vec![ad(0, "10.0.0.1", 49200)]);
    }

    #[tokio::test]
    async fn test_read_all_accepts_legacy_entries() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("worker_1_10.0.0.2:49300.tfcluster"),
            br#"{"task": "worker", "worker_idx": 1, "ip_address": "10.0.0.2", "port": 49300}"#,
        )
        .unwrap();

        let store = FileAdvertisementStore::new(temp_dir.path());
        let ads = store.read_all().await.unwrap();

        assert_eq!(ads.len(), 1);
        assert_eq!(ads[0].role, Role::Worker);
        assert_eq!(ads[0].endpoint, Endpoint::new("10.0.0.2", 49300));
    }

    #[tokio::test]
    async fn test_read_all_deduplicates_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileAdvertisementStore::new(temp_dir.path());
        store.publish(&ad(1, "10.0.0.2", 49300)).await.unwrap();
        std::fs::write(
            temp_dir.path().join("worker_1_old.tfcluster"),
            serde_json::to_vec(&ad(1, "10.0.0.9", 49999)).unwrap(),
        )
        .unwrap();

        let ads = store.read_all().await.unwrap();
        assert_eq!(ads.len(), 1);
        assert_eq!(ads[0].ordinal, 1);
    }

    #[tokio::test]
    async fn test_publish_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileAdvertisementStore::new(temp_dir.path());

        for port in 0..5 {
            store.publish(&ad(0, "10.0.0.1", 49200 + port)).await.unwrap();
        }

        assert_eq!(entry_names(temp_dir.path()), vec!["ps_0.tfcluster"]);
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileAdvertisementStore::new(temp_dir.path().join("comm")));

        let handles: Vec<_> = (0..8u32)
            .map(|ordinal| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .publish(&ad(ordinal, &format!("10.0.0.{}", ordinal + 1), 50000))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let ads = store.read_all().await.unwrap();
        let ordinals: Vec<u32> = ads.iter().map(|a| a.ordinal).collect();
        assert_eq!(ordinals, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_directory_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("occupied");
        std::fs::write(&path, b"not a directory").unwrap();
        let store = FileAdvertisementStore::new(&path);

        let err = store.publish(&ad(0, "10.0.0.1", 1)).await.unwrap_err();
        assert!(matches!(err, RendezvousError::StoreUnavailable { .. }));

        let err = store.read_all().await.unwrap_err();
        assert!(matches!(err, RendezvousError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_from_config_uses_run_id() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            comm_folder: temp_dir.path().to_path_buf(),
            run_id: Some("job-42".to_string()),
        };

        let store = FileAdvertisementStore::from_config(&config);
        store.publish(&ad(0, "h", 1)).await.unwrap();

        assert!(temp_dir.path().join("job-42").join("ps_0.tfcluster").exists());
        assert!(store.location().ends_with("job-42"));
    }

    #[tokio::test]
    async fn test_store_is_object_safe() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn AdvertisementStore> =
            Arc::new(FileAdvertisementStore::new(temp_dir.path()));

        store.publish(&ad(0, "h", 1)).await.unwrap();
        assert_eq!(store.read_all().await.unwrap().len(), 1);
    }
}

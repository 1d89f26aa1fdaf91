//! Immutable archive of fetched exports, hash-addressed per run date.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ArchivedSnapshot {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Stores each fetched CSV export before parsing, so every run's raw input
/// can be replayed or audited later. Identical bytes deduplicate by hash.
#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    root: PathBuf,
}

impl SnapshotArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn snapshot_relative_path(run_date: NaiveDate, content_hash: &str) -> PathBuf {
        PathBuf::from(run_date.format("%Y%m%d").to_string()).join(format!("{content_hash}.csv"))
    }

    /// Store the export text immutably via atomic temp-file rename.
    pub async fn store_export(
        &self,
        run_date: NaiveDate,
        text: &str,
    ) -> anyhow::Result<ArchivedSnapshot> {
        let bytes = text.as_bytes();
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = Self::snapshot_relative_path(run_date, &content_hash);
        let absolute_path = self.root.join(&relative_path);

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating archive directory {}", parent.display()))?;
        }

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            return Ok(ArchivedSnapshot {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: true,
            });
        }

        let temp_name = format!(".{}.tmp", Uuid::new_v4());
        let temp_path = absolute_path
            .parent()
            .expect("archive path always has parent")
            .join(temp_name);

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp snapshot {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp snapshot {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp snapshot {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(ArchivedSnapshot {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: false,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(ArchivedSnapshot {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    deduplicated: true,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming snapshot {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn snapshot_hashing_is_stable() {
        let hash = SnapshotArchive::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn identical_exports_deduplicate_by_hash_path() {
        let dir = tempdir().expect("tempdir");
        let archive = SnapshotArchive::new(dir.path());
        let run_date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let text = "date,metal,tenor_months,price\n2024-03-01,gold,12,2100.0";

        let first = archive.store_export(run_date, text).await.expect("first");
        let second = archive.store_export(run_date, text).await.expect("second");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.absolute_path.exists());
    }

    #[tokio::test]
    async fn different_dates_archive_under_separate_directories() {
        let dir = tempdir().expect("tempdir");
        let archive = SnapshotArchive::new(dir.path());
        let text = "date,metal,tenor_months,price\n2024-03-01,gold,12,2100.0";

        let a = archive
            .store_export(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), text)
            .await
            .expect("a");
        let b = archive
            .store_export(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(), text)
            .await
            .expect("b");

        assert_ne!(a.relative_path, b.relative_path);
        assert!(!b.deduplicated);
    }
}

//! Write-once document storage, one directory per session.
//!
//! Layout: `<root>/<session id>/<bill id>.txt`. A document that exists is
//! complete; writes go through a hidden temp file and a rename so an
//! interrupted write never shows up under the final name.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::DOCUMENT_EXTENSION;
use crate::error::{HarvesterError, Result};
use crate::types::{BillId, Session};

/// Attempts per document before a write failure is surfaced.
const STORAGE_WRITE_ATTEMPTS: u32 = 3;

/// Linear backoff step between write attempts.
const STORAGE_RETRY_DELAY_MS: u64 = 100;

/// Result of a successful [`DocumentStore::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PathBuf),
    /// Another writer got there first; nothing was changed.
    AlreadyPresent(PathBuf),
}

/// Filesystem-backed document store.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Open the store at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn partition(&self, session: Session) -> PathBuf {
        self.root.join(session.id())
    }

    #[must_use]
    pub fn document_path(&self, session: Session, bill_id: &BillId) -> PathBuf {
        self.partition(session)
            .join(format!("{bill_id}.{DOCUMENT_EXTENSION}"))
    }

    /// Create the session directory if it is missing.
    pub async fn ensure_partition(&self, session: Session) -> Result<PathBuf> {
        let dir = self.partition(session);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| HarvesterError::StorageWrite {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    /// Whether a complete document is stored for `bill_id`.
    ///
    /// Metadata errors other than "not found" count as absent; the
    /// subsequent write will surface them.
    pub async fn exists(&self, session: Session, bill_id: &BillId) -> bool {
        let path = self.document_path(session, bill_id);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.is_file(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), error = %e, "treating unreadable document as absent");
                }
                false
            }
        }
    }

    /// Atomically store `text` as the document for `bill_id`.
    ///
    /// Transient IO failures, including creating the partition, are
    /// retried a few times.
    pub async fn write(&self, session: Session, bill_id: &BillId, text: &str) -> Result<WriteOutcome> {
        let dir = self.partition(session);
        let target = self.document_path(session, bill_id);

        let mut attempt = 1;
        loop {
            let dir_for_write = dir.clone();
            let target_for_write = target.clone();
            let temp = temp_path(&dir, bill_id);
            let content = text.to_string();

            let result = tokio::task::spawn_blocking(move || {
                fs::create_dir_all(&dir_for_write)?;
                write_atomic(&temp, &target_for_write, &content)
            })
            .await?;

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(source) if attempt < STORAGE_WRITE_ATTEMPTS => {
                    tracing::warn!(
                        path = %target.display(),
                        error = %source,
                        attempt,
                        "Storage write failed, will retry"
                    );
                    tokio::time::sleep(Duration::from_millis(
                        STORAGE_RETRY_DELAY_MS * u64::from(attempt),
                    ))
                    .await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(HarvesterError::StorageWrite {
                        path: target,
                        source,
                    });
                }
            }
        }
    }
}

/// Hidden, per-writer temp file next to the target.
fn temp_path(dir: &Path, bill_id: &BillId) -> PathBuf {
    dir.join(format!(
        ".{bill_id}.{DOCUMENT_EXTENSION}.{}.tmp",
        uuid::Uuid::new_v4().simple()
    ))
}

/// Write to `temp`, sync, then rename onto `target` unless it already exists.
fn write_atomic(temp: &Path, target: &Path, content: &str) -> std::io::Result<WriteOutcome> {
    if target.exists() {
        return Ok(WriteOutcome::AlreadyPresent(target.to_path_buf()));
    }

    let written = (|| {
        let mut file = File::create(temp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(temp);
        return Err(e);
    }

    // A concurrent task may have finished the same document meanwhile
    if target.exists() {
        let _ = fs::remove_file(temp);
        return Ok(WriteOutcome::AlreadyPresent(target.to_path_buf()));
    }

    if let Err(e) = fs::rename(temp, target) {
        let _ = fs::remove_file(temp);
        return Err(e);
    }
    Ok(WriteOutcome::Written(target.to_path_buf()))
}

/// Atomically replace `target` with `content`, overwriting any previous file.
pub fn replace_atomic(target: &Path, content: &str) -> Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let result = (|| {
        fs::create_dir_all(&dir)?;
        let mut file = File::create(&temp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp, target)
    })();
    result.map_err(|source| {
        let _ = fs::remove_file(&temp);
        HarvesterError::StorageWrite {
            path: target.to_path_buf(),
            source,
        }
    })
}

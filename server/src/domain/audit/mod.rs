//! Append-only audit log of settings changes
//!
//! One JSON object per line. Appends are serialized by an async mutex inside
//! the process and an exclusive lock on a sidecar `.lock` file across
//! processes. When the active file grows past `max_bytes` it is renamed to
//! `<name>.<UTC timestamp>` before the next entry is written.
//!
//! Reads only look at the active file; rotated archives are not paged through.

mod types;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub use types::{Actor, AuditAction, AuditEntry, AuditPage, ValueChange};

use crate::core::config::AuditConfig;
use crate::domain::settings::{SecretCodec, SettingValue};

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit log IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize audit entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit task failed: {0}")]
    Task(String),
}

/// A field's value before and after a change, unredacted
#[derive(Debug, Clone)]
pub struct FieldChange {
    pub key: String,
    pub old: SettingValue,
    pub new: SettingValue,
}

pub struct AuditLog {
    path: PathBuf,
    max_bytes: u64,
    max_page_size: usize,
    secrets: SecretCodec,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(
        path: impl Into<PathBuf>,
        max_bytes: u64,
        max_page_size: usize,
        secrets: SecretCodec,
    ) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            max_page_size: max_page_size.max(1),
            secrets,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(path: &Path, config: &AuditConfig, secrets: SecretCodec) -> Self {
        tracing::debug!(
            path = %path.display(),
            max_bytes = config.max_bytes,
            "Audit log ready"
        );
        Self::new(path, config.max_bytes, config.max_page_size, secrets)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    /// Build a redacted entry for `changes` and append it.
    ///
    /// Redaction happens here, so nothing that reaches the file can carry a
    /// secret value.
    pub async fn record(
        &self,
        action: AuditAction,
        actor: &Actor,
        changes: &[FieldChange],
    ) -> Result<AuditEntry, AuditError> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            actor: actor.clone(),
            changes: changes
                .iter()
                .map(|c| {
                    (
                        c.key.clone(),
                        ValueChange {
                            old: self.secrets.redact(&c.key, &c.old),
                            new: self.secrets.redact(&c.key, &c.new),
                        },
                    )
                })
                .collect(),
        };

        self.append(&entry).await?;
        tracing::debug!(
            id = %entry.id,
            action = %entry.action,
            fields = entry.changes.len(),
            "Audit entry appended"
        );
        Ok(entry)
    }

    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let max_bytes = self.max_bytes;
        tokio::task::spawn_blocking(move || append_blocking(&path, max_bytes, &line))
            .await
            .map_err(|e| AuditError::Task(e.to_string()))??;
        Ok(())
    }

    /// Newest-first page of the active log. `page` is 0-based and `page_size`
    /// is clamped to `1..=max_page_size`.
    pub async fn read(&self, page: usize, page_size: usize) -> Result<AuditPage, AuditError> {
        let page_size = page_size.clamp(1, self.max_page_size);

        let content = {
            let _guard = self.lock.lock().await;
            match tokio::fs::read_to_string(&self.path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(e.into()),
            }
        };

        let mut entries: Vec<AuditEntry> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(line = n + 1, error = %e, "Skipping malformed audit line");
                    None
                }
            })
            .collect();
        entries.reverse();

        let total = entries.len();
        let entries = entries
            .into_iter()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(AuditPage {
            page,
            page_size,
            total,
            entries,
        })
    }
}

fn append_blocking(path: &Path, max_bytes: u64, line: &[u8]) -> Result<(), AuditError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut lock_name = path.as_os_str().to_owned();
    lock_name.push(".lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(PathBuf::from(lock_name))?;
    lock_file.lock_exclusive()?;

    match fs::metadata(path) {
        Ok(meta) if meta.len() > max_bytes => rotate(path)?,
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line)?;
    file.sync_data()?;

    // Lock released when lock_file drops
    Ok(())
}

fn rotate(path: &Path) -> Result<(), AuditError> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.9fZ");
    let mut archive = path.as_os_str().to_owned();
    archive.push(format!(".{stamp}"));
    let archive = PathBuf::from(archive);

    fs::rename(path, &archive)?;
    tracing::info!(archive = %archive.display(), "Rotated audit log");
    Ok(())
}

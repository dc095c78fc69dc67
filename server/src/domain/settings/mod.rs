//! Settings store
//!
//! Owns the canonical configuration. Reads come from a lock-free cache;
//! writes are serialized by one async mutex around the backend and follow
//! validate -> resolve secrets -> persist -> swap cache -> audit.
//!
//! Once the writer lock is held the critical section runs in its own task, so
//! a caller that disconnects mid-write cannot leave the backend and the cache
//! disagreeing.

mod cipher;
mod codec;
mod error;
mod schema;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

pub use cipher::{
    CodecError, ENCRYPTED_MAGIC, EncryptedCodec, JsonCodec, PayloadCodec, StoredDocument,
    build_codec,
};
pub use codec::SecretCodec;
pub use error::{REASON_INVALID_TYPE, REASON_UNKNOWN_KEY, SettingsError};
pub use schema::{Configuration, FieldKind, FieldSpec, Schema, Sensitivity, SettingValue};

use crate::core::config::{PostgresConfig, RelationalBackend, StorageBackend, StorageConfig};
use crate::core::storage::AppStorage;
use crate::data::{DataError, SettingsBackend};
use crate::domain::audit::{Actor, AuditAction, AuditLog, FieldChange};

/// Whether the preferred backend is serving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStatus {
    pub mode: StorageMode,
    pub backend: &'static str,
}

/// Inputs for picking a backend, kept for reinitialize
#[derive(Debug, Clone)]
pub struct BackendSelection {
    pub preferred: StorageBackend,
    pub relational: RelationalBackend,
    pub postgres: Option<PostgresConfig>,
    pub file_path: PathBuf,
    pub storage: AppStorage,
}

impl BackendSelection {
    pub fn from_config(config: &StorageConfig, storage: &AppStorage) -> Self {
        Self {
            preferred: config.backend,
            relational: config.relational,
            postgres: config.postgres.clone(),
            file_path: storage.settings_file().to_path_buf(),
            storage: storage.clone(),
        }
    }

    /// Try the preferred backend; a relational failure falls back to the file
    async fn select(&self, timeout: Duration) -> (SettingsBackend, StorageMode) {
        if self.preferred == StorageBackend::File {
            return (
                SettingsBackend::file(&self.file_path),
                StorageMode::Primary,
            );
        }

        let init = SettingsBackend::init_relational(
            self.relational,
            &self.storage,
            self.postgres.as_ref(),
        );
        let error = match tokio::time::timeout(timeout, init).await {
            Ok(Ok(backend)) => return (backend, StorageMode::Primary),
            Ok(Err(e)) => e,
            Err(_) => DataError::timeout(relational_name(self.relational), timeout.as_secs()),
        };

        tracing::warn!(
            backend = relational_name(self.relational),
            error = %error,
            path = %self.file_path.display(),
            "Relational settings backend unavailable, falling back to file storage"
        );
        (SettingsBackend::file(&self.file_path), StorageMode::Fallback)
    }
}

fn relational_name(kind: RelationalBackend) -> &'static str {
    match kind {
        RelationalBackend::Sqlite => "sqlite",
        RelationalBackend::Postgres => "postgres",
    }
}

/// Result of a write: the configuration now in effect and the keys that changed
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub config: Arc<Configuration>,
    pub changed: Vec<String>,
    /// False when the change persisted but its audit entry could not be appended
    pub audited: bool,
}

/// Result of a reinitialize: the backend now serving and whether the switch
/// made it into the audit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOutcome {
    pub status: StorageStatus,
    pub audited: bool,
}

/// Requested value per key after validation; `None` keeps the current value
type ValidatedWrite = Vec<(String, Option<SettingValue>)>;

#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<Inner>,
}

struct Inner {
    schema: Arc<Schema>,
    secrets: SecretCodec,
    payload: Arc<dyn PayloadCodec>,
    audit: Arc<AuditLog>,
    cache: ArcSwap<Configuration>,
    writer: Arc<Mutex<SettingsBackend>>,
    status: RwLock<StorageStatus>,
    selection: BackendSelection,
    timeout: Duration,
}

impl SettingsStore {
    /// Select a backend and load the stored configuration.
    ///
    /// Fails with `Integrity` when the stored payload cannot be decrypted or
    /// decoded; serving defaults in that case could hide tampering.
    pub async fn open(
        schema: Arc<Schema>,
        payload: Arc<dyn PayloadCodec>,
        audit: Arc<AuditLog>,
        selection: BackendSelection,
        timeout: Duration,
    ) -> Result<Self, SettingsError> {
        let (backend, mode) = selection.select(timeout).await;
        let status = StorageStatus {
            mode,
            backend: backend.name(),
        };

        let config = load_configuration(&backend, payload.as_ref(), &schema, timeout).await?;

        tracing::info!(
            backend = status.backend,
            mode = ?status.mode,
            codec = payload.name(),
            "Settings store ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                secrets: SecretCodec::new(schema.clone()),
                schema,
                payload,
                audit,
                cache: ArcSwap::from_pointee(config),
                writer: Arc::new(Mutex::new(backend)),
                status: RwLock::new(status),
                selection,
                timeout,
            }),
        })
    }

    /// Current configuration, unmasked. Never touches the backend.
    pub fn get(&self) -> Arc<Configuration> {
        self.inner.cache.load_full()
    }

    /// Current configuration with secrets masked
    pub fn masked(&self) -> Configuration {
        self.inner.secrets.mask(&self.get())
    }

    pub fn secrets(&self) -> &SecretCodec {
        &self.inner.secrets
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn audit(&self) -> &AuditLog {
        &self.inner.audit
    }

    pub fn status(&self) -> StorageStatus {
        self.inner.status.read().clone()
    }

    /// Apply a partial update. Every key is validated before anything is
    /// written; a single bad key rejects the whole request.
    pub async fn update(
        &self,
        partial: &Map<String, Value>,
        actor: Actor,
    ) -> Result<UpdateOutcome, SettingsError> {
        let validated = self.validate(partial)?;

        let backend = self.inner.writer.clone().lock_owned().await;
        let inner = self.inner.clone();
        run_critical(async move {
            let current = inner.cache.load_full();
            let mut next = (*current).clone();
            for (key, incoming) in &validated {
                let existing = current
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| SettingValue::text(""));
                next.insert(
                    key.clone(),
                    inner.secrets.resolve_write(key, incoming.as_ref(), &existing),
                );
            }
            inner
                .commit(&backend, current, next, AuditAction::Update, &actor)
                .await
        })
        .await
    }

    /// Restore schema defaults, secrets included
    pub async fn reset(&self, actor: Actor) -> Result<UpdateOutcome, SettingsError> {
        let backend = self.inner.writer.clone().lock_owned().await;
        let inner = self.inner.clone();
        run_critical(async move {
            let current = inner.cache.load_full();
            let next = inner.schema.defaults();
            inner
                .commit(&backend, current, next, AuditAction::Reset, &actor)
                .await
        })
        .await
    }

    /// Re-run backend selection. When a different backend comes up, the
    /// cached configuration is written to it before it starts serving.
    pub async fn reinitialize(&self, actor: Actor) -> Result<StorageOutcome, SettingsError> {
        let backend = self.inner.writer.clone().lock_owned().await;
        let inner = self.inner.clone();
        run_critical(async move { inner.reinitialize(backend, &actor).await }).await
    }

    /// Close the backend after any in-flight write has committed
    pub async fn close(&self) {
        let backend = self.inner.writer.lock().await;
        backend.close().await;
    }

    fn validate(&self, partial: &Map<String, Value>) -> Result<ValidatedWrite, SettingsError> {
        partial
            .iter()
            .map(|(key, raw)| {
                let field = self
                    .inner
                    .schema
                    .field(key)
                    .ok_or_else(|| SettingsError::unknown_key(key))?;

                let value = match (field.sensitivity, raw) {
                    (Sensitivity::Secret, Value::Null) => None,
                    (Sensitivity::Plain, Value::Null) => {
                        return Err(SettingsError::invalid_type(key));
                    }
                    (_, raw) => Some(
                        field
                            .kind
                            .parse(raw)
                            .ok_or_else(|| SettingsError::invalid_type(key))?,
                    ),
                };
                Ok((key.clone(), value))
            })
            .collect()
    }

    /// File-backed store in `dir` with a plain codec
    #[cfg(test)]
    pub async fn for_test(dir: &std::path::Path) -> Self {
        let storage = AppStorage::init_for_test(dir.to_path_buf());
        let selection = BackendSelection {
            preferred: StorageBackend::File,
            relational: RelationalBackend::Sqlite,
            postgres: None,
            file_path: storage.settings_file().to_path_buf(),
            storage: storage.clone(),
        };
        Self::open_for_test(selection, Arc::new(JsonCodec)).await.unwrap()
    }

    #[cfg(test)]
    pub async fn open_for_test(
        selection: BackendSelection,
        payload: Arc<dyn PayloadCodec>,
    ) -> Result<Self, SettingsError> {
        let schema = Arc::new(Schema::trading());
        let audit = Arc::new(AuditLog::new(
            selection.storage.audit_file(),
            1024 * 1024,
            200,
            SecretCodec::new(schema.clone()),
        ));
        Self::open(schema, payload, audit, selection, Duration::from_secs(5)).await
    }
}

/// Run a write in its own task so it completes even if the caller is dropped
async fn run_critical<T, F>(work: F) -> Result<T, SettingsError>
where
    T: Send + 'static,
    F: std::future::Future<Output = Result<T, SettingsError>> + Send + 'static,
{
    tokio::spawn(work).await.map_err(|e| {
        tracing::error!(error = %e, "Settings write task failed");
        SettingsError::Persistence(DataError::backend_unavailable(
            "settings",
            "write task failed",
        ))
    })?
}

async fn load_configuration(
    backend: &SettingsBackend,
    payload: &dyn PayloadCodec,
    schema: &Schema,
    timeout: Duration,
) -> Result<Configuration, SettingsError> {
    let stored = tokio::time::timeout(timeout, backend.load())
        .await
        .map_err(|_| DataError::timeout(backend.name(), timeout.as_secs()))??;

    match stored {
        None => {
            tracing::debug!(backend = backend.name(), "No stored settings, using defaults");
            Ok(schema.defaults())
        }
        Some(bytes) => {
            let document = payload.decode(&bytes)?;
            Ok(schema.reconcile(&document))
        }
    }
}

impl Inner {
    async fn save(
        &self,
        backend: &SettingsBackend,
        config: &Configuration,
    ) -> Result<(), SettingsError> {
        let bytes = self.payload.encode(config)?;
        tokio::time::timeout(self.timeout, backend.save(&bytes))
            .await
            .map_err(|_| DataError::timeout(backend.name(), self.timeout.as_secs()))??;
        Ok(())
    }

    /// Persist `next` if it differs from `current`, then swap the cache and audit
    async fn commit(
        &self,
        backend: &SettingsBackend,
        current: Arc<Configuration>,
        next: Configuration,
        action: AuditAction,
        actor: &Actor,
    ) -> Result<UpdateOutcome, SettingsError> {
        let changes: Vec<FieldChange> = next
            .iter()
            .filter_map(|(key, new)| {
                let old = current.get(key);
                (old != Some(new)).then(|| FieldChange {
                    key: key.clone(),
                    old: old.cloned().unwrap_or_else(|| SettingValue::text("")),
                    new: new.clone(),
                })
            })
            .collect();

        if changes.is_empty() {
            tracing::debug!(action = %action, "Settings unchanged, nothing to persist");
            return Ok(UpdateOutcome {
                config: current,
                changed: Vec::new(),
                audited: true,
            });
        }

        if let Err(e) = self.save(backend, &next).await {
            tracing::error!(
                backend = backend.name(),
                action = %action,
                error = %e,
                "Failed to persist settings"
            );
            return Err(e);
        }

        let next = Arc::new(next);
        self.cache.store(next.clone());

        let changed: Vec<String> = changes.iter().map(|c| c.key.clone()).collect();
        tracing::info!(
            backend = backend.name(),
            action = %action,
            changed = ?changed,
            "Settings committed"
        );

        // The change is durable at this point; a failed append is reported, not rolled back
        let audited = self.append_audit(action, actor, &changes).await;

        Ok(UpdateOutcome {
            config: next,
            changed,
            audited,
        })
    }

    async fn append_audit(
        &self,
        action: AuditAction,
        actor: &Actor,
        changes: &[FieldChange],
    ) -> bool {
        match self.audit.record(action, actor, changes).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    action = %action,
                    fields = changes.len(),
                    "Committed change has no audit entry"
                );
                false
            }
        }
    }

    async fn reinitialize(
        &self,
        mut current: OwnedMutexGuard<SettingsBackend>,
        actor: &Actor,
    ) -> Result<StorageOutcome, SettingsError> {
        let previous = self.status.read().clone();
        let (candidate, mode) = self.selection.select(self.timeout).await;

        if candidate.name() == current.name() {
            candidate.close().await;
            let status = StorageStatus {
                mode,
                backend: current.name(),
            };
            *self.status.write() = status.clone();
            tracing::info!(
                backend = status.backend,
                mode = ?status.mode,
                "Settings backend unchanged"
            );
            return Ok(StorageOutcome {
                status,
                audited: true,
            });
        }

        let config = self.cache.load_full();
        if let Err(e) = self.save(&candidate, &config).await {
            tracing::error!(
                backend = candidate.name(),
                error = %e,
                "Failed to seed settings into new backend, keeping current one"
            );
            candidate.close().await;
            return Err(e);
        }

        let old = std::mem::replace(&mut *current, candidate);
        old.close().await;

        let status = StorageStatus {
            mode,
            backend: current.name(),
        };
        *self.status.write() = status.clone();
        tracing::info!(
            from = previous.backend,
            to = status.backend,
            mode = ?status.mode,
            "Settings backend switched"
        );

        let change = FieldChange {
            key: "storage".to_string(),
            old: SettingValue::text(describe(&previous)),
            new: SettingValue::text(describe(&status)),
        };
        let audited = self
            .append_audit(AuditAction::Reinitialize, actor, &[change])
            .await;

        Ok(StorageOutcome { status, audited })
    }
}

fn describe(status: &StorageStatus) -> String {
    let mode = match status.mode {
        StorageMode::Primary => "primary",
        StorageMode::Fallback => "fallback",
    };
    format!("{} ({})", status.backend, mode)
}

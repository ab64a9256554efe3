//! # Model Store Module
//!
//! Durable, versioned repository of trained classifier artifacts.
//!
//! ## Versions
//! Every commit attempt appends a [`ModelVersion`] to an append-only ledger.
//! A version starts `Pending` with no artifact and is finalized exactly once:
//! either `Committed` (artifact uploaded, success status) or `Failed`
//! (artifact stays empty, failure status). Nothing is ever deleted, so the
//! ledger doubles as an audit trail of failed training attempts.
//!
//! ## Resolution
//! "The current model" is the most recently created `Committed` version.
//! Its artifact is read through a [`LocalCache`]: the first access downloads
//! the full blob and writes it to the cache directory, later accesses read
//! the local copy. Artifact paths embed a fresh UUID, so a cached copy can
//! never go stale.
//!
//! ## Writers
//! The store assumes a single writer. Callers serialize training cycles (see
//! [`crate::trainer`]); readers may run concurrently with a commit and will
//! see either the previous or the new latest version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::blob::{BlobStore, FsBlobStore, normalize_path, write_atomically};
use crate::classifier::Classifier;
use crate::config::{ClassifierConfig, StorageConfig};
use crate::error::{StorageError, StoreError};

/// Blob directory holding committed artifacts.
pub const MODELS_DIR: &str = "models";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Pending,
    Committed,
    Failed,
}

/// One entry of the model history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: u64,
    /// Blob path of the serialized classifier; `None` until committed.
    pub artifact: Option<String>,
    pub tag: String,
    pub created_at: DateTime<Utc>,
    pub status: Option<String>,
    pub state: VersionState,
    /// Highest sample id the training corpus of this version had seen.
    #[serde(default)]
    pub sample_watermark: Option<u64>,
}

impl ModelVersion {
    /// True when this version can be served.
    pub fn is_usable(&self) -> bool {
        self.state == VersionState::Committed && self.artifact.is_some()
    }
}

/// Append-only list of versions, optionally mirrored to a JSON file.
#[derive(Debug)]
pub struct VersionLedger {
    path: Option<PathBuf>,
    versions: Vec<ModelVersion>,
}

impl VersionLedger {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            versions: Vec::new(),
        }
    }

    /// Opens the ledger file, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let versions = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StoreError::Ledger)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StorageError::io(path.display().to_string(), e).into()),
        };
        Ok(Self {
            path: Some(path),
            versions,
        })
    }

    pub fn versions(&self) -> &[ModelVersion] {
        &self.versions
    }

    /// Newest usable version by creation time; the higher id breaks ties.
    pub fn latest_usable(&self) -> Option<&ModelVersion> {
        self.versions
            .iter()
            .filter(|v| v.is_usable())
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
    }

    fn append_pending(
        &mut self,
        tag: &str,
        sample_watermark: Option<u64>,
    ) -> Result<ModelVersion, StoreError> {
        let version = ModelVersion {
            id: self.versions.iter().map(|v| v.id).max().map_or(1, |id| id + 1),
            artifact: None,
            tag: tag.to_string(),
            created_at: Utc::now(),
            status: None,
            state: VersionState::Pending,
            sample_watermark,
        };
        let mut next = self.versions.clone();
        next.push(version.clone());
        self.replace(next)?;
        Ok(version)
    }

    fn finalize(
        &mut self,
        id: u64,
        artifact: Option<String>,
        state: VersionState,
        status: String,
    ) -> Result<ModelVersion, StoreError> {
        let mut next = self.versions.clone();
        let version = next
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or(StoreError::UnknownVersion(id))?;
        if version.state != VersionState::Pending {
            return Err(StoreError::AlreadyFinalized(id));
        }
        version.artifact = artifact;
        version.state = state;
        version.status = Some(status);
        let finalized = version.clone();
        self.replace(next)?;
        Ok(finalized)
    }

    /// Persists `next` first and only then swaps it in, so a failed write
    /// leaves memory and disk in agreement.
    fn replace(&mut self, next: Vec<ModelVersion>) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            let bytes = serde_json::to_vec_pretty(&next).map_err(StoreError::Ledger)?;
            write_atomically(path, &bytes)?;
        }
        self.versions = next;
        Ok(())
    }
}

/// Local copies of downloaded artifacts, keyed by artifact path.
///
/// Entries are never invalidated: an artifact path is written once and never
/// overwritten in the durable store.
#[derive(Debug)]
pub struct LocalCache {
    dir: PathBuf,
    entries: Mutex<HashMap<String, PathBuf>>,
}

impl LocalCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the local copy of `artifact` lives (whether or not it exists).
    pub fn local_path(&self, artifact: &str) -> Result<PathBuf, StorageError> {
        Ok(self.dir.join(normalize_path(artifact)?))
    }

    /// True if a local copy is already on disk.
    pub fn contains(&self, artifact: &str) -> bool {
        self.local_path(artifact).is_ok_and(|p| p.is_file())
    }

    /// Returns the artifact bytes, downloading them on a miss.
    ///
    /// Concurrent misses for the same artifact may both download; the
    /// atomic rename makes the last writer's identical copy win.
    pub fn fetch(&self, artifact: &str, blobs: &dyn BlobStore) -> Result<Vec<u8>, StorageError> {
        let local = self.local_path(artifact)?;
        if local.is_file() {
            tracing::debug!(artifact, "model cache hit");
            self.entries().insert(artifact.to_string(), local.clone());
            return std::fs::read(&local)
                .map_err(|e| StorageError::io(local.display().to_string(), e));
        }

        tracing::debug!(artifact, "model cache miss, downloading");
        let bytes = blobs.open(artifact)?;
        write_atomically(&local, &bytes)?;
        self.entries().insert(artifact.to_string(), local);
        Ok(bytes)
    }

    /// Places an already-local file into the cache under `artifact`.
    fn adopt(&self, artifact: &str, file: &Path) -> Result<(), StorageError> {
        let local = self.local_path(artifact)?;
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::io(parent.display().to_string(), e))?;
        }
        std::fs::rename(file, &local)
            .map_err(|e| StorageError::io(local.display().to_string(), e))?;
        self.entries().insert(artifact.to_string(), local);
        Ok(())
    }

    /// Artifact paths resolved during this process lifetime.
    pub fn cached_artifacts(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, PathBuf>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Versioned, cache-through store for classifiers of type `C`.
pub struct ModelStore<C> {
    blobs: Arc<dyn BlobStore>,
    ledger: Mutex<VersionLedger>,
    cache: LocalCache,
    config: ClassifierConfig,
    _classifier: PhantomData<fn() -> C>,
}

impl<C: Classifier> ModelStore<C> {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        ledger: VersionLedger,
        cache: LocalCache,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            blobs,
            ledger: Mutex::new(ledger),
            cache,
            config,
            _classifier: PhantomData,
        }
    }

    /// Filesystem-backed store laid out according to `storage`.
    pub fn open(storage: &StorageConfig, config: ClassifierConfig) -> Result<Self, StoreError> {
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&storage.blob_root));
        let ledger = VersionLedger::open(&storage.ledger_path)?;
        Ok(Self::new(
            blobs,
            ledger,
            LocalCache::new(&storage.cache_dir),
            config,
        ))
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    fn ledger(&self) -> MutexGuard<'_, VersionLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every version ever created, oldest first, including failures.
    pub fn history(&self) -> Vec<ModelVersion> {
        self.ledger().versions().to_vec()
    }

    /// Metadata of the version `get_latest` would load.
    pub fn latest_version(&self) -> Option<ModelVersion> {
        self.ledger().latest_usable().cloned()
    }

    /// Empty classifier built from this store's configuration.
    pub fn untrained(&self) -> C {
        C::untrained(&self.config)
    }

    /// Loads the newest committed classifier.
    ///
    /// With no committed version yet, returns a fresh untrained classifier
    /// and `None`.
    pub fn get_latest(&self) -> Result<(C, Option<ModelVersion>), StoreError> {
        match self.latest_version() {
            None => {
                tracing::debug!("no committed model yet, starting untrained");
                Ok((self.untrained(), None))
            }
            Some(version) => {
                let classifier = self.load_version(&version)?;
                Ok((classifier, Some(version)))
            }
        }
    }

    /// Loads the classifier committed as `version`.
    pub fn load_version(&self, version: &ModelVersion) -> Result<C, StoreError> {
        let artifact = version
            .artifact
            .as_deref()
            .filter(|_| version.is_usable())
            .ok_or(StoreError::NotUsable(version.id))?;
        let bytes = self.cache.fetch(artifact, self.blobs.as_ref())?;
        Ok(C::from_artifact(&bytes)?)
    }

    /// Serializes and uploads `classifier` as a new version.
    ///
    /// `sample_watermark` is the highest sample id the training corpus
    /// covered. A pending version is recorded first. If serialization or
    /// upload fails, that version is marked `Failed` with the error as its
    /// status and the error is returned; the previous latest version stays
    /// servable.
    pub fn commit(
        &self,
        classifier: &C,
        tag: &str,
        sample_watermark: Option<u64>,
    ) -> Result<ModelVersion, StoreError> {
        let pending = self.ledger().append_pending(tag, sample_watermark)?;
        tracing::info!(version = pending.id, tag, "committing model");

        match self.upload(classifier, &pending) {
            Ok(artifact) => {
                let status = format!(
                    "trained on {} examples",
                    classifier.example_count()
                );
                let version = self.ledger().finalize(
                    pending.id,
                    Some(artifact.clone()),
                    VersionState::Committed,
                    status,
                )?;
                tracing::info!(version = version.id, artifact = %artifact, "model committed");
                Ok(version)
            }
            Err(err) => {
                tracing::error!(version = pending.id, error = %err, "model commit failed");
                if let Err(mark_err) = self.ledger().finalize(
                    pending.id,
                    None,
                    VersionState::Failed,
                    format!("commit failed: {err}"),
                ) {
                    tracing::error!(version = pending.id, error = %mark_err, "could not record failed commit");
                }
                Err(err)
            }
        }
    }

    /// Records a version for a training attempt that never produced a model.
    pub fn record_failure(&self, tag: &str, message: &str) -> Result<ModelVersion, StoreError> {
        let mut ledger = self.ledger();
        let pending = ledger.append_pending(tag, None)?;
        let version = ledger.finalize(
            pending.id,
            None,
            VersionState::Failed,
            message.to_string(),
        )?;
        tracing::warn!(version = version.id, tag, message, "training failure recorded");
        Ok(version)
    }

    /// Writes the artifact to a transient local file, uploads it, and moves
    /// the file into the cache. Returns the uploaded blob path.
    fn upload(&self, classifier: &C, pending: &ModelVersion) -> Result<String, StoreError> {
        let bytes = classifier.to_artifact()?;
        let transient = self
            .cache
            .dir()
            .join(format!(".pending-{}-{}.json", pending.id, uuid::Uuid::new_v4()));
        write_atomically(&transient, &bytes)?;

        let result = std::fs::read(&transient)
            .map_err(|e| StorageError::io(transient.display().to_string(), e))
            .and_then(|staged| {
                let path = format!(
                    "{MODELS_DIR}/{}-{}-{}.json",
                    path_safe(&pending.tag),
                    pending.id,
                    uuid::Uuid::new_v4()
                );
                self.blobs.save(&path, &staged)
            });

        match result {
            Ok(artifact) => {
                if let Err(e) = self.cache.adopt(&artifact, &transient) {
                    tracing::warn!(artifact = %artifact, error = %e, "could not seed model cache");
                    let _ = std::fs::remove_file(&transient);
                }
                Ok(artifact)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&transient);
                Err(e.into())
            }
        }
    }
}

/// Keeps tags usable as a file name component.
fn path_safe(tag: &str) -> String {
    let safe: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if safe.is_empty() { "model".to_string() } else { safe }
}

//! # Blob Storage Module
//!
//! The durable object store is an external collaborator; the core only needs
//! four operations from it. Paths are `/`-separated relative strings such as
//! `audio_samples/A/take1.wav` or `models/auto-3-<uuid>.json`.
//!
//! Two implementations are provided:
//! - [`FsBlobStore`] - a directory on local disk
//! - [`MemoryBlobStore`] - an in-process map with switchable failure modes

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::StorageError;

/// Minimal durable object store.
///
/// A completed `save` must be durably readable; nothing else is assumed.
pub trait BlobStore: Send + Sync {
    fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Reads the complete object.
    fn open(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Stores `bytes` and returns the path actually used. Existing objects
    /// are never overwritten; a colliding name gets a numeric suffix.
    fn save(&self, path: &str, bytes: &[u8]) -> Result<String, StorageError>;

    fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// Rejects empty, absolute and parent-relative paths.
pub fn normalize_path(path: &str) -> Result<String, StorageError> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let bad = path.starts_with('/')
        || path.contains('\\')
        || parts.is_empty()
        || parts.iter().any(|p| *p == "..");
    if bad {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(parts.join("/"))
}

/// `dir/name.ext` -> `dir/name_{n}.ext`
fn suffixed(path: &str, n: usize) -> String {
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{file}_{n}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{file}"),
        None => file,
    }
}

fn available_name(
    path: &str,
    exists: impl Fn(&str) -> Result<bool, StorageError>,
) -> Result<String, StorageError> {
    if !exists(path)? {
        return Ok(path.to_string());
    }
    let mut n = 1;
    loop {
        let candidate = suffixed(path, n);
        if !exists(&candidate)? {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Blob store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf), StorageError> {
        let normalized = normalize_path(path)?;
        let full = self.root.join(&normalized);
        Ok((normalized, full))
    }
}

impl BlobStore for FsBlobStore {
    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let (_, full) = self.resolve(path)?;
        Ok(full.is_file())
    }

    fn open(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let (normalized, full) = self.resolve(path)?;
        std::fs::read(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(normalized),
            _ => StorageError::io(full.display().to_string(), e),
        })
    }

    fn save(&self, path: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let (normalized, _) = self.resolve(path)?;
        let name = available_name(&normalized, |p| self.exists(p))?;
        let full = self.root.join(&name);
        write_atomically(&full, bytes)?;
        tracing::debug!(path = %name, bytes = bytes.len(), "blob saved");
        Ok(name)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let (normalized, full) = self.resolve(path)?;
        std::fs::remove_file(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(normalized),
            _ => StorageError::io(full.display().to_string(), e),
        })
    }
}

/// Writes through a temporary sibling and renames it into place, so readers
/// never observe a partially written file.
pub(crate) fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let display = target.display().to_string();
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(&display, e))?;
    }
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = target.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
    std::fs::write(&tmp, bytes).map_err(|e| StorageError::io(&display, e))?;
    std::fs::rename(&tmp, target).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        StorageError::io(&display, e)
    })
}

/// In-memory blob store with injectable failures.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    unavailable: AtomicBool,
    reads: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `save` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `open` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

impl BlobStore for MemoryBlobStore {
    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        self.check_available()?;
        let path = normalize_path(path)?;
        Ok(self.objects().contains_key(&path))
    }

    fn open(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.check_available()?;
        let path = normalize_path(path)?;
        let bytes = self
            .objects()
            .get(&path)
            .cloned()
            .ok_or(StorageError::NotFound(path))?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(bytes)
    }

    fn save(&self, path: &str, bytes: &[u8]) -> Result<String, StorageError> {
        self.check_available()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        let path = normalize_path(path)?;
        let mut objects = self.objects();
        let name = available_name(&path, |p| Ok(objects.contains_key(p)))?;
        objects.insert(name.clone(), bytes.to_vec());
        Ok(name)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.check_available()?;
        let path = normalize_path(path)?;
        self.objects()
            .remove(&path)
            .map(|_| ())
            .ok_or(StorageError::NotFound(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn BlobStore) {
        assert!(!store.exists("a/b.wav").unwrap());
        assert_eq!(store.save("a/b.wav", b"one").unwrap(), "a/b.wav");
        assert_eq!(store.save("a/b.wav", b"two").unwrap(), "a/b_1.wav");
        assert_eq!(store.save("./a//b.wav", b"three").unwrap(), "a/b_2.wav");
        assert_eq!(store.open("a/b.wav").unwrap(), b"one");
        assert_eq!(store.open("a/b_1.wav").unwrap(), b"two");

        store.delete("a/b.wav").unwrap();
        assert!(!store.exists("a/b.wav").unwrap());
        assert!(matches!(store.open("a/b.wav"), Err(StorageError::NotFound(_))));
        assert!(matches!(store.delete("a/b.wav"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn fs_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        exercise(&store);
        assert!(dir.path().join("a").join("b_1.wav").is_file());
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryBlobStore::new());
    }

    #[test]
    fn rejects_escaping_paths() {
        let store = MemoryBlobStore::new();
        for bad in ["", "/abs", "../up", "a/../../b", "a\\b"] {
            assert!(
                matches!(store.save(bad, b"x"), Err(StorageError::InvalidPath(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn suffix_handles_names_without_extension() {
        assert_eq!(suffixed("models/model", 2), "models/model_2");
        assert_eq!(suffixed(".hidden", 1), ".hidden_1");
        assert_eq!(suffixed("x.tar.gz", 1), "x.tar_1.gz");
    }

    #[test]
    fn memory_store_failure_switches() {
        let store = MemoryBlobStore::new();
        store.set_fail_writes(true);
        assert!(matches!(store.save("x", b"1"), Err(StorageError::Unavailable(_))));
        store.set_fail_writes(false);
        store.save("x", b"1").unwrap();

        store.set_unavailable(true);
        assert!(store.open("x").is_err());
        store.set_unavailable(false);
        assert_eq!(store.open("x").unwrap(), b"1");
        assert_eq!(store.read_count(), 1);
    }
}

//! # Sample Repository Module
//!
//! Labeled training recordings. Audio bytes live in the blob store under
//! `audio_samples/<label>/<uuid>.wav`; labels and sample metadata live in a
//! small JSON manifest on the local filesystem.
//!
//! Samples are immutable once added. A sample can be removed, which deletes
//! its blob and its manifest entry; the next full-corpus retrain forgets it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::AudioBuffer;
use crate::blob::{BlobStore, write_atomically};
use crate::error::{SampleError, StorageError};
use crate::label::Label;

/// Blob directory holding sample audio.
pub const SAMPLES_DIR: &str = "audio_samples";

/// One labeled recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: u64,
    pub label: Label,
    pub created_at: DateTime<Utc>,
    /// Blob path of the recording.
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    labels: Vec<Label>,
    samples: Vec<Sample>,
    /// Highest id ever handed out; ids of removed samples are not reused.
    #[serde(default)]
    last_id: u64,
}

impl Manifest {
    fn next_id(&self) -> u64 {
        let highest = self.samples.iter().map(|s| s.id).max().unwrap_or(0);
        highest.max(self.last_id) + 1
    }
}

pub struct SampleRepository {
    blobs: Arc<dyn BlobStore>,
    manifest_path: Option<PathBuf>,
    manifest: Mutex<Manifest>,
}

impl SampleRepository {
    /// Repository whose manifest lives only in memory.
    pub fn in_memory(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            manifest_path: None,
            manifest: Mutex::new(Manifest::default()),
        }
    }

    /// Opens the manifest at `manifest_path`, starting empty if it is missing.
    pub fn open(
        blobs: Arc<dyn BlobStore>,
        manifest_path: impl Into<PathBuf>,
    ) -> Result<Self, SampleError> {
        let manifest_path = manifest_path.into();
        let manifest = match std::fs::read(&manifest_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(SampleError::Manifest)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::default(),
            Err(e) => {
                return Err(StorageError::io(manifest_path.display().to_string(), e).into());
            }
        };
        Ok(Self {
            blobs,
            manifest_path: Some(manifest_path),
            manifest: Mutex::new(manifest),
        })
    }

    fn manifest(&self) -> MutexGuard<'_, Manifest> {
        self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, manifest: &Manifest) -> Result<(), SampleError> {
        if let Some(path) = &self.manifest_path {
            let bytes = serde_json::to_vec_pretty(manifest).map_err(SampleError::Manifest)?;
            write_atomically(path, &bytes)?;
        }
        Ok(())
    }

    /// Registers a new label.
    ///
    /// # Errors
    /// * `SampleError::EmptyLabel` - Blank name
    /// * `SampleError::DuplicateLabel` - The label already exists
    pub fn create_label(&self, name: &str) -> Result<Label, SampleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SampleError::EmptyLabel);
        }
        let label = Label::new(name);

        let mut manifest = self.manifest();
        if manifest.labels.contains(&label) {
            return Err(SampleError::DuplicateLabel(name.to_string()));
        }
        let mut next = manifest.clone();
        next.labels.push(label.clone());
        self.persist(&next)?;
        *manifest = next;

        tracing::info!(label = %label, "label created");
        Ok(label)
    }

    /// Every registered label in creation order.
    pub fn labels(&self) -> Vec<Label> {
        self.manifest().labels.clone()
    }

    /// Uploads a recording for an existing label.
    ///
    /// The bytes are stored as given. Undecodable audio is accepted here and
    /// skipped later by the trainer.
    pub fn add_sample(&self, label: &Label, wav_bytes: &[u8]) -> Result<Sample, SampleError> {
        if !self.manifest().labels.contains(label) {
            return Err(SampleError::UnknownLabel(label.to_string()));
        }

        let requested = format!(
            "{SAMPLES_DIR}/{}/{}.wav",
            label_dir(label),
            uuid::Uuid::new_v4()
        );
        let path = self.blobs.save(&requested, wav_bytes)?;

        let mut manifest = self.manifest();
        let sample = Sample {
            id: manifest.next_id(),
            label: label.clone(),
            created_at: Utc::now(),
            path,
        };
        let mut next = manifest.clone();
        next.last_id = sample.id;
        next.samples.push(sample.clone());
        if let Err(e) = self.persist(&next) {
            drop(manifest);
            if let Err(cleanup) = self.blobs.delete(&sample.path) {
                tracing::warn!(path = %sample.path, error = %cleanup, "orphaned sample blob");
            }
            return Err(e);
        }
        *manifest = next;

        tracing::info!(id = sample.id, label = %label, path = %sample.path, "sample added");
        Ok(sample)
    }

    /// Every sample, oldest first.
    pub fn samples(&self) -> Vec<Sample> {
        self.manifest().samples.clone()
    }

    pub fn samples_for(&self, label: &Label) -> Vec<Sample> {
        self.manifest()
            .samples
            .iter()
            .filter(|s| &s.label == label)
            .cloned()
            .collect()
    }

    /// Deletes a sample's manifest entry and its audio.
    pub fn remove_sample(&self, id: u64) -> Result<Sample, SampleError> {
        let mut manifest = self.manifest();
        let position = manifest
            .samples
            .iter()
            .position(|s| s.id == id)
            .ok_or(SampleError::UnknownSample(id))?;
        let mut next = manifest.clone();
        let sample = next.samples.remove(position);
        self.persist(&next)?;
        *manifest = next;
        drop(manifest);

        match self.blobs.delete(&sample.path) {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => tracing::warn!(path = %sample.path, error = %e, "could not delete sample audio"),
        }
        tracing::info!(id, label = %sample.label, "sample removed");
        Ok(sample)
    }

    pub fn load_bytes(&self, sample: &Sample) -> Result<Vec<u8>, SampleError> {
        Ok(self.blobs.open(&sample.path)?)
    }

    /// Reads and decodes a sample's recording.
    pub fn load_audio(&self, sample: &Sample) -> Result<AudioBuffer, SampleError> {
        let bytes = self.load_bytes(sample)?;
        Ok(AudioBuffer::from_wav_bytes(&bytes)?)
    }
}

/// Labels become one path segment.
fn label_dir(label: &Label) -> String {
    label
        .as_str()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect::<String>()
        .replace("..", "__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{FsBlobStore, MemoryBlobStore};

    fn sine_wav(freq: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 4096,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..4096 {
                let t = i as f32 / 4096.0;
                let s = (2.0 * std::f32::consts::PI * freq * t).sin();
                writer.write_sample((s * 16000.0) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn repo() -> (Arc<MemoryBlobStore>, SampleRepository) {
        let blobs = Arc::new(MemoryBlobStore::new());
        (blobs.clone(), SampleRepository::in_memory(blobs))
    }

    #[test]
    fn labels_are_unique() {
        let (_, repo) = repo();
        repo.create_label("A").unwrap();
        assert!(matches!(
            repo.create_label(" A "),
            Err(SampleError::DuplicateLabel(name)) if name == "A"
        ));
        assert!(matches!(repo.create_label("  "), Err(SampleError::EmptyLabel)));
        assert_eq!(repo.labels(), vec![Label::from("A")]);
    }

    #[test]
    fn samples_need_a_known_label() {
        let (_, repo) = repo();
        assert!(matches!(
            repo.add_sample(&Label::from("ghost"), b"RIFF"),
            Err(SampleError::UnknownLabel(_))
        ));
    }

    #[test]
    fn add_and_load_sample() {
        let (blobs, repo) = repo();
        let a = repo.create_label("A").unwrap();
        let sample = repo.add_sample(&a, &sine_wav(110.0)).unwrap();

        assert_eq!(sample.id, 1);
        assert!(sample.path.starts_with("audio_samples/A/"));
        assert!(blobs.exists(&sample.path).unwrap());

        let audio = repo.load_audio(&sample).unwrap();
        assert_eq!(audio.sample_rate(), 4096);
        assert_eq!(audio.len(), 4096);
    }

    #[test]
    fn undecodable_audio_is_stored_but_fails_to_load() {
        let (_, repo) = repo();
        let a = repo.create_label("A").unwrap();
        let sample = repo.add_sample(&a, b"definitely not a wav").unwrap();
        assert!(matches!(repo.load_audio(&sample), Err(SampleError::Audio(_))));
    }

    #[test]
    fn remove_sample_deletes_blob() {
        let (blobs, repo) = repo();
        let a = repo.create_label("A").unwrap();
        let first = repo.add_sample(&a, &sine_wav(110.0)).unwrap();
        let second = repo.add_sample(&a, &sine_wav(220.0)).unwrap();

        repo.remove_sample(first.id).unwrap();
        assert!(!blobs.exists(&first.path).unwrap());
        assert_eq!(repo.samples(), vec![second]);
        assert!(matches!(
            repo.remove_sample(first.id),
            Err(SampleError::UnknownSample(1))
        ));
    }

    #[test]
    fn removed_ids_are_never_reused() {
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let manifest = dir.path().join("samples.json");
        let a = Label::from("A");
        {
            let repo = SampleRepository::open(blobs.clone(), &manifest).unwrap();
            repo.create_label("A").unwrap();
            repo.add_sample(&a, b"1").unwrap();
            let newest = repo.add_sample(&a, b"2").unwrap();
            repo.remove_sample(newest.id).unwrap();
        }
        let repo = SampleRepository::open(blobs, &manifest).unwrap();
        assert_eq!(repo.add_sample(&a, b"3").unwrap().id, 3);
    }

    #[test]
    fn filters_by_label() {
        let (_, repo) = repo();
        let a = repo.create_label("A").unwrap();
        let b = repo.create_label("B").unwrap();
        repo.add_sample(&a, b"1").unwrap();
        repo.add_sample(&b, b"2").unwrap();
        repo.add_sample(&a, b"3").unwrap();

        let ids: Vec<u64> = repo.samples_for(&a).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(repo.samples_for(&Label::from("C")), Vec::new());
    }

    #[test]
    fn manifest_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path().join("media")));
        let manifest = dir.path().join("samples.json");
        {
            let repo = SampleRepository::open(blobs.clone(), &manifest).unwrap();
            let e = repo.create_label("EL").unwrap();
            repo.add_sample(&e, &sine_wav(82.0)).unwrap();
        }
        let repo = SampleRepository::open(blobs, &manifest).unwrap();
        assert_eq!(repo.labels(), vec![Label::from("EL")]);
        let samples = repo.samples();
        assert_eq!(samples.len(), 1);
        repo.load_audio(&samples[0]).unwrap();
    }

    #[test]
    fn label_names_cannot_escape_their_directory() {
        assert_eq!(label_dir(&Label::from("../x")), "___x");
        assert_eq!(label_dir(&Label::from("C#4")), "C#4");
    }
}

// recognizer-core/src/lib.rs

//! The core logic for the note and sample recognizer.
//! This crate is responsible for feature extraction, pitch detection,
//! nearest-neighbor classification, and versioned model storage with
//! incremental retraining. It is completely headless and performs no
//! network I/O; durable storage is reached through the [`blob::BlobStore`]
//! trait.

pub mod audio;
pub mod balltree;
pub mod blob;
pub mod classifier;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod fft;
pub mod label;
pub mod pitch;
pub mod recognizer;
pub mod samples;
pub mod store;
pub mod trainer;
pub mod tuning;

pub use audio::AudioBuffer;
pub use classifier::{Classifier, KnnClassifier};
pub use config::RecognizerConfig;
pub use features::{FeatureExtractor, FeatureVector};
pub use label::Label;
pub use pitch::{PitchAnalysis, PitchEstimator};
pub use recognizer::Recognizer;
pub use samples::{Sample, SampleRepository};
pub use store::{ModelStore, ModelVersion, VersionState};
pub use trainer::{CycleOutcome, CycleReport, IncrementalTrainer, RetrainMode, TrainingWorker};

use std::sync::Arc;

/// Every long-lived component, wired from one configuration.
pub struct Workspace {
    pub config: RecognizerConfig,
    pub store: Arc<ModelStore<KnnClassifier>>,
    pub samples: Arc<SampleRepository>,
    pub trainer: Arc<IncrementalTrainer<KnnClassifier>>,
    pub recognizer: Recognizer<KnnClassifier>,
    pub pitch: PitchEstimator,
}

impl Workspace {
    /// Opens the filesystem-backed stores named in `config.storage`.
    pub fn open(config: RecognizerConfig) -> Result<Self, error::WorkspaceError> {
        config.validate()?;
        let store: Arc<ModelStore<KnnClassifier>> =
            Arc::new(ModelStore::open(&config.storage, config.classifier.clone())?);
        let samples = Arc::new(SampleRepository::open(
            store.blobs().clone(),
            &config.storage.manifest_path,
        )?);
        let trainer = Arc::new(
            IncrementalTrainer::new(
                store.clone(),
                samples.clone(),
                FeatureExtractor::new(config.features.clone()),
            )
            .with_mode(config.training.mode)
            .with_tag(config.training.tag.clone()),
        );
        let recognizer =
            Recognizer::new(store.clone(), FeatureExtractor::new(config.features.clone()));
        let pitch = PitchEstimator::new(config.pitch.clone())?;

        Ok(Self {
            config,
            store,
            samples,
            trainer,
            recognizer,
            pitch,
        })
    }
}

//! # Error Types
//!
//! One error enum per pipeline stage. Failures are contained to the stage
//! that produced them: extraction errors exclude a single sample, training
//! errors become failed model versions, storage errors abort a commit while
//! leaving the previous model servable.

use thiserror::Error;

/// Raised when an audio buffer cannot be turned into a feature vector.
///
/// The trainer skips the offending sample instead of aborting the batch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("audio buffer is empty")]
    Empty,

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("audio contains non-finite sample at index {0}")]
    NonFinite(usize),

    #[error("could not decode audio: {0}")]
    Decode(String),

    #[error("resampling failed: {0}")]
    Resample(String),
}

/// The recording is too short for the pitch path to analyze.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("need at least {required_secs:.2}s of audio, got {actual_secs:.2}s")]
pub struct InsufficientAudioError {
    pub required_secs: f32,
    pub actual_secs: f32,
}

/// Errors raised by the training-free pitch path.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PitchError {
    #[error(transparent)]
    InsufficientAudio(#[from] InsufficientAudioError),

    #[error("transform length {0} is not a power of two")]
    NotPowerOfTwo(usize),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// A fit call was rejected. The classifier is left exactly as it was.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainingError {
    #[error("no training examples supplied")]
    NoExamples,

    #[error("{vectors} feature vectors but {labels} labels")]
    LengthMismatch { vectors: usize, labels: usize },

    #[error("feature vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("label '{label}' has {count} examples, at least {required} required")]
    InsufficientExamples {
        label: String,
        count: usize,
        required: usize,
    },
}

/// Prediction-path failures surface to the caller as-is.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictionError {
    #[error("classifier has not been fitted")]
    NotFitted,

    #[error("feature vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Serialized model artifacts that cannot be produced or trusted.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("artifact is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("artifact format '{found}' is not supported (expected '{expected}')")]
    FormatMismatch { expected: String, found: String },

    #[error("artifact was produced by '{found}', cannot load as '{expected}'")]
    AlgorithmMismatch { expected: String, found: String },
}

/// Blob store or local filesystem failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob path: {0}")]
    InvalidPath(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the versioned model store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("model ledger is corrupt: {0}")]
    Ledger(#[source] serde_json::Error),

    #[error("model version {0} does not exist")]
    UnknownVersion(u64),

    #[error("model version {0} was already finalized")]
    AlreadyFinalized(u64),

    #[error("model version {0} has no committed artifact")]
    NotUsable(u64),
}

/// Errors from the labeled sample collection.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("label '{0}' already exists")]
    DuplicateLabel(String),

    #[error("label '{0}' does not exist")]
    UnknownLabel(String),

    #[error("label must not be empty")]
    EmptyLabel,

    #[error("sample {0} does not exist")]
    UnknownSample(u64),

    #[error("sample manifest is corrupt: {0}")]
    Manifest(#[source] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Audio(#[from] ExtractionError),
}

/// Errors surfaced by the serving path.
#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error("no trained model is available yet")]
    NoModel,

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Prediction(#[from] PredictionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration file could not be read or failed validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Hold-out evaluation could not be carried out.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("test fraction must be in (0, 1), got {0}")]
    InvalidFraction(f64),

    #[error("{vectors} feature vectors but {labels} labels")]
    LengthMismatch { vectors: usize, labels: usize },

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

/// A component could not be opened from configuration.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Samples(#[from] SampleError),

    #[error(transparent)]
    Pitch(#[from] PitchError),
}

//! # Classifier Module
//!
//! The [`Classifier`] capability interface the store and trainer are written
//! against, and its canonical implementation: a distance-weighted
//! k-nearest-neighbor classifier over a ball tree.
//!
//! ## Incremental fit
//! `fit` never discards what was learned before. Each call appends its
//! examples to the stored set (exact duplicates are skipped) and rebuilds the
//! index. Use [`Classifier::reset`] to start over from nothing.
//!
//! ## Artifacts
//! Trained classifiers serialize to a JSON envelope tagged with an artifact
//! format and algorithm name. Loading an artifact written by a different
//! format or algorithm fails instead of silently mispredicting.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::balltree::BallTree;
use crate::config::ClassifierConfig;
use crate::error::{ArtifactError, PredictionError, TrainingError};
use crate::features::FeatureVector;
use crate::label::Label;

/// Version tag written into every artifact envelope.
pub const ARTIFACT_FORMAT: &str = "recognizer-artifact/1";

/// Anything that can learn labels from feature vectors and be persisted.
pub trait Classifier: Sized + Send + Sync {
    /// Name recorded in artifacts; loading checks it matches.
    const ALGORITHM: &'static str;

    /// A classifier that has seen no examples.
    fn untrained(config: &ClassifierConfig) -> Self;

    /// Adds `(vector, label)` pairs to what has been learned so far.
    ///
    /// On error the classifier is left unchanged.
    fn fit(&mut self, vectors: &[FeatureVector], labels: &[Label]) -> Result<(), TrainingError>;

    fn predict(&self, vector: &FeatureVector) -> Result<Label, PredictionError>;

    /// Forgets every learned example, keeping hyperparameters.
    fn reset(&mut self);

    fn example_count(&self) -> usize;

    fn is_fitted(&self) -> bool {
        self.example_count() > 0
    }

    /// Fraction of `vectors` predicted as their paired label.
    fn score(&self, vectors: &[FeatureVector], labels: &[Label]) -> Result<f64, PredictionError> {
        let total = vectors.len().min(labels.len());
        if total == 0 {
            return Ok(0.0);
        }
        let mut correct = 0;
        for (v, expected) in vectors.iter().zip(labels) {
            if self.predict(v)? == *expected {
                correct += 1;
            }
        }
        Ok(correct as f64 / total as f64)
    }

    fn to_artifact(&self) -> Result<Vec<u8>, ArtifactError>;

    fn from_artifact(bytes: &[u8]) -> Result<Self, ArtifactError>;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format: &'a str,
    algorithm: &'a str,
    model: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    format: String,
    algorithm: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    model: T,
}

/// Wraps `model` in a tagged artifact envelope.
pub fn encode_artifact<T: Serialize>(algorithm: &str, model: &T) -> Result<Vec<u8>, ArtifactError> {
    serde_json::to_vec(&EnvelopeRef {
        format: ARTIFACT_FORMAT,
        algorithm,
        model,
    })
    .map_err(ArtifactError::Serialize)
}

/// Unwraps an artifact envelope after checking its format and algorithm tags.
pub fn decode_artifact<T: DeserializeOwned>(
    algorithm: &str,
    bytes: &[u8],
) -> Result<T, ArtifactError> {
    let header: EnvelopeHeader = serde_json::from_slice(bytes).map_err(ArtifactError::Corrupt)?;
    if header.format != ARTIFACT_FORMAT {
        return Err(ArtifactError::FormatMismatch {
            expected: ARTIFACT_FORMAT.to_string(),
            found: header.format,
        });
    }
    if header.algorithm != algorithm {
        return Err(ArtifactError::AlgorithmMismatch {
            expected: algorithm.to_string(),
            found: header.algorithm,
        });
    }
    let envelope: Envelope<T> = serde_json::from_slice(bytes).map_err(ArtifactError::Corrupt)?;
    Ok(envelope.model)
}

/// Distance-weighted k-nearest-neighbor classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnClassifier {
    neighbors: usize,
    leaf_size: usize,
    min_examples_per_class: usize,
    vectors: Vec<FeatureVector>,
    labels: Vec<Label>,
    #[serde(skip)]
    index: BallTree,
}

impl KnnClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            neighbors: config.neighbors.max(1),
            leaf_size: config.leaf_size.max(1),
            min_examples_per_class: config.required_per_class(),
            vectors: Vec::new(),
            labels: Vec::new(),
            index: BallTree::default(),
        }
    }

    pub fn neighbors(&self) -> usize {
        self.neighbors
    }

    /// Dimension of the learned vectors, once any have been seen.
    pub fn dimension(&self) -> Option<usize> {
        self.vectors.first().map(FeatureVector::len)
    }

    /// Every distinct label learned so far, sorted.
    pub fn classes(&self) -> Vec<Label> {
        let mut classes: Vec<Label> = self.labels.to_vec();
        classes.sort();
        classes.dedup();
        classes
    }

    /// Number of learned examples per label.
    pub fn class_counts(&self) -> BTreeMap<Label, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(label.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn rebuild_index(&mut self) {
        self.index = BallTree::build(&self.vectors, self.leaf_size);
    }
}

impl Default for KnnClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

fn example_key(vector: &FeatureVector, label: &Label) -> (Vec<u32>, String) {
    (
        vector.as_slice().iter().map(|x| x.to_bits()).collect(),
        label.as_str().to_string(),
    )
}

impl Classifier for KnnClassifier {
    const ALGORITHM: &'static str = "knn-distance-balltree";

    fn untrained(config: &ClassifierConfig) -> Self {
        Self::new(config)
    }

    fn fit(&mut self, vectors: &[FeatureVector], labels: &[Label]) -> Result<(), TrainingError> {
        if vectors.is_empty() {
            return Err(TrainingError::NoExamples);
        }
        if vectors.len() != labels.len() {
            return Err(TrainingError::LengthMismatch {
                vectors: vectors.len(),
                labels: labels.len(),
            });
        }
        let expected = self.dimension().unwrap_or(vectors[0].len());
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected || v.is_empty()) {
            return Err(TrainingError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let mut seen: HashSet<_> = self
            .vectors
            .iter()
            .zip(&self.labels)
            .map(|(v, l)| example_key(v, l))
            .collect();
        let fresh: Vec<usize> = (0..vectors.len())
            .filter(|&i| seen.insert(example_key(&vectors[i], &labels[i])))
            .collect();

        let mut counts = self.class_counts();
        for &i in &fresh {
            *counts.entry(labels[i].clone()).or_insert(0) += 1;
        }
        if let Some((label, &count)) = counts
            .iter()
            .find(|&(_, &count)| count < self.min_examples_per_class)
        {
            return Err(TrainingError::InsufficientExamples {
                label: label.to_string(),
                count,
                required: self.min_examples_per_class,
            });
        }

        for i in fresh {
            self.vectors.push(vectors[i].clone());
            self.labels.push(labels[i].clone());
        }
        self.rebuild_index();
        Ok(())
    }

    fn predict(&self, vector: &FeatureVector) -> Result<Label, PredictionError> {
        let Some(expected) = self.dimension().filter(|_| !self.index.is_empty()) else {
            return Err(PredictionError::NotFitted);
        };
        if vector.len() != expected {
            return Err(PredictionError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let nearest = self
            .index
            .query(&self.vectors, vector.as_slice(), self.neighbors);

        // Exact matches take all the weight; otherwise weight by 1/distance.
        let exact = nearest.iter().any(|n| n.distance == 0.0);
        let mut votes: BTreeMap<&Label, f64> = BTreeMap::new();
        for n in &nearest {
            let weight = match (exact, n.distance == 0.0) {
                (true, true) => 1.0,
                (true, false) => 0.0,
                (false, _) => 1.0 / n.distance,
            };
            *votes.entry(&self.labels[n.index]).or_insert(0.0) += weight;
        }

        let mut best: Option<(&Label, f64)> = None;
        for (label, weight) in votes {
            if best.is_none_or(|(_, w)| weight > w) {
                best = Some((label, weight));
            }
        }
        best.map(|(label, _)| label.clone())
            .ok_or(PredictionError::NotFitted)
    }

    fn reset(&mut self) {
        self.vectors.clear();
        self.labels.clear();
        self.rebuild_index();
    }

    fn example_count(&self) -> usize {
        self.vectors.len()
    }

    fn to_artifact(&self) -> Result<Vec<u8>, ArtifactError> {
        encode_artifact(Self::ALGORITHM, self)
    }

    fn from_artifact(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let mut model: Self = decode_artifact(Self::ALGORITHM, bytes)?;
        if model.vectors.len() != model.labels.len() {
            return Err(ArtifactError::Corrupt(serde_json::Error::custom(format!(
                "{} vectors but {} labels",
                model.vectors.len(),
                model.labels.len()
            ))));
        }
        model.rebuild_index();
        Ok(model)
    }
}

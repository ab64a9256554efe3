//! # Evaluation Module
//!
//! Hold-out evaluation of a classifier on labeled feature vectors:
//! stratified shuffle split, accuracy on both halves, a confusion matrix and
//! a per-class precision / recall / F1 table.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::fmt;

use crate::classifier::Classifier;
use crate::config::ClassifierConfig;
use crate::error::EvaluationError;
use crate::features::FeatureVector;
use crate::label::Label;

/// Index sets produced by [`stratified_split`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffles each class separately and holds out `test_fraction` of it.
///
/// Every class with at least two examples keeps at least one example on
/// each side. Single-example classes stay in the training set. The same
/// `seed` always yields the same split.
pub fn stratified_split(
    labels: &[Label],
    test_fraction: f64,
    seed: u64,
) -> Result<Split, EvaluationError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(EvaluationError::InvalidFraction(test_fraction));
    }

    let mut by_class: BTreeMap<&Label, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = Split {
        train: Vec::new(),
        test: Vec::new(),
    };
    for indices in by_class.values_mut() {
        indices.shuffle(&mut rng);
        let count = indices.len();
        let n_test = if count < 2 {
            0
        } else {
            ((count as f64 * test_fraction).round() as usize).clamp(1, count - 1)
        };
        split.test.extend_from_slice(&indices[..n_test]);
        split.train.extend_from_slice(&indices[n_test..]);
    }
    split.train.sort_unstable();
    split.test.sort_unstable();
    Ok(split)
}

/// Precision, recall and F1 for one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub label: Label,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of true examples of this class.
    pub support: usize,
}

/// Predictions compared against ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    /// Row and column order of `confusion`.
    pub labels: Vec<Label>,
    /// `confusion[actual][predicted]`
    pub confusion: Vec<Vec<usize>>,
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
}

impl ClassificationReport {
    pub fn from_predictions(actual: &[Label], predicted: &[Label]) -> Self {
        let mut labels: Vec<Label> = actual.iter().chain(predicted).cloned().collect();
        labels.sort();
        labels.dedup();
        let position: BTreeMap<&Label, usize> =
            labels.iter().enumerate().map(|(i, l)| (l, i)).collect();

        let n = labels.len();
        let mut confusion = vec![vec![0usize; n]; n];
        for (a, p) in actual.iter().zip(predicted) {
            confusion[position[a]][position[p]] += 1;
        }

        let total = actual.len().min(predicted.len());
        let correct: usize = (0..n).map(|i| confusion[i][i]).sum();
        let accuracy = ratio(correct, total);

        let classes = labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let tp = confusion[i][i];
                let support: usize = confusion[i].iter().sum();
                let predicted: usize = confusion.iter().map(|row| row[i]).sum();
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: label.clone(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        Self {
            labels,
            confusion,
            classes,
            accuracy,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .labels
            .iter()
            .map(|l| l.as_str().len())
            .max()
            .unwrap_or(0)
            .max(8);
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.label.as_str(),
                c.precision,
                c.recall,
                c.f1,
                c.support
            )?;
        }
        let support: usize = self.classes.iter().map(|c| c.support).sum();
        write!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, support
        )
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Result of training on one side of a split and testing on the other.
#[derive(Debug, Clone)]
pub struct HoldoutReport {
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub train_size: usize,
    pub test_size: usize,
    pub test: ClassificationReport,
}

/// Trains a fresh classifier on a stratified split and scores it.
pub fn holdout<C: Classifier>(
    config: &ClassifierConfig,
    vectors: &[FeatureVector],
    labels: &[Label],
    test_fraction: f64,
    seed: u64,
) -> Result<HoldoutReport, EvaluationError> {
    if vectors.len() != labels.len() {
        return Err(EvaluationError::LengthMismatch {
            vectors: vectors.len(),
            labels: labels.len(),
        });
    }
    let split = stratified_split(labels, test_fraction, seed)?;
    let pick = |idx: &[usize]| -> (Vec<FeatureVector>, Vec<Label>) {
        idx.iter()
            .map(|&i| (vectors[i].clone(), labels[i].clone()))
            .unzip()
    };
    let (train_x, train_y) = pick(&split.train);
    let (test_x, test_y) = pick(&split.test);

    let mut classifier = C::untrained(config);
    classifier.fit(&train_x, &train_y)?;

    let predicted = test_x
        .iter()
        .map(|v| classifier.predict(v))
        .collect::<Result<Vec<_>, _>>()?;
    let test = ClassificationReport::from_predictions(&test_y, &predicted);

    let report = HoldoutReport {
        train_accuracy: classifier.score(&train_x, &train_y)?,
        test_accuracy: test.accuracy,
        train_size: train_x.len(),
        test_size: test_x.len(),
        test,
    };
    tracing::info!(
        train = report.train_size,
        test = report.test_size,
        train_accuracy = report.train_accuracy,
        test_accuracy = report.test_accuracy,
        "holdout evaluation"
    );
    Ok(report)
}

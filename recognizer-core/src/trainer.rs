//! # Incremental Trainer Module
//!
//! Drives training cycles: snapshot the labeled corpus, pick the starting
//! classifier, extract features, fit, and commit a new version.
//!
//! Full-corpus cycles start from an empty classifier built from the store's
//! configuration. Incremental cycles load the latest committed model and fit
//! the samples above its `sample_watermark`.
//!
//! ## States
//! ```text
//! Idle -> Training -> Committed -> Idle
//!                  \-> Failed   -> Idle
//! ```
//! A failed cycle (no usable examples, too few examples for some label,
//! unloadable base model, upload failure) is recorded in the version history
//! and never replaces the current model.
//!
//! ## Serialization
//! Cycles are mutually exclusive. [`IncrementalTrainer::run_cycle`] holds one
//! training lock from reading the latest version until the commit finishes;
//! [`TrainingWorker`] additionally funnels triggers through a single thread.

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::audio::AudioBuffer;
use crate::classifier::Classifier;
use crate::error::StoreError;
use crate::features::{FeatureExtractor, FeatureVector};
use crate::label::Label;
use crate::samples::{Sample, SampleRepository};
use crate::store::{ModelStore, ModelVersion, VersionState};

/// What a cycle fits the classifier on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainMode {
    /// Start from an empty classifier and fit every sample.
    #[default]
    FullCorpus,
    /// Keep what the latest version learned and fit only newer samples.
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Training,
    Committed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Committed,
    /// Incremental cycle with no samples newer than the base version.
    UpToDate,
    Failed(String),
}

/// A sample left out of a cycle and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSample {
    pub id: u64,
    pub label: Label,
    pub reason: String,
}

/// Everything a finished cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub trigger: String,
    pub outcome: CycleOutcome,
    /// Version created by this cycle (committed or failed), if any.
    pub version: Option<ModelVersion>,
    /// Latest committed version when the cycle started.
    pub base_version: Option<u64>,
    /// Examples passed to `fit`.
    pub trained: usize,
    pub skipped: Vec<SkippedSample>,
}

impl CycleReport {
    pub fn is_committed(&self) -> bool {
        self.outcome == CycleOutcome::Committed
    }
}

pub struct IncrementalTrainer<C> {
    store: Arc<ModelStore<C>>,
    samples: Arc<SampleRepository>,
    extractor: FeatureExtractor,
    mode: RetrainMode,
    tag: String,
    training: Mutex<()>,
    state: Mutex<TrainerState>,
    last_outcome: Mutex<Option<CycleOutcome>>,
}

impl<C: Classifier> IncrementalTrainer<C> {
    pub fn new(
        store: Arc<ModelStore<C>>,
        samples: Arc<SampleRepository>,
        extractor: FeatureExtractor,
    ) -> Self {
        Self {
            store,
            samples,
            extractor,
            mode: RetrainMode::default(),
            tag: "auto".to_string(),
            training: Mutex::new(()),
            state: Mutex::new(TrainerState::Idle),
            last_outcome: Mutex::new(None),
        }
    }

    pub fn with_mode(mut self, mode: RetrainMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn mode(&self) -> RetrainMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<ModelStore<C>> {
        &self.store
    }

    pub fn state(&self) -> TrainerState {
        *lock(&self.state)
    }

    /// Outcome of the most recent finished cycle.
    pub fn last_outcome(&self) -> Option<CycleOutcome> {
        lock(&self.last_outcome).clone()
    }

    fn transition(&self, next: TrainerState) {
        let mut state = lock(&self.state);
        tracing::debug!(from = ?*state, to = ?next, "trainer state");
        *state = next;
    }

    /// Runs one full training cycle.
    ///
    /// Training failures are reported through [`CycleReport::outcome`];
    /// `Err` means even the failure could not be recorded.
    pub fn run_cycle(&self, trigger: &str) -> Result<CycleReport, StoreError> {
        let _guard = lock(&self.training);
        self.transition(TrainerState::Training);
        tracing::info!(trigger, mode = ?self.mode, tag = %self.tag, "training cycle started");

        let result = self.train(trigger);
        let terminal = match &result {
            Ok(report) if !matches!(report.outcome, CycleOutcome::Failed(_)) => {
                TrainerState::Committed
            }
            _ => TrainerState::Failed,
        };
        self.transition(terminal);

        match &result {
            Ok(report) => {
                tracing::info!(
                    trigger,
                    outcome = ?report.outcome,
                    version = report.version.as_ref().map(|v| v.id),
                    base_version = report.base_version,
                    trained = report.trained,
                    skipped = report.skipped.len(),
                    "training cycle finished"
                );
                *lock(&self.last_outcome) = Some(report.outcome.clone());
            }
            Err(e) => {
                tracing::error!(trigger, error = %e, "training cycle could not be recorded");
                *lock(&self.last_outcome) = Some(CycleOutcome::Failed(e.to_string()));
            }
        }

        self.transition(TrainerState::Idle);
        result
    }

    fn train(&self, trigger: &str) -> Result<CycleReport, StoreError> {
        let mut report = CycleReport {
            trigger: trigger.to_string(),
            outcome: CycleOutcome::UpToDate,
            version: None,
            base_version: None,
            trained: 0,
            skipped: Vec::new(),
        };

        let snapshot = self.samples.samples();
        let (mut classifier, base) = match self.mode {
            RetrainMode::FullCorpus => (self.store.untrained(), self.store.latest_version()),
            RetrainMode::Incremental => match self.store.get_latest() {
                Ok(latest) => latest,
                Err(e) => return self.fail(report, format!("could not load base model: {e}")),
            },
        };
        report.base_version = base.as_ref().map(|v| v.id);
        let watermark = snapshot
            .iter()
            .map(|s| s.id)
            .max()
            .max(base.as_ref().and_then(|v| v.sample_watermark));

        let pending = match (self.mode, &base) {
            (RetrainMode::Incremental, Some(base)) => unseen(snapshot, base),
            _ => snapshot,
        };
        if self.mode == RetrainMode::Incremental && base.is_some() && pending.is_empty() {
            tracing::info!(base_version = report.base_version, "no new samples since base version");
            return Ok(report);
        }

        let batch = featurize(&self.samples, &self.extractor, &pending);
        report.skipped = batch.skipped;
        report.trained = batch.vectors.len();
        if let Err(e) = classifier.fit(&batch.vectors, &batch.labels) {
            return self.fail(report, format!("training failed: {e}"));
        }

        match self.store.commit(&classifier, &self.tag, watermark) {
            Ok(version) => {
                report.outcome = CycleOutcome::Committed;
                report.version = Some(version);
                Ok(report)
            }
            Err(e) => {
                report.outcome = CycleOutcome::Failed(format!("commit failed: {e}"));
                // The store finalized the pending version as failed.
                report.version = self
                    .store
                    .history()
                    .into_iter()
                    .rev()
                    .find(|v| v.state == VersionState::Failed);
                Ok(report)
            }
        }
    }

    fn fail(&self, mut report: CycleReport, message: String) -> Result<CycleReport, StoreError> {
        tracing::warn!(trigger = %report.trigger, message = %message, "training cycle failed");
        report.version = Some(self.store.record_failure(&self.tag, &message)?);
        report.outcome = CycleOutcome::Failed(message);
        Ok(report)
    }
}

/// Snapshot samples `base` was not trained on.
fn unseen(snapshot: Vec<Sample>, base: &ModelVersion) -> Vec<Sample> {
    match base.sample_watermark {
        Some(watermark) => snapshot.into_iter().filter(|s| s.id > watermark).collect(),
        None => snapshot
            .into_iter()
            .filter(|s| s.created_at > base.created_at)
            .collect(),
    }
}

/// Feature vectors for a batch of samples, plus the samples left out.
#[derive(Debug, Clone, Default)]
pub struct Featurized {
    pub vectors: Vec<FeatureVector>,
    pub labels: Vec<Label>,
    pub skipped: Vec<SkippedSample>,
}

/// Loads and featurizes `samples`, skipping any whose audio cannot be read,
/// decoded or extracted. `vectors[i]` belongs to `labels[i]`.
pub fn featurize(
    repo: &SampleRepository,
    extractor: &FeatureExtractor,
    samples: &[Sample],
) -> Featurized {
    let mut batch = Featurized::default();
    let mut decoded: Vec<&Sample> = Vec::with_capacity(samples.len());
    let mut buffers: Vec<AudioBuffer> = Vec::with_capacity(samples.len());
    for sample in samples {
        match repo.load_audio(sample) {
            Ok(audio) => {
                decoded.push(sample);
                buffers.push(audio);
            }
            Err(e) => skip(&mut batch.skipped, sample, e.to_string()),
        }
    }

    for (sample, result) in decoded.into_iter().zip(extractor.extract_batch(&buffers)) {
        match result {
            Ok(vector) => {
                batch.vectors.push(vector);
                batch.labels.push(sample.label.clone());
            }
            Err(e) => skip(&mut batch.skipped, sample, e.to_string()),
        }
    }
    batch
}

fn skip(skipped: &mut Vec<SkippedSample>, sample: &Sample, reason: String) {
    tracing::warn!(sample = sample.id, label = %sample.label, reason = %reason, "skipping sample");
    skipped.push(SkippedSample {
        id: sample.id,
        label: sample.label.clone(),
        reason,
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type CycleResult = Result<CycleReport, StoreError>;

struct TrainRequest {
    trigger: String,
    reply: Sender<CycleResult>,
}

/// Background thread that runs training cycles one at a time.
pub struct TrainingWorker {
    requests: Sender<TrainRequest>,
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl TrainingWorker {
    pub fn spawn<C: Classifier + 'static>(trainer: Arc<IncrementalTrainer<C>>) -> Self {
        let (requests, request_rx) = crossbeam_channel::unbounded::<TrainRequest>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

        let thread_handle = thread::spawn(move || {
            tracing::debug!("training worker started");
            loop {
                crossbeam_channel::select! {
                    recv(request_rx) -> msg => match msg {
                        Ok(request) => handle(&trainer, request),
                        Err(_) => break,
                    },
                    recv(shutdown_rx) -> _ => {
                        for request in request_rx.try_iter() {
                            handle(&trainer, request);
                        }
                        break;
                    },
                }
            }
            tracing::debug!("training worker stopped");
        });

        Self {
            requests,
            shutdown_tx,
            thread_handle: Some(thread_handle),
        }
    }

    /// Queues a training cycle. The returned channel yields its result; it
    /// disconnects without a value if the worker has already stopped.
    pub fn trigger(&self, trigger: impl Into<String>) -> Receiver<CycleResult> {
        let (reply, result) = crossbeam_channel::bounded(1);
        let request = TrainRequest {
            trigger: trigger.into(),
            reply,
        };
        if self.requests.send(request).is_err() {
            tracing::warn!("training worker is not running, trigger dropped");
        }
        result
    }

    /// Finishes every queued cycle, then stops the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(());
        if handle.join().is_err() {
            tracing::error!("training worker panicked");
        }
    }
}

impl Drop for TrainingWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle<C: Classifier>(trainer: &IncrementalTrainer<C>, request: TrainRequest) {
    let result = trainer.run_cycle(&request.trigger);
    // The requester may have stopped listening.
    let _ = request.reply.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobStore, MemoryBlobStore};
    use crate::classifier::KnnClassifier;
    use crate::config::ClassifierConfig;
    use crate::error::StorageError;
    use crate::store::{LocalCache, VersionLedger};
    use std::f32::consts::PI;
    use std::path::Path;

    fn tone_wav(freq: f32, seed: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 4096,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let amplitude = 0.4 + 0.05 * seed as f32;
            for i in 0..8192 {
                let t = i as f32 / 4096.0;
                let s = amplitude * (2.0 * PI * freq * t).sin();
                writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    struct Fixture {
        blobs: Arc<MemoryBlobStore>,
        repo: Arc<SampleRepository>,
        trainer: IncrementalTrainer<KnnClassifier>,
        _cache: tempfile::TempDir,
    }

    fn trainer_over(
        repo: Arc<SampleRepository>,
        blobs: Arc<dyn BlobStore>,
        ledger: VersionLedger,
        cache: &Path,
        config: ClassifierConfig,
        mode: RetrainMode,
    ) -> IncrementalTrainer<KnnClassifier> {
        let store = Arc::new(ModelStore::new(blobs, ledger, LocalCache::new(cache), config));
        IncrementalTrainer::new(store, repo, FeatureExtractor::default()).with_mode(mode)
    }

    fn fixture(mode: RetrainMode) -> Fixture {
        let cache = tempfile::tempdir().unwrap();
        let blobs = Arc::new(MemoryBlobStore::new());
        let repo = Arc::new(SampleRepository::in_memory(blobs.clone()));
        let trainer = trainer_over(
            repo.clone(),
            blobs.clone(),
            VersionLedger::in_memory(),
            cache.path(),
            ClassifierConfig::default(),
            mode,
        );
        Fixture {
            blobs,
            repo,
            trainer,
            _cache: cache,
        }
    }

    /// Memory store that runs a callback right before its first read.
    struct InterceptingBlobs {
        inner: MemoryBlobStore,
        before_first_read: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl InterceptingBlobs {
        fn new() -> Self {
            Self {
                inner: MemoryBlobStore::new(),
                before_first_read: Mutex::new(None),
            }
        }

        fn before_first_read(&self, callback: impl FnOnce() + Send + 'static) {
            *lock(&self.before_first_read) = Some(Box::new(callback));
        }
    }

    impl BlobStore for InterceptingBlobs {
        fn exists(&self, path: &str) -> Result<bool, StorageError> {
            self.inner.exists(path)
        }

        fn open(&self, path: &str) -> Result<Vec<u8>, StorageError> {
            let callback = lock(&self.before_first_read).take();
            if let Some(callback) = callback {
                callback();
            }
            self.inner.open(path)
        }

        fn save(&self, path: &str, bytes: &[u8]) -> Result<String, StorageError> {
            self.inner.save(path, bytes)
        }

        fn delete(&self, path: &str) -> Result<(), StorageError> {
            self.inner.delete(path)
        }
    }

    fn add(repo: &SampleRepository, label: &str, freq: f32, count: usize) {
        let label = Label::from(label);
        if !repo.labels().contains(&label) {
            repo.create_label(label.as_str()).unwrap();
        }
        for seed in 0..count {
            repo.add_sample(&label, &tone_wav(freq, seed)).unwrap();
        }
    }

    #[test]
    fn successful_cycle_commits() {
        let f = fixture(RetrainMode::FullCorpus);
        add(&f.repo, "A", 110.0, 3);
        add(&f.repo, "D", 147.0, 3);

        let report = f.trainer.run_cycle("test").unwrap();
        assert!(report.is_committed());
        assert_eq!(report.trained, 6);
        assert_eq!(report.base_version, None);
        assert_eq!(f.trainer.state(), TrainerState::Idle);
        assert_eq!(f.trainer.last_outcome(), Some(CycleOutcome::Committed));
        assert!(f.trainer.store().latest_version().is_some());
    }

    #[test]
    fn too_few_examples_records_failure() {
        let f = fixture(RetrainMode::FullCorpus);
        add(&f.repo, "EL", 82.0, 3);
        add(&f.repo, "A", 110.0, 2);

        let report = f.trainer.run_cycle("test").unwrap();
        let CycleOutcome::Failed(message) = &report.outcome else {
            panic!("expected failure, got {:?}", report.outcome);
        };
        assert!(message.contains("'A'"), "{message}");
        let version = report.version.unwrap();
        assert_eq!(version.state, VersionState::Failed);
        assert!(version.artifact.is_none());
        assert!(f.trainer.store().latest_version().is_none());
    }

    #[test]
    fn undecodable_samples_are_skipped() {
        let f = fixture(RetrainMode::FullCorpus);
        add(&f.repo, "A", 110.0, 3);
        add(&f.repo, "D", 147.0, 3);
        let broken = f.repo.add_sample(&Label::from("A"), b"garbage").unwrap();

        let report = f.trainer.run_cycle("test").unwrap();
        assert!(report.is_committed());
        assert_eq!(report.trained, 6);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, broken.id);
    }

    #[test]
    fn upload_failure_keeps_previous_model() {
        let f = fixture(RetrainMode::FullCorpus);
        add(&f.repo, "A", 110.0, 3);
        add(&f.repo, "D", 147.0, 3);
        let first = f.trainer.run_cycle("first").unwrap().version.unwrap();

        add(&f.repo, "G", 196.0, 3);
        f.blobs.set_fail_writes(true);
        let report = f.trainer.run_cycle("second").unwrap();
        f.blobs.set_fail_writes(false);

        assert!(matches!(report.outcome, CycleOutcome::Failed(_)));
        assert_eq!(report.version.map(|v| v.state), Some(VersionState::Failed));
        assert_eq!(f.trainer.store().latest_version(), Some(first));
    }

    #[test]
    fn incremental_mode_fits_only_new_samples() {
        let f = fixture(RetrainMode::Incremental);
        add(&f.repo, "A", 110.0, 3);
        add(&f.repo, "D", 147.0, 3);
        let first = f.trainer.run_cycle("first").unwrap();
        assert_eq!(first.trained, 6);

        let idle = f.trainer.run_cycle("nothing new").unwrap();
        assert_eq!(idle.outcome, CycleOutcome::UpToDate);
        assert!(idle.version.is_none());

        add(&f.repo, "G", 196.0, 3);
        let second = f.trainer.run_cycle("second").unwrap();
        assert!(second.is_committed());
        assert_eq!(second.trained, 3);
        assert_eq!(second.base_version, first.version.map(|v| v.id));

        let (model, _) = f.trainer.store().get_latest().unwrap();
        assert_eq!(model.example_count(), 9);
    }

    #[test]
    fn worker_runs_triggers_in_order() {
        let f = fixture(RetrainMode::FullCorpus);
        add(&f.repo, "A", 110.0, 3);
        add(&f.repo, "D", 147.0, 3);
        let Fixture { trainer, .. } = f;
        let trainer = Arc::new(trainer);

        let worker = TrainingWorker::spawn(trainer.clone());
        let first = worker.trigger("one");
        let second = worker.trigger("two");
        worker.shutdown();

        let first = first.recv().unwrap().unwrap();
        let second = second.recv().unwrap().unwrap();
        assert_eq!(first.trigger, "one");
        assert_eq!(second.base_version, first.version.map(|v| v.id));
        assert_eq!(trainer.store().history().len(), 2);
    }

    #[test]
    fn samples_added_during_a_cycle_are_trained_next_cycle() {
        let cache = tempfile::tempdir().unwrap();
        let blobs = Arc::new(InterceptingBlobs::new());
        let repo = Arc::new(SampleRepository::in_memory(blobs.clone()));
        let trainer = trainer_over(
            repo.clone(),
            blobs.clone(),
            VersionLedger::in_memory(),
            cache.path(),
            ClassifierConfig::default(),
            RetrainMode::Incremental,
        );
        add(&repo, "A", 110.0, 3);
        add(&repo, "D", 147.0, 3);

        // Lands while the first cycle is reading its snapshot.
        let late = Arc::downgrade(&repo);
        blobs.before_first_read(move || {
            if let Some(repo) = late.upgrade() {
                add(&repo, "G", 196.0, 3);
            }
        });

        let first = trainer.run_cycle("first").unwrap();
        assert!(first.is_committed());
        assert_eq!(first.trained, 6);
        assert_eq!(repo.samples().len(), 9);
        assert_eq!(
            first.version.as_ref().and_then(|v| v.sample_watermark),
            Some(6)
        );

        let second = trainer.run_cycle("second").unwrap();
        assert!(second.is_committed());
        assert_eq!(second.trained, 3);
        assert_eq!(
            second.version.as_ref().and_then(|v| v.sample_watermark),
            Some(9)
        );
        let (model, _) = trainer.store().get_latest().unwrap();
        assert_eq!(model.example_count(), 9);
        assert_eq!(model.classes().len(), 3);
    }

    #[test]
    fn full_corpus_uses_the_current_classifier_config() {
        let dir = tempfile::tempdir().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let repo = Arc::new(SampleRepository::in_memory(blobs.clone()));
        let ledger_path = dir.path().join("versions.json");
        let cache = dir.path().join("cache");
        add(&repo, "A", 110.0, 3);
        add(&repo, "D", 147.0, 3);

        let narrow = trainer_over(
            repo.clone(),
            blobs.clone(),
            VersionLedger::open(&ledger_path).unwrap(),
            &cache,
            ClassifierConfig::default(),
            RetrainMode::FullCorpus,
        );
        let base = narrow.run_cycle("k=3").unwrap().version.unwrap();

        let wide = trainer_over(
            repo.clone(),
            blobs,
            VersionLedger::open(&ledger_path).unwrap(),
            &cache,
            ClassifierConfig {
                neighbors: 5,
                ..ClassifierConfig::default()
            },
            RetrainMode::FullCorpus,
        );
        let short = wide.run_cycle("k=5").unwrap();
        assert!(matches!(short.outcome, CycleOutcome::Failed(_)));
        assert_eq!(short.base_version, Some(base.id));

        add(&repo, "A", 111.0, 2);
        add(&repo, "D", 148.0, 2);
        let report = wide.run_cycle("k=5 again").unwrap();
        assert!(report.is_committed());
        let (model, _) = wide.store().get_latest().unwrap();
        assert_eq!(model.neighbors(), 5);
        assert_eq!(model.example_count(), 10);
    }

    #[test]
    fn full_corpus_does_not_read_the_base_artifact() {
        let f = fixture(RetrainMode::FullCorpus);
        add(&f.repo, "A", 110.0, 3);
        add(&f.repo, "D", 147.0, 3);
        let first = f.trainer.run_cycle("first").unwrap().version.unwrap();

        let artifact = first.artifact.clone().unwrap();
        f.blobs.delete(&artifact).unwrap();
        let cached = f.trainer.store().cache().local_path(&artifact).unwrap();
        std::fs::remove_file(cached).unwrap();
        assert!(f.trainer.store().get_latest().is_err());

        let second = f.trainer.run_cycle("second").unwrap();
        assert!(second.is_committed(), "{:?}", second.outcome);
        assert_eq!(second.base_version, Some(first.id));
    }

    #[test]
    fn concurrent_cycles_chain_onto_each_other() {
        let f = fixture(RetrainMode::FullCorpus);
        add(&f.repo, "A", 110.0, 3);
        add(&f.repo, "D", 147.0, 3);
        let Fixture { trainer, .. } = f;
        let trainer = Arc::new(trainer);

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let trainer = Arc::clone(&trainer);
                thread::spawn(move || trainer.run_cycle(&format!("thread {i}")).unwrap())
            })
            .collect();
        let mut reports: Vec<CycleReport> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        reports.sort_by_key(|r| r.version.as_ref().map(|v| v.id));

        assert!(reports.iter().all(CycleReport::is_committed));
        assert_eq!(reports[0].base_version, None);
        assert_eq!(
            reports[1].base_version,
            reports[0].version.as_ref().map(|v| v.id)
        );
        let history = trainer.store().history();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|v| v.state == VersionState::Committed));
        assert_eq!(trainer.state(), TrainerState::Idle);
    }

    #[test]
    fn featurize_keeps_labels_aligned_and_reports_skips() {
        let f = fixture(RetrainMode::FullCorpus);
        add(&f.repo, "A", 110.0, 2);
        let garbage = f.repo.add_sample(&Label::from("A"), b"garbage").unwrap();
        add(&f.repo, "D", 147.0, 1);
        let missing = f.repo.add_sample(&Label::from("D"), &tone_wav(150.0, 0)).unwrap();
        f.blobs.delete(&missing.path).unwrap();

        let batch = featurize(&f.repo, &FeatureExtractor::default(), &f.repo.samples());
        assert_eq!(batch.vectors.len(), 3);
        let labels: Vec<&str> = batch.labels.iter().map(Label::as_str).collect();
        assert_eq!(labels, vec!["A", "A", "D"]);
        let skipped: Vec<u64> = batch.skipped.iter().map(|s| s.id).collect();
        assert_eq!(skipped, vec![garbage.id, missing.id]);
    }
}

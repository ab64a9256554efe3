use std::f32::consts::PI;
use std::sync::Arc;

use recognizer_core::blob::MemoryBlobStore;
use recognizer_core::config::{ClassifierConfig, StorageConfig};
use recognizer_core::store::{LocalCache, VersionLedger};
use recognizer_core::{
    AudioBuffer, Classifier, CycleOutcome, FeatureExtractor, IncrementalTrainer, KnnClassifier,
    Label, ModelStore, RecognizerConfig, RetrainMode, SampleRepository, VersionState, Workspace,
};

const RATE: u32 = 4096;

/// A plucked-string-like tone: fundamental plus a weaker octave, decaying.
fn tone(freq: f32, variant: usize, seconds: f32) -> Vec<f32> {
    let n = (RATE as f32 * seconds) as usize;
    let gain = 0.5 + 0.04 * variant as f32;
    let phase = variant as f32 * 0.3;
    (0..n)
        .map(|i| {
            let t = i as f32 / RATE as f32;
            let env = (-t * 0.7).exp();
            gain * env
                * ((2.0 * PI * freq * t + phase).sin() + 0.3 * (4.0 * PI * freq * t).sin())
        })
        .collect()
}

fn wav(samples: &[f32]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

struct Harness {
    _dir: tempfile::TempDir,
    blobs: Arc<MemoryBlobStore>,
    store: Arc<ModelStore<KnnClassifier>>,
    samples: Arc<SampleRepository>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = Arc::new(ModelStore::new(
            blobs.clone(),
            VersionLedger::in_memory(),
            LocalCache::new(dir.path().join("cache")),
            ClassifierConfig::default(),
        ));
        let samples = Arc::new(SampleRepository::in_memory(blobs.clone()));
        Self {
            _dir: dir,
            blobs,
            store,
            samples,
        }
    }

    fn trainer(&self, mode: RetrainMode) -> IncrementalTrainer<KnnClassifier> {
        IncrementalTrainer::new(
            self.store.clone(),
            self.samples.clone(),
            FeatureExtractor::default(),
        )
        .with_mode(mode)
    }

    fn add(&self, label: &str, freq: f32, variants: std::ops::Range<usize>) {
        let label = Label::from(label);
        if !self.samples.labels().contains(&label) {
            self.samples.create_label(label.as_str()).unwrap();
        }
        for v in variants {
            self.samples
                .add_sample(&label, &wav(&tone(freq, v, 2.0)))
                .unwrap();
        }
    }
}

#[test]
fn class_with_too_few_examples_fails_the_cycle() {
    let h = Harness::new();
    h.add("E", 82.0, 0..3);
    h.add("A", 110.0, 0..2);

    let report = h.trainer(RetrainMode::FullCorpus).run_cycle("upload").unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Failed(_)));

    let history = h.store.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, VersionState::Failed);
    assert!(history[0].artifact.is_none());
    assert!(history[0].status.is_some());

    let (model, latest) = h.store.get_latest().unwrap();
    assert!(latest.is_none());
    assert!(!model.is_fitted());
}

#[test]
fn failed_cycles_never_replace_the_served_model() {
    let h = Harness::new();
    h.add("A", 110.0, 0..3);
    h.add("D", 147.0, 0..3);
    let trainer = h.trainer(RetrainMode::FullCorpus);
    let good = trainer.run_cycle("first").unwrap().version.unwrap();

    // Too few examples for the new label.
    h.add("G", 196.0, 0..1);
    let report = trainer.run_cycle("bad data").unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Failed(_)));
    assert_eq!(h.store.latest_version(), Some(good.clone()));

    // Upload failure.
    h.add("G", 196.0, 1..3);
    h.blobs.set_fail_writes(true);
    let report = trainer.run_cycle("offline").unwrap();
    h.blobs.set_fail_writes(false);
    assert!(matches!(report.outcome, CycleOutcome::Failed(_)));
    assert_eq!(h.store.latest_version(), Some(good));

    let recovered = trainer.run_cycle("recovered").unwrap();
    assert!(recovered.is_committed());

    // Latest is always the newest committed version.
    let history = h.store.history();
    let newest_committed = history
        .iter()
        .filter(|v| v.state == VersionState::Committed)
        .max_by_key(|v| (v.created_at, v.id))
        .cloned();
    assert_eq!(h.store.latest_version(), newest_committed);
    assert!(history
        .iter()
        .filter(|v| v.state == VersionState::Failed)
        .all(|v| v.artifact.is_none()));
    assert!(history.iter().all(|v| v.state != VersionState::Pending));
}

#[test]
fn incremental_training_matches_training_from_scratch() {
    let queries: Vec<(AudioBuffer, Label)> = [("A", 110.0), ("D", 147.0), ("G", 196.0)]
        .into_iter()
        .flat_map(|(name, freq)| {
            (10..13).map(move |v| (AudioBuffer::new(tone(freq, v, 2.0), RATE), Label::from(name)))
        })
        .collect();
    let extractor = FeatureExtractor::default();
    let (x, y): (Vec<_>, Vec<_>) = queries
        .iter()
        .map(|(a, l)| (extractor.extract(a).unwrap(), l.clone()))
        .unzip();

    let incremental = Harness::new();
    incremental.add("A", 110.0, 0..3);
    incremental.add("D", 147.0, 0..3);
    let trainer = incremental.trainer(RetrainMode::Incremental);
    assert!(trainer.run_cycle("s1").unwrap().is_committed());
    incremental.add("G", 196.0, 0..3);
    incremental.add("A", 110.0, 3..5);
    let second = trainer.run_cycle("s2").unwrap();
    assert!(second.is_committed());
    assert_eq!(second.trained, 5);

    let scratch = Harness::new();
    scratch.add("A", 110.0, 0..5);
    scratch.add("D", 147.0, 0..3);
    scratch.add("G", 196.0, 0..3);
    assert!(scratch
        .trainer(RetrainMode::FullCorpus)
        .run_cycle("all")
        .unwrap()
        .is_committed());

    let (inc_model, _) = incremental.store.get_latest().unwrap();
    let (full_model, _) = scratch.store.get_latest().unwrap();
    assert_eq!(inc_model.example_count(), full_model.example_count());
    assert!(inc_model.score(&x, &y).unwrap() >= full_model.score(&x, &y).unwrap());
}

#[test]
fn extraction_is_deterministic() {
    let extractor = FeatureExtractor::default();
    let audio = AudioBuffer::from_wav_bytes(&wav(&tone(147.0, 1, 2.5))).unwrap();
    let first = extractor.extract(&audio).unwrap();
    let second = extractor.extract(&audio).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 257);
}

#[test]
fn resampled_recordings_still_classify() {
    let h = Harness::new();
    h.add("A", 110.0, 0..3);
    h.add("EH", 329.0, 0..3);
    assert!(h
        .trainer(RetrainMode::FullCorpus)
        .run_cycle("upload")
        .unwrap()
        .is_committed());

    let rate = 8000;
    let samples: Vec<f32> = (0..rate * 2)
        .map(|i| 0.5 * (2.0 * PI * 329.0 * i as f32 / rate as f32).sin())
        .collect();
    let recognizer =
        recognizer_core::Recognizer::new(h.store.clone(), FeatureExtractor::default());
    assert_eq!(
        recognizer
            .recognize(&AudioBuffer::new(samples, rate as u32))
            .unwrap(),
        Label::from("EH")
    );
}

#[test]
fn blob_store_outage_on_read_is_reported() {
    let h = Harness::new();
    h.add("A", 110.0, 0..3);
    h.add("D", 147.0, 0..3);
    h.blobs.set_unavailable(true);
    let report = h.trainer(RetrainMode::FullCorpus).run_cycle("outage").unwrap();
    h.blobs.set_unavailable(false);

    // Every sample was unreadable, so nothing could be fitted.
    assert_eq!(report.skipped.len(), 6);
    assert!(matches!(report.outcome, CycleOutcome::Failed(_)));
    assert!(h.store.latest_version().is_none());
}

#[test]
fn workspace_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = RecognizerConfig {
        storage: StorageConfig::rooted_at(dir.path()),
        ..RecognizerConfig::default()
    };

    let committed = {
        let ws = Workspace::open(config.clone()).unwrap();
        for (name, freq) in [("A", 110.0), ("D", 147.0)] {
            let label = ws.samples.create_label(name).unwrap();
            for v in 0..3 {
                ws.samples.add_sample(&label, &wav(&tone(freq, v, 2.0))).unwrap();
            }
        }
        ws.trainer.run_cycle("first").unwrap().version.unwrap()
    };

    let ws = Workspace::open(config).unwrap();
    assert_eq!(ws.samples.samples().len(), 6);
    assert_eq!(ws.store.latest_version(), Some(committed));
    let query = AudioBuffer::new(tone(147.0, 7, 2.0), RATE);
    assert_eq!(ws.recognizer.recognize(&query).unwrap(), Label::from("D"));
}

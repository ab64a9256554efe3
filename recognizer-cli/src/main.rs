//! # note-recognizer - Command Line Front-End
//!
//! Exposes the recognizer core as subcommands: manage labels and samples,
//! run training cycles, classify or verify recordings, detect guitar-string
//! pitches, and inspect the model history.
//!
//! Configuration is taken from `--config`, then `NOTE_RECOGNIZER_CONFIG`,
//! then built-in defaults. Logging goes to stderr and honours `RUST_LOG`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use recognizer_core::config::StorageConfig;
use recognizer_core::evaluation;
use recognizer_core::trainer::{Featurized, featurize};
use recognizer_core::{
    AudioBuffer, CycleOutcome, FeatureExtractor, KnnClassifier, Label, RecognizerConfig,
    RetrainMode, TrainingWorker, Workspace,
};

#[derive(Parser, Debug)]
#[command(name = "note-recognizer")]
#[command(about = "Recognize notes and labeled audio samples")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "NOTE_RECOGNIZER_CONFIG")]
    config: Option<PathBuf>,

    /// Put every store under this directory, overriding `[storage]`
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new label
    Label { name: String },
    /// Upload WAV recordings for a label
    Ingest {
        label: String,
        files: Vec<PathBuf>,
        /// Create the label if it does not exist yet
        #[arg(long)]
        create: bool,
    },
    /// List stored samples
    Samples {
        #[arg(long)]
        label: Option<String>,
    },
    /// Delete a sample and its audio
    Remove { id: u64 },
    /// Run one training cycle
    Train {
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Classify a recording with the latest model
    Predict { file: PathBuf },
    /// Check whether a recording matches a label
    Verify { file: PathBuf, label: String },
    /// Detect a guitar-string pitch without any trained model
    Detect { file: PathBuf },
    /// Show every model version, including failed ones
    History,
    /// Train on a stratified split of the samples and report test accuracy
    Evaluate {
        #[arg(long, default_value_t = 0.25)]
        test_fraction: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    FullCorpus,
    Incremental,
}

impl From<ModeArg> for RetrainMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::FullCorpus => RetrainMode::FullCorpus,
            ModeArg::Incremental => RetrainMode::Incremental,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => RecognizerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RecognizerConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.storage = StorageConfig::rooted_at(dir);
    }
    if let Command::Train { mode: Some(mode) } = &args.command {
        config.training.mode = (*mode).into();
    }

    let ws = Workspace::open(config).context("Failed to open recognizer stores")?;
    run(&ws, args.command, args.json)
}

fn run(ws: &Workspace, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Label { name } => {
            let label = ws.samples.create_label(&name)?;
            println!("created label {label}");
        }
        Command::Ingest {
            label,
            files,
            create,
        } => {
            let label = Label::new(label);
            if create && !ws.samples.labels().contains(&label) {
                ws.samples.create_label(label.as_str())?;
            }
            for file in files {
                let bytes = read(&file)?;
                let sample = ws.samples.add_sample(&label, &bytes)?;
                println!("{}\t{}\t{}", sample.id, sample.label, sample.path);
            }
        }
        Command::Samples { label } => {
            let samples = match label {
                Some(l) => ws.samples.samples_for(&Label::new(l)),
                None => ws.samples.samples(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&samples)?);
            } else {
                for s in samples {
                    println!("{}\t{}\t{}\t{}", s.id, s.label, s.created_at.to_rfc3339(), s.path);
                }
            }
        }
        Command::Remove { id } => {
            let sample = ws.samples.remove_sample(id)?;
            println!("removed sample {} ({})", sample.id, sample.label);
        }
        Command::Train { .. } => train(ws)?,
        Command::Predict { file } => {
            let audio = load(&file)?;
            let label = ws.recognizer.recognize(&audio)?;
            println!("{label}");
        }
        Command::Verify { file, label } => {
            let audio = load(&file)?;
            let matched = ws.recognizer.verify(&audio, &Label::new(label))?;
            println!("{matched}");
        }
        Command::Detect { file } => {
            let audio = load(&file)?;
            let analysis = ws.pitch.analyze(&audio)?;
            match (&analysis.note, &analysis.nearest, analysis.distance_hz) {
                (Some(note), _, _) => println!("{note}"),
                (None, Some(nearest), Some(distance)) => println!(
                    "no note detected ({:.1} Hz, {distance:.1} Hz from {nearest})",
                    analysis.fundamental_hz
                ),
                _ => println!("no note detected ({:.1} Hz)", analysis.fundamental_hz),
            }
        }
        Command::History => {
            let history = ws.store.history();
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                for v in history {
                    println!(
                        "{}\t{:?}\t{}\t{}\t{}\t{}",
                        v.id,
                        v.state,
                        v.tag,
                        v.created_at.to_rfc3339(),
                        v.artifact.as_deref().unwrap_or("-"),
                        v.status.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Command::Evaluate {
            test_fraction,
            seed,
        } => evaluate(ws, test_fraction, seed)?,
    }
    Ok(())
}

/// Runs the cycle on the background worker and waits for it.
fn train(ws: &Workspace) -> Result<()> {
    let worker = TrainingWorker::spawn(Arc::clone(&ws.trainer));
    let result = worker.trigger("cli");
    worker.shutdown();

    let report = result
        .recv()
        .context("Training worker stopped before reporting")??;
    for skipped in &report.skipped {
        println!("skipped sample {} ({}): {}", skipped.id, skipped.label, skipped.reason);
    }
    match &report.outcome {
        CycleOutcome::Committed => {
            let id = report.version.as_ref().map(|v| v.id).unwrap_or_default();
            println!(
                "committed version {id} ({} examples, {:?})",
                report.trained,
                ws.trainer.mode()
            );
        }
        CycleOutcome::UpToDate => println!("no new samples since the latest version"),
        CycleOutcome::Failed(message) => bail!("training failed: {message}"),
    }
    Ok(())
}

fn evaluate(ws: &Workspace, test_fraction: f64, seed: u64) -> Result<()> {
    let extractor = FeatureExtractor::new(ws.config.features.clone());
    let Featurized {
        vectors,
        labels,
        skipped,
    } = featurize(&ws.samples, &extractor, &ws.samples.samples());
    if !skipped.is_empty() {
        println!("skipped {} unusable samples", skipped.len());
    }
    info!(examples = vectors.len(), "evaluating");

    let report = evaluation::holdout::<KnnClassifier>(
        &ws.config.classifier,
        &vectors,
        &labels,
        test_fraction,
        seed,
    )?;
    println!(
        "train accuracy {:.3} ({} examples), test accuracy {:.3} ({} examples)\n",
        report.train_accuracy, report.train_size, report.test_accuracy, report.test_size
    );
    println!("{}", report.test);
    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load(path: &Path) -> Result<AudioBuffer> {
    let bytes = read(path)?;
    AudioBuffer::from_wav_bytes(&bytes).with_context(|| format!("Failed to decode {}", path.display()))
}

//! Serving path: classify recordings with the newest committed model.
//!
//! The loaded classifier is kept in memory and swapped when the store
//! reports a newer committed version. Requests never wait on a training
//! cycle; they keep using the previous model until the new one is loaded.

use std::sync::{Arc, PoisonError, RwLock};

use crate::audio::AudioBuffer;
use crate::classifier::Classifier;
use crate::error::RecognizeError;
use crate::features::FeatureExtractor;
use crate::label::Label;
use crate::store::{ModelStore, ModelVersion};

struct Loaded<C> {
    classifier: Arc<C>,
    version: ModelVersion,
}

pub struct Recognizer<C> {
    store: Arc<ModelStore<C>>,
    extractor: FeatureExtractor,
    loaded: RwLock<Option<Loaded<C>>>,
}

impl<C: Classifier> Recognizer<C> {
    pub fn new(store: Arc<ModelStore<C>>, extractor: FeatureExtractor) -> Self {
        Self {
            store,
            extractor,
            loaded: RwLock::new(None),
        }
    }

    /// Version currently held in memory.
    pub fn current_version(&self) -> Option<ModelVersion> {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.version.clone())
    }

    /// Makes sure the newest committed version is loaded and returns it.
    ///
    /// # Errors
    /// * `RecognizeError::NoModel` - Nothing has been committed yet
    /// * `RecognizeError::Store` - The artifact could not be fetched or decoded
    pub fn refresh(&self) -> Result<(Arc<C>, ModelVersion), RecognizeError> {
        let latest = self.store.latest_version().ok_or(RecognizeError::NoModel)?;

        if let Some(loaded) = self
            .loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|l| l.version.id == latest.id)
        {
            return Ok((loaded.classifier.clone(), loaded.version.clone()));
        }

        let classifier = Arc::new(self.store.load_version(&latest)?);
        tracing::info!(version = latest.id, tag = %latest.tag, "serving model loaded");

        let mut slot = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        // Another request may have loaded an even newer version meanwhile.
        if let Some(current) = slot.as_ref().filter(|l| l.version.id > latest.id) {
            return Ok((current.classifier.clone(), current.version.clone()));
        }
        *slot = Some(Loaded {
            classifier: classifier.clone(),
            version: latest.clone(),
        });
        Ok((classifier, latest))
    }

    /// Predicts the label of `audio`.
    pub fn recognize(&self, audio: &AudioBuffer) -> Result<Label, RecognizeError> {
        let (classifier, version) = self.refresh()?;
        let features = self.extractor.extract(audio)?;
        let label = classifier.predict(&features)?;
        tracing::debug!(version = version.id, label = %label, "recording recognized");
        Ok(label)
    }

    /// True when `audio` is recognized as `expected`.
    pub fn verify(&self, audio: &AudioBuffer, expected: &Label) -> Result<bool, RecognizeError> {
        Ok(self.recognize(audio)? == *expected)
    }
}

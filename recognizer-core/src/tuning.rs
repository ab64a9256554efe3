//! # Pitch Table Module
//!
//! The fixed set of reference pitches the training-free detector can report,
//! plus helpers to find the closest entry to a measured frequency.
//!
//! The default table holds the six open strings of a guitar in standard
//! tuning. Frequencies are the rounded values the detector was calibrated
//! with, so `A` is exactly 110 Hz and `EH` (high E) is 329 Hz.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// A single named reference pitch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchEntry {
    /// Label reported on a match (e.g. "A", "EH")
    pub name: String,
    /// Reference frequency in Hz
    pub frequency: f32,
}

/// Ordered mapping of note name to reference frequency.
///
/// Order matters only for ties: when two entries are equally close to a
/// frequency, the one listed first wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PitchTable {
    entries: Vec<PitchEntry>,
}

/// Closest table entry to a measured frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchMatch<'a> {
    pub entry: &'a PitchEntry,
    /// Absolute distance in Hz
    pub distance_hz: f32,
    /// Deviation in cents (positive = sharp)
    pub cents: f32,
}

static GUITAR_STANDARD: Lazy<PitchTable> = Lazy::new(|| {
    const STRINGS: [(&str, f32); 6] = [
        ("EH", 329.0),
        ("B", 247.0),
        ("G", 196.0),
        ("D", 147.0),
        ("A", 110.0),
        ("EL", 82.0),
    ];
    PitchTable::new(
        STRINGS
            .iter()
            .map(|&(name, frequency)| PitchEntry {
                name: name.to_string(),
                frequency,
            })
            .collect(),
    )
});

impl PitchTable {
    pub fn new(entries: Vec<PitchEntry>) -> Self {
        Self { entries }
    }

    /// Six-string guitar in standard tuning, high string first.
    pub fn guitar_standard() -> Self {
        GUITAR_STANDARD.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PitchEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the entry closest to `freq` in absolute Hz.
    ///
    /// # Returns
    /// * `Some(match)` - Closest entry with its distance and cent deviation
    /// * `None` - The table is empty or `freq` is not finite
    pub fn nearest(&self, freq: f32) -> Option<PitchMatch<'_>> {
        if !freq.is_finite() {
            return None;
        }
        let mut best: Option<(&PitchEntry, f32)> = None;
        for entry in &self.entries {
            let distance = (entry.frequency - freq).abs();
            match best {
                Some((_, d)) if d <= distance => {}
                _ => best = Some((entry, distance)),
            }
        }
        best.map(|(entry, distance_hz)| PitchMatch {
            entry,
            distance_hz,
            cents: calculate_cents_deviation(freq, entry.frequency),
        })
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.entries.is_empty() {
            return Err("pitch table must not be empty".to_string());
        }
        for entry in &self.entries {
            if entry.name.trim().is_empty() {
                return Err("pitch table entry without a name".to_string());
            }
            if !(entry.frequency.is_finite() && entry.frequency > 0.0) {
                return Err(format!(
                    "pitch '{}' has invalid frequency {}",
                    entry.name, entry.frequency
                ));
            }
        }
        Ok(())
    }
}

/// Calculates the deviation from a target frequency in cents.
///
/// 100 cents = 1 semitone, 1200 cents = 1 octave. Positive values indicate
/// sharpness, negative values flatness.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guitar_table_has_six_strings_high_first() {
        let table = PitchTable::guitar_standard();
        let names: Vec<_> = table.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["EH", "B", "G", "D", "A", "EL"]);
    }

    #[test]
    fn nearest_picks_closest_frequency() {
        let table = PitchTable::guitar_standard();
        let m = table.nearest(112.5).unwrap();
        assert_eq!(m.entry.name, "A");
        assert!((m.distance_hz - 2.5).abs() < 1e-6);
        assert!(m.cents > 0.0);
    }

    #[test]
    fn ties_go_to_first_entry() {
        let table = PitchTable::new(vec![
            PitchEntry { name: "low".into(), frequency: 100.0 },
            PitchEntry { name: "high".into(), frequency: 110.0 },
        ]);
        assert_eq!(table.nearest(105.0).unwrap().entry.name, "low");
    }

    #[test]
    fn empty_table_and_nan_have_no_match() {
        assert!(PitchTable::new(Vec::new()).nearest(110.0).is_none());
        assert!(PitchTable::guitar_standard().nearest(f32::NAN).is_none());
    }

    #[test]
    fn octave_is_1200_cents() {
        assert!((calculate_cents_deviation(220.0, 110.0) - 1200.0).abs() < 1e-3);
    }
}

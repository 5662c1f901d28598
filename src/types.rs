//! Core data types shared by detectors, refinement and the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::constants::DEFAULT_BPM;

/// A single note event, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI semitone, 0-127
    pub pitch: u8,
    pub start: f64,
    pub end: f64,
    /// 1-127
    pub velocity: u8,
    /// Detector-reported likelihood in [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Note {
    pub fn new(pitch: u8, start: f64, end: f64, velocity: u8) -> Self {
        Self {
            pitch,
            start,
            end,
            velocity: velocity.clamp(1, 127),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn pitch_class(&self) -> usize {
        self.pitch as usize % 12
    }
}

/// Instrument classes produced by source separation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    Drums,
    Bass,
    Other,
    Vocals,
}

impl InstrumentClass {
    pub const ALL: [InstrumentClass; 4] = [
        InstrumentClass::Drums,
        InstrumentClass::Bass,
        InstrumentClass::Other,
        InstrumentClass::Vocals,
    ];

    /// Name of the stem as the separator labels it.
    pub fn stem_name(self) -> &'static str {
        match self {
            InstrumentClass::Drums => "drums",
            InstrumentClass::Bass => "bass",
            InstrumentClass::Other => "other",
            InstrumentClass::Vocals => "vocals",
        }
    }

    /// Name of the track in the transcription result. Vocals keep only
    /// their pitch content and are published as the melody lane.
    pub fn track_name(self) -> &'static str {
        match self {
            InstrumentClass::Vocals => "melody",
            other => other.stem_name(),
        }
    }

    /// Parse a stem name, accepting the track alias `melody`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "drums" => Some(InstrumentClass::Drums),
            "bass" => Some(InstrumentClass::Bass),
            "other" | "harmony" => Some(InstrumentClass::Other),
            "vocals" | "melody" => Some(InstrumentClass::Vocals),
            _ => None,
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem_name())
    }
}

/// Global tempo and beat grid for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    pub bpm: f64,
    pub beat_times: Vec<f64>,
    /// Estimation failed and the default was substituted.
    #[serde(default)]
    pub degraded: bool,
}

impl TempoEstimate {
    pub fn new(bpm: f64, beat_times: Vec<f64>) -> Self {
        Self {
            bpm,
            beat_times,
            degraded: false,
        }
    }

    pub fn fallback() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            beat_times: Vec::new(),
            degraded: true,
        }
    }

    /// Length of one beat in seconds.
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.bpm
    }
}

impl Default for TempoEstimate {
    fn default() -> Self {
        Self::fallback()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    pub time: f64,
    #[serde(rename = "chord")]
    pub label: String,
}

/// One instrument lane of the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub notes: Vec<Note>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Track {
    pub fn with_notes(name: impl Into<String>, notes: Vec<Note>) -> Self {
        Self {
            name: name.into(),
            notes,
            midi_artifact: None,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            name: name.into(),
            notes: Vec::new(),
            midi_artifact: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some() && self.notes.is_empty()
    }
}

/// Output of a full transcription run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub success: bool,
    pub run_id: String,
    pub tempo: TempoEstimate,
    pub tracks: BTreeMap<String, Track>,
    pub chords: Vec<ChordEvent>,
    pub duration: f64,
    pub notes_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptionResult {
    pub fn failure(run_id: impl Into<String>, tempo: TempoEstimate, error: impl ToString) -> Self {
        Self {
            success: false,
            run_id: run_id.into(),
            tempo,
            tracks: BTreeMap::new(),
            chords: Vec::new(),
            duration: 0.0,
            notes_count: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn track(&self, name: &str) -> Option<&Track> {
        self.tracks.get(name)
    }
}

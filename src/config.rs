//! Calibration tables and runtime settings.
//!
//! Per-instrument thresholds live here as data so each class can be tuned
//! without touching the others. Every struct deserializes with defaults for
//! missing fields, so an override file only needs the values it changes. A
//! partial per-class row is laid over that class's own calibration.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{MODEL_PATH, MODEL_PATH_ENV};
use crate::error::{Result, TranscriptionError};
use crate::types::InstrumentClass;

/// Detection and refinement parameters for one instrument class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackParams {
    /// Minimum onset activation for a note start (neural decoder).
    pub onset_threshold: f32,
    /// Minimum frame activation for a note to stay on (neural decoder).
    pub frame_threshold: f32,
    pub min_note_length_ms: f32,
    /// Notes below this confidence are dropped by the refiner.
    pub confidence_threshold: f32,
    pub min_frequency_hz: f32,
    pub max_frequency_hz: f32,
    /// Grid step in beats (0.25 = sixteenth note).
    pub quantize_resolution_beats: f64,
    /// Same-pitch notes separated by at most this gap are fused.
    pub merge_threshold_s: f64,
    /// Frames the decoder tolerates below `frame_threshold` before ending a note.
    pub energy_tolerance_frames: usize,
    pub skip: bool,
}

/// The calibration surface: one [`TrackParams`] per instrument class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamsTable {
    pub drums: TrackParams,
    pub bass: TrackParams,
    pub other: TrackParams,
    pub vocals: TrackParams,
    /// Bounds used when vocals go through the neural detector.
    pub vocals_neural: TrackParams,
}

impl ParamsTable {
    pub const DRUMS: TrackParams = TrackParams {
        onset_threshold: 0.3,
        frame_threshold: 0.2,
        min_note_length_ms: 50.0,
        confidence_threshold: 0.0,
        min_frequency_hz: 20.0,
        max_frequency_hz: 15000.0,
        quantize_resolution_beats: 0.125,
        merge_threshold_s: 0.0,
        energy_tolerance_frames: 11,
        skip: false,
    };

    // Bass is usually the weakest stem after separation: lower thresholds,
    // longer drop-out tolerance for sustained low notes.
    pub const BASS: TrackParams = TrackParams {
        onset_threshold: 0.4,
        frame_threshold: 0.25,
        min_note_length_ms: 100.0,
        confidence_threshold: 0.25,
        min_frequency_hz: 30.0,
        max_frequency_hz: 300.0,
        quantize_resolution_beats: 0.25,
        merge_threshold_s: 0.05,
        energy_tolerance_frames: 15,
        skip: false,
    };

    pub const OTHER: TrackParams = TrackParams {
        onset_threshold: 0.5,
        frame_threshold: 0.3,
        min_note_length_ms: 127.7,
        confidence_threshold: 0.15,
        min_frequency_hz: 80.0,
        max_frequency_hz: 2000.0,
        quantize_resolution_beats: 0.25,
        merge_threshold_s: 0.05,
        energy_tolerance_frames: 11,
        skip: false,
    };

    pub const VOCALS: TrackParams = TrackParams {
        onset_threshold: 0.5,
        frame_threshold: 0.3,
        min_note_length_ms: 20.0,
        confidence_threshold: 0.1,
        min_frequency_hz: 80.0,
        max_frequency_hz: 2000.0,
        quantize_resolution_beats: 0.25,
        merge_threshold_s: 0.05,
        energy_tolerance_frames: 11,
        skip: false,
    };

    pub const VOCALS_NEURAL: TrackParams = TrackParams {
        onset_threshold: 0.5,
        frame_threshold: 0.3,
        min_note_length_ms: 80.0,
        confidence_threshold: 0.2,
        min_frequency_hz: 150.0,
        max_frequency_hz: 1000.0,
        quantize_resolution_beats: 0.25,
        merge_threshold_s: 0.05,
        energy_tolerance_frames: 11,
        skip: false,
    };

    pub fn get(&self, class: InstrumentClass) -> &TrackParams {
        match class {
            InstrumentClass::Drums => &self.drums,
            InstrumentClass::Bass => &self.bass,
            InstrumentClass::Other => &self.other,
            InstrumentClass::Vocals => &self.vocals,
        }
    }

    /// Look up by stem name; unknown names get the `other` parameters.
    pub fn get_by_name(&self, name: &str) -> &TrackParams {
        InstrumentClass::from_name(name)
            .map(|class| self.get(class))
            .unwrap_or(&self.other)
    }
}

impl Default for ParamsTable {
    fn default() -> Self {
        Self {
            drums: Self::DRUMS,
            bass: Self::BASS,
            other: Self::OTHER,
            vocals: Self::VOCALS,
            vocals_neural: Self::VOCALS_NEURAL,
        }
    }
}

impl<'de> Deserialize<'de> for ParamsTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Rows {
            drums: Option<TrackParamsPatch>,
            bass: Option<TrackParamsPatch>,
            other: Option<TrackParamsPatch>,
            vocals: Option<TrackParamsPatch>,
            vocals_neural: Option<TrackParamsPatch>,
        }

        let rows = Rows::deserialize(deserializer)?;
        let defaults = ParamsTable::default();
        let apply = |row: Option<TrackParamsPatch>, base: TrackParams| match row {
            Some(patch) => patch.apply(base),
            None => base,
        };
        Ok(Self {
            drums: apply(rows.drums, defaults.drums),
            bass: apply(rows.bass, defaults.bass),
            other: apply(rows.other, defaults.other),
            vocals: apply(rows.vocals, defaults.vocals),
            vocals_neural: apply(rows.vocals_neural, defaults.vocals_neural),
        })
    }
}

/// The fields of one [`TrackParams`] row that a settings file sets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackParamsPatch {
    pub onset_threshold: Option<f32>,
    pub frame_threshold: Option<f32>,
    pub min_note_length_ms: Option<f32>,
    pub confidence_threshold: Option<f32>,
    pub min_frequency_hz: Option<f32>,
    pub max_frequency_hz: Option<f32>,
    pub quantize_resolution_beats: Option<f64>,
    pub merge_threshold_s: Option<f64>,
    pub energy_tolerance_frames: Option<usize>,
    pub skip: Option<bool>,
}

impl TrackParamsPatch {
    /// `base` with every field this patch sets replaced.
    pub fn apply(self, base: TrackParams) -> TrackParams {
        TrackParams {
            onset_threshold: self.onset_threshold.unwrap_or(base.onset_threshold),
            frame_threshold: self.frame_threshold.unwrap_or(base.frame_threshold),
            min_note_length_ms: self.min_note_length_ms.unwrap_or(base.min_note_length_ms),
            confidence_threshold: self.confidence_threshold.unwrap_or(base.confidence_threshold),
            min_frequency_hz: self.min_frequency_hz.unwrap_or(base.min_frequency_hz),
            max_frequency_hz: self.max_frequency_hz.unwrap_or(base.max_frequency_hz),
            quantize_resolution_beats: self.quantize_resolution_beats.unwrap_or(base.quantize_resolution_beats),
            merge_threshold_s: self.merge_threshold_s.unwrap_or(base.merge_threshold_s),
            energy_tolerance_frames: self.energy_tolerance_frames.unwrap_or(base.energy_tolerance_frames),
            skip: self.skip.unwrap_or(base.skip),
        }
    }
}

/// Frequency band in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub low_hz: f32,
    pub high_hz: f32,
}

impl Band {
    pub const fn new(low_hz: f32, high_hz: f32) -> Self {
        Self { low_hz, high_hz }
    }
}

/// Parameters for the multi-band drum onset cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrumParams {
    pub n_fft: usize,
    pub hop_length: usize,

    pub kick_band: Band,
    pub snare_body_band: Band,
    pub snare_snap_band: Band,
    pub tom_band: Band,
    pub hihat_band: Band,
    pub cymbal_band: Band,

    /// Peak-picking sensitivity per band, on flux normalized to [0, 1].
    pub kick_delta: f32,
    pub snare_delta: f32,
    pub tom_delta: f32,
    pub hihat_delta: f32,
    pub cymbal_delta: f32,

    /// Dedup window against earlier cascade stages.
    pub dedup_tolerance_s: f64,
    /// Tighter dedup window for fast transient classes (hi-hat).
    pub fast_dedup_tolerance_s: f64,
    /// Minimum spacing of two onsets within one band.
    pub refractory_s: f64,
    /// A band whose peak flux is below this share of the full-band peak is ignored.
    pub min_band_flux_ratio: f32,

    /// Tom centroid cut-offs: below the first is the floor tom, below the second the mid tom.
    pub tom_low_centroid_hz: f32,
    pub tom_mid_centroid_hz: f32,
    pub decay_window_s: f64,
    /// Decay to half energy longer than this marks an open hi-hat.
    pub open_hihat_decay_s: f64,
    pub attack_window_s: f64,
    /// Peak absolute amplitude at or above this marks a crash rather than a ride.
    pub crash_attack_threshold: f32,

    pub hit_duration_s: f64,
}

impl Default for DrumParams {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 256,
            kick_band: Band::new(20.0, 100.0),
            snare_body_band: Band::new(150.0, 500.0),
            snare_snap_band: Band::new(2000.0, 5000.0),
            tom_band: Band::new(80.0, 400.0),
            hihat_band: Band::new(5000.0, 15000.0),
            cymbal_band: Band::new(3000.0, 10000.0),
            kick_delta: 0.1,
            snare_delta: 0.1,
            tom_delta: 0.12,
            hihat_delta: 0.05,
            cymbal_delta: 0.2,
            dedup_tolerance_s: 0.03,
            fast_dedup_tolerance_s: 0.02,
            refractory_s: 0.03,
            min_band_flux_ratio: 0.02,
            tom_low_centroid_hz: 130.0,
            tom_mid_centroid_hz: 220.0,
            decay_window_s: 0.2,
            open_hihat_decay_s: 0.1,
            attack_window_s: 0.05,
            crash_attack_threshold: 0.3,
            hit_duration_s: 0.05,
        }
    }
}

/// Parameters for the monophonic f0 tracker and its note segmentation.
///
/// The search range and minimum note length come from the vocal
/// [`TrackParams`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonophonicParams {
    pub sample_rate: u32,
    pub frame_length: usize,
    pub hop_length: usize,
    pub voiced_threshold: f64,
    /// Semitones a frame may stray from the note before a new note starts.
    pub pitch_tolerance: i32,
    /// Unvoiced stretch a note survives.
    pub gap_tolerance_s: f64,
}

impl Default for MonophonicParams {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            frame_length: 2048,
            hop_length: 128,
            voiced_threshold: 0.05,
            pitch_tolerance: 1,
            gap_tolerance_s: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrumMode {
    /// Multi-band onset cascade.
    #[default]
    Onsets,
    /// Drums are not transcribed.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MelodyMode {
    /// Monophonic tracker, with the neural detector as fallback.
    #[default]
    Monophonic,
    Neural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempoSource {
    #[default]
    Mix,
    Bass,
}

/// Runtime settings for a transcription context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model_path: PathBuf,
    /// Per-track MIDI files are written under `<artifact_dir>/<run_id>/` when set.
    pub artifact_dir: Option<PathBuf>,
    pub chord_window_s: f64,
    pub tempo_source: TempoSource,
    pub drum_mode: DrumMode,
    pub melody_mode: MelodyMode,
    pub params: ParamsTable,
    pub drums: DrumParams,
    pub monophonic: MonophonicParams,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            artifact_dir: None,
            chord_window_s: 0.5,
            tempo_source: TempoSource::default(),
            drum_mode: DrumMode::default(),
            melody_mode: MelodyMode::default(),
            params: ParamsTable::default(),
            drums: DrumParams::default(),
            monophonic: MonophonicParams::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.chord_window_s > 0.0) {
            return Err(TranscriptionError::Config(format!(
                "chord_window_s must be positive, got {}",
                self.chord_window_s
            )));
        }
        let rows = InstrumentClass::ALL
            .into_iter()
            .map(|class| (class.to_string(), self.params.get(class)))
            .chain(std::iter::once(("vocals_neural".to_string(), &self.params.vocals_neural)));
        for (name, params) in rows {
            if params.min_frequency_hz >= params.max_frequency_hz {
                return Err(TranscriptionError::Config(format!(
                    "{name}: min_frequency_hz must be below max_frequency_hz"
                )));
            }
            if !(params.quantize_resolution_beats > 0.0) {
                return Err(TranscriptionError::Config(format!(
                    "{name}: quantize_resolution_beats must be positive"
                )));
            }
            if !(params.onset_threshold >= 0.0) || !(params.frame_threshold >= 0.0) {
                return Err(TranscriptionError::Config(format!(
                    "{name}: onset_threshold and frame_threshold must not be negative"
                )));
            }
        }
        if self.drums.hop_length == 0 || self.drums.n_fft < 2 {
            return Err(TranscriptionError::Config("drum STFT geometry is invalid".into()));
        }
        Ok(())
    }
}

/// Model path from the environment, or the bundled default location.
pub fn default_model_path() -> PathBuf {
    std::env::var(MODEL_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(MODEL_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_class_gets_other_params() {
        let table = ParamsTable::default();
        assert_eq!(table.get_by_name("kazoo"), &table.other);
        assert_eq!(table.get_by_name("bass"), &table.bass);
    }

    #[test]
    fn test_classes_are_tuned_independently() {
        let mut table = ParamsTable::default();
        table.bass.onset_threshold = 0.9;
        assert_eq!(table.other.onset_threshold, ParamsTable::OTHER.onset_threshold);
        assert_eq!(table.get(InstrumentClass::Bass).onset_threshold, 0.9);
    }

    #[test]
    fn test_partial_settings_file() {
        let settings: Settings =
            serde_json::from_str(r#"{"chord_window_s": 1.0, "params": {"bass": {"onset_threshold": 0.35}}}"#)
                .unwrap();
        assert_eq!(settings.chord_window_s, 1.0);
        assert_eq!(settings.params.bass.onset_threshold, 0.35);
        // the rest of the bass row keeps its own calibration
        assert_eq!(settings.params.bass.max_frequency_hz, ParamsTable::BASS.max_frequency_hz);
        assert_eq!(settings.params.bass.min_frequency_hz, 30.0);
        assert_eq!(settings.params.bass.min_note_length_ms, ParamsTable::BASS.min_note_length_ms);
        assert_eq!(settings.params.drums, ParamsTable::DRUMS);
    }

    #[test]
    fn test_partial_rows_keep_their_own_class_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{"params": {"vocals_neural": {"skip": true}, "drums": {"frame_threshold": 0.1}}}"#,
        )
        .unwrap();
        assert!(settings.params.vocals_neural.skip);
        assert_eq!(settings.params.vocals_neural.min_frequency_hz, ParamsTable::VOCALS_NEURAL.min_frequency_hz);
        assert_eq!(settings.params.drums.frame_threshold, 0.1);
        assert_eq!(settings.params.drums.quantize_resolution_beats, ParamsTable::DRUMS.quantize_resolution_beats);
        assert_eq!(settings.params.other, ParamsTable::OTHER);
    }

    #[test]
    fn test_validate_rejects_negative_thresholds() {
        let mut settings = Settings::default();
        settings.params.bass.frame_threshold = -0.1;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.params.drums.onset_threshold = -1.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.params.other.frame_threshold = 0.0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_checks_vocals_neural() {
        let mut settings = Settings::default();
        settings.params.vocals_neural.min_frequency_hz = 2000.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.params.vocals_neural.frame_threshold = -0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_band() {
        let mut settings = Settings::default();
        settings.params.other.min_frequency_hz = 5000.0;
        assert!(settings.validate().is_err());
    }
}

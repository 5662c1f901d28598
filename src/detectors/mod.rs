//! Note detection strategies.
//!
//! Every strategy turns a mono waveform into raw [`Note`]s for one
//! instrument class. Failures come back as [`crate::error::TranscriptionError`]
//! values; nothing panics past a detector.

use std::path::Path;

use crate::config::TrackParams;
use crate::error::Result;
use crate::preprocessing::load_audio::load_mono;
use crate::types::Note;

pub mod drums;
pub mod monophonic;
pub mod neural;

pub use drums::{DrumKind, DrumOnsetDetector};
pub use monophonic::{MonophonicPitchDetector, PitchFrame};
pub use neural::NeuralPitchDetector;

pub trait NoteDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rate the detector analyses at; input is resampled to it.
    fn sample_rate(&self) -> u32;

    fn detect(&self, samples: &[f32], params: &TrackParams) -> Result<Vec<Note>>;

    fn detect_file(&self, path: &Path, params: &TrackParams) -> Result<Vec<Note>> {
        let samples = load_mono(path, self.sample_rate())?;
        self.detect(&samples, params)
    }
}

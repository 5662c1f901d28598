use tracing::debug;

use crate::config::TrackParams;
use crate::constants::AUDIO_SAMPLE_RATE;
use crate::error::{Result, TranscriptionError};
use crate::inference::{ModelOutput, NeuralModel};
use crate::postprocessing::note_event_frames::{output_to_notes_poly, DecodeOptions};
use crate::postprocessing::note_event_times::note_frames_to_time;
use crate::types::Note;

use super::NoteDetector;

/// Polyphonic detector backed by the note-estimation model.
///
/// Thresholds, minimum note length and the frequency band come from the
/// [`TrackParams`] of each call, so one loaded model serves every class.
pub struct NeuralPitchDetector<'a> {
    model: &'a NeuralModel,
}

impl<'a> NeuralPitchDetector<'a> {
    pub fn new(model: &'a NeuralModel) -> Self {
        Self { model }
    }
}

/// Decode model activations into notes with the given parameters.
pub fn decode_output(output: &ModelOutput, params: &TrackParams) -> Vec<Note> {
    let options = DecodeOptions::from_params(params);
    let note_frames = output_to_notes_poly(output.frames_rows(), output.onsets_rows(), &options);
    note_frames_to_time(&note_frames)
}

impl NoteDetector for NeuralPitchDetector<'_> {
    fn name(&self) -> &'static str {
        "neural"
    }

    fn sample_rate(&self) -> u32 {
        AUDIO_SAMPLE_RATE as u32
    }

    fn detect(&self, samples: &[f32], params: &TrackParams) -> Result<Vec<Note>> {
        if samples.is_empty() {
            return Err(TranscriptionError::DetectionFailed("no audio samples".into()));
        }
        let output = self.model.predict(samples)?;
        let notes = decode_output(&output, params);
        debug!(
            "Neural decode ({:.0}-{:.0} Hz): {} notes from {} frames",
            params.min_frequency_hz,
            params.max_frequency_hz,
            notes.len(),
            output.frames.nrows()
        );
        Ok(notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamsTable;
    use ndarray::Array2;

    fn output_with_note(bin: usize, start: usize, end: usize) -> ModelOutput {
        let mut frames = Array2::<f32>::zeros((200, 88));
        let mut onsets = Array2::<f32>::zeros((200, 88));
        onsets[[start, bin]] = 0.95;
        for t in start..end {
            frames[[t, bin]] = 0.8;
        }
        ModelOutput { frames, onsets }
    }

    #[test]
    fn test_decode_respects_class_band() {
        // E2 (MIDI 40, ~82 Hz) is bin 19
        let output = output_with_note(19, 20, 120);

        let bass = decode_output(&output, &ParamsTable::BASS);
        assert_eq!(bass.len(), 1);
        assert_eq!(bass[0].pitch, 40);
        assert!(bass[0].confidence.is_some());

        // below the vocal band
        assert!(decode_output(&output, &ParamsTable::VOCALS_NEURAL).is_empty());
    }

    #[test]
    fn test_min_note_length_is_per_class() {
        // 8 frames, ~93 ms
        let output = output_with_note(39, 20, 28);
        assert!(decode_output(&output, &ParamsTable::BASS).is_empty());
        assert!(decode_output(&output, &ParamsTable::VOCALS).len() == 1);
    }
}

/* PORTED LIBROSA FUNCTIONS */

use crate::constants::{ANNOT_N_FRAMES, AUDIO_SAMPLE_RATE, FFT_HOP, WINDOW_OFFSET};

/// Converts a frequency in Hz to a (fractional) MIDI pitch.
pub fn hz_to_midi(hz: f32) -> f32 {
    12.0 * (hz.log2() - 440.0f32.log2()) + 69.0
}

pub fn hz_to_midi_f64(hz: f64) -> f64 {
    12.0 * (hz / 440.0).log2() + 69.0
}

/// Converts from the model's "frame" time to seconds, correcting for the
/// drift introduced by windowed inference.
pub fn model_frame_to_time(frame: usize) -> f32 {
    (frame as f32 * FFT_HOP as f32) / AUDIO_SAMPLE_RATE as f32
        - WINDOW_OFFSET * (frame as f32 / ANNOT_N_FRAMES as f32).floor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_conversions() {
        assert!((hz_to_midi(440.0) - 69.0).abs() < 1e-4);
        assert!((hz_to_midi_f64(261.6256) - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_model_frame_to_time_is_monotonic() {
        let times: Vec<f32> = (0..400).map(model_frame_to_time).collect();
        assert_eq!(times[0], 0.0);
        assert!(times.windows(2).all(|w| w[1] > w[0]));
    }
}

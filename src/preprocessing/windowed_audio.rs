use ndarray::{s, Array1};

use crate::constants::{AUDIO_N_SAMPLES, AUDIO_SAMPLE_RATE};

/// Iterator over fixed-length model windows, zero-padding the last one.
pub struct WindowedAudio<'a> {
    audio: &'a Array1<f32>,
    window_len: usize,
    hop_size: usize,
    index: usize,
}

impl<'a> Iterator for WindowedAudio<'a> {
    /// The window and its `(start, end)` time in seconds.
    type Item = (Array1<f32>, (f64, f64));

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.audio.len() || self.hop_size == 0 {
            return None;
        }

        let end_index = (self.index + self.window_len).min(self.audio.len());
        let mut window = Array1::zeros(self.window_len);
        window
            .slice_mut(s![..end_index - self.index])
            .assign(&self.audio.slice(s![self.index..end_index]));

        let t_start = self.index as f64 / AUDIO_SAMPLE_RATE as f64;
        let window_time = (t_start, t_start + self.window_len as f64 / AUDIO_SAMPLE_RATE as f64);

        self.index += self.hop_size;
        Some((window, window_time))
    }
}

pub fn window_audio(audio: &Array1<f32>, hop_size: usize) -> WindowedAudio<'_> {
    WindowedAudio {
        audio,
        window_len: AUDIO_N_SAMPLES,
        hop_size,
        index: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_window_is_zero_padded() {
        let audio = Array1::from(vec![1.0f32; AUDIO_N_SAMPLES + 10]);
        let windows: Vec<_> = window_audio(&audio, AUDIO_N_SAMPLES).collect();
        assert_eq!(windows.len(), 2);
        let (last, (t_start, _)) = &windows[1];
        assert_eq!(last.len(), AUDIO_N_SAMPLES);
        assert_eq!(last[9], 1.0);
        assert_eq!(last[10], 0.0);
        assert!((t_start - AUDIO_N_SAMPLES as f64 / AUDIO_SAMPLE_RATE as f64).abs() < 1e-9);
    }
}

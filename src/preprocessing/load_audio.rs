use std::path::Path;

use hound::{SampleFormat, WavReader};
use ndarray::{concatenate, Array1, Array2, Axis};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use tracing::debug;

use crate::error::{Result, TranscriptionError};
use crate::preprocessing::windowed_audio::window_audio;

/// Decode a WAV file to mono f32 samples at `target_sample_rate`.
///
/// Missing and zero-length files are reported as `InputNotFound` and
/// `InputEmpty`; undecodable files as `InvalidAudio`.
pub fn load_mono<P: AsRef<Path>>(path: P, target_sample_rate: u32) -> Result<Vec<f32>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TranscriptionError::InputNotFound(path.to_path_buf()));
    }
    if std::fs::metadata(path)?.len() == 0 {
        return Err(TranscriptionError::InputEmpty(path.to_path_buf()));
    }

    let reader = WavReader::open(path).map_err(|e| TranscriptionError::invalid_audio(path, e))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(TranscriptionError::invalid_audio(path, "zero sample rate"));
    }
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| TranscriptionError::invalid_audio(path, e))?,
        SampleFormat::Int => {
            let max_sample_value = (2.0_f64.powi(spec.bits_per_sample as i32 - 1) - 1.0) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_sample_value))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| TranscriptionError::invalid_audio(path, e))?
        }
    };

    // Average all channels down to mono
    let mono: Vec<f32> = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    if mono.is_empty() {
        return Err(TranscriptionError::InputEmpty(path.to_path_buf()));
    }

    debug!(
        "Loaded {}: {} samples at {} Hz, {} channel(s)",
        path.display(),
        mono.len(),
        spec.sample_rate,
        channels
    );

    resample(&mono, spec.sample_rate, target_sample_rate)
}

/// Band-limited sinc resampling of a mono signal.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == 0 || target_rate == 0 {
        return Err(TranscriptionError::DetectionFailed(format!(
            "cannot resample from {source_rate} Hz to {target_rate} Hz"
        )));
    }
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let resample_ratio = target_rate as f64 / source_rate as f64;
    let mut resampler = SincFixedIn::<f64>::new(resample_ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| TranscriptionError::DetectionFailed(format!("resampler setup: {e}")))?;

    let channel_data = vec![samples.iter().map(|&s| s as f64).collect::<Vec<f64>>()];
    let resampled = resampler
        .process(&channel_data, None)
        .map_err(|e| TranscriptionError::DetectionFailed(format!("resampling: {e}")))?;

    let expected_len = (samples.len() as f64 * resample_ratio) as usize;
    let mut output: Vec<f32> = resampled
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .take(expected_len)
        .map(|s| s as f32)
        .collect();
    output.resize(expected_len, 0.0);

    Ok(output)
}

/// Pad and cut model-rate audio into overlapping windows shaped `(1, n_samples)`.
///
/// Returns the windows and the unpadded length of the audio.
pub fn get_audio_input(
    audio: &[f32],
    overlap_len: usize,
    hop_size: usize,
) -> Result<(Vec<Array2<f32>>, usize)> {
    let original_length = audio.len();
    if original_length == 0 {
        return Err(TranscriptionError::DetectionFailed("no audio samples to window".into()));
    }

    // Padding with half the overlap length
    let padding = Array1::zeros(overlap_len / 2);
    let audio = Array1::from(audio.to_vec());
    let padded_audio = concatenate(Axis(0), &[padding.view(), audio.view()])?;

    let audio_windows = window_audio(&padded_audio, hop_size)
        .map(|(window, _)| window.insert_axis(Axis(0)))
        .collect();

    Ok((audio_windows, original_length))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::constants::AUDIO_N_SAMPLES;

    #[test]
    fn test_missing_file_is_input_not_found() {
        let err = load_mono("/definitely/not/here.wav", 22050).unwrap_err();
        assert!(matches!(err, TranscriptionError::InputNotFound(_)));
    }

    #[test]
    fn test_resample_halves_length() {
        let samples = vec![0.0f32; 44100];
        let out = resample(&samples, 44100, 22050).unwrap();
        assert_eq!(out.len(), 22050);
    }

    #[test]
    fn test_resample_rejects_zero_rates() {
        let samples = vec![0.1f32; 22050];
        assert!(resample(&samples, 0, 22050).is_err());
        assert!(resample(&samples, 22050, 0).is_err());
        assert!(resample(&[], 0, 0).is_err());
    }

    /// A 16-bit mono WAV whose header claims the given sample rate.
    pub(crate) fn wav_bytes_with_rate(sample_rate: u32, n_samples: usize) -> Vec<u8> {
        let data_len = (n_samples * 2) as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..n_samples {
            bytes.extend_from_slice(&((i % 200) as i16 * 100).to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_zero_sample_rate_is_invalid_audio() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("zero-rate.wav");
        std::fs::write(&path, wav_bytes_with_rate(0, 4410)).unwrap();

        match load_mono(&path, 22050) {
            Err(TranscriptionError::InvalidAudio { reason, .. }) => assert_eq!(reason, "zero sample rate"),
            other => panic!("expected InvalidAudio, got {other:?}"),
        }
    }

    #[test]
    fn test_audio_input_windows_have_model_length() {
        let audio = vec![0.1f32; 30000];
        let (windows, original_length) = get_audio_input(&audio, 7680, AUDIO_N_SAMPLES - 7680).unwrap();
        assert_eq!(original_length, 30000);
        assert!(!windows.is_empty());
        for window in &windows {
            assert_eq!(window.shape(), &[1, AUDIO_N_SAMPLES]);
        }
    }
}

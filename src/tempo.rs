//! Global tempo and beat grid estimation.
//!
//! Onset-strength envelope → autocorrelation tempo with a log-normal prior →
//! dynamic-programming beat tracking. Estimation never fails from the
//! caller's point of view: any error degrades to [`TempoEstimate::fallback`].

use std::path::Path;

use tracing::{debug, info, warn};

use crate::constants::{AUDIO_SAMPLE_RATE, DEFAULT_BPM};
use crate::error::{Result, TranscriptionError};
use crate::preprocessing::load_audio::{load_mono, resample};
use crate::spectral::Spectrogram;
use crate::types::TempoEstimate;

#[derive(Debug, Clone)]
pub struct TempoEstimator {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Centre of the tempo prior.
    pub prior_bpm: f64,
    /// Width of the tempo prior in octaves.
    pub prior_octaves: f64,
    /// How strongly the beat tracker holds to the estimated period.
    pub tightness: f64,
}

impl Default for TempoEstimator {
    fn default() -> Self {
        Self {
            sample_rate: AUDIO_SAMPLE_RATE as u32,
            n_fft: 1024,
            hop_length: 256,
            min_bpm: 60.0,
            max_bpm: 200.0,
            prior_bpm: DEFAULT_BPM,
            prior_octaves: 1.0,
            tightness: 100.0,
        }
    }
}

impl TempoEstimator {
    /// Estimate tempo and beats; degraded to 120 BPM with no beats on failure.
    pub fn estimate(&self, samples: &[f32], sample_rate: u32) -> TempoEstimate {
        match self.try_estimate(samples, sample_rate) {
            Ok(tempo) => {
                info!("Tempo: {:.1} BPM, {} beats", tempo.bpm, tempo.beat_times.len());
                tempo
            }
            Err(err) => {
                warn!("Tempo estimation failed, using {DEFAULT_BPM} BPM: {err}");
                TempoEstimate::fallback()
            }
        }
    }

    pub fn estimate_file(&self, path: &Path) -> TempoEstimate {
        match load_mono(path, self.sample_rate) {
            Ok(samples) => self.estimate(&samples, self.sample_rate),
            Err(err) => {
                warn!("Tempo estimation failed, using {DEFAULT_BPM} BPM: {err}");
                TempoEstimate::fallback()
            }
        }
    }

    pub fn try_estimate(&self, samples: &[f32], sample_rate: u32) -> Result<TempoEstimate> {
        if samples.is_empty() {
            return Err(TranscriptionError::DetectionFailed("no samples".into()));
        }
        let samples = resample(samples, sample_rate, self.sample_rate)?;
        let spec = Spectrogram::compute(&samples, self.sample_rate, self.n_fft, self.hop_length)?;
        let frame_rate = spec.frame_rate();

        let envelope = onset_envelope(&spec.onset_strength());
        if envelope.iter().all(|&v| v <= 0.0) {
            return Err(TranscriptionError::DetectionFailed("no onsets found".into()));
        }

        let period = self.estimate_period(&envelope, frame_rate)?;
        let bpm = 60.0 * frame_rate / period;
        debug!("Beat period {period:.2} frames ({bpm:.2} BPM)");

        let beats = track_beats(&envelope, period, self.tightness);
        let beat_times = beats.into_iter().map(|frame| spec.frame_time(frame)).collect();

        Ok(TempoEstimate::new(bpm, beat_times))
    }

    /// Beat period in frames: the autocorrelation lag with the best prior-weighted score.
    fn estimate_period(&self, envelope: &[f32], frame_rate: f64) -> Result<f64> {
        let min_lag = (60.0 * frame_rate / self.max_bpm).floor().max(1.0) as usize;
        let max_lag = (60.0 * frame_rate / self.min_bpm).ceil() as usize;
        if envelope.len() <= max_lag + 1 {
            return Err(TranscriptionError::DetectionFailed(format!(
                "signal too short for tempo analysis ({} frames)",
                envelope.len()
            )));
        }

        let ac = autocorrelation(envelope, max_lag + 1);
        if !(ac[0] > 0.0) {
            return Err(TranscriptionError::DetectionFailed("flat onset envelope".into()));
        }

        let scores: Vec<f64> = (0..=max_lag)
            .map(|lag| {
                if lag < min_lag || lag == 0 {
                    return 0.0;
                }
                let bpm = 60.0 * frame_rate / lag as f64;
                let octaves = (bpm / self.prior_bpm).log2() / self.prior_octaves;
                (ac[lag] / ac[0]).max(0.0) * (-0.5 * octaves * octaves).exp()
            })
            .collect();

        let best = (min_lag..=max_lag)
            .max_by(|&a, &b| scores[a].total_cmp(&scores[b]))
            .filter(|&lag| scores[lag] > 0.0)
            .ok_or_else(|| TranscriptionError::DetectionFailed("no periodicity in onset envelope".into()))?;

        Ok(interpolate_peak(&scores, best))
    }
}

/// Mean-removed, half-wave rectified and peak-normalised onset strength.
fn onset_envelope(strength: &[f32]) -> Vec<f32> {
    let mean = strength.iter().sum::<f32>() / strength.len().max(1) as f32;
    let rectified: Vec<f32> = strength.iter().map(|v| (v - mean).max(0.0)).collect();
    crate::spectral::normalize(&rectified)
}

fn autocorrelation(signal: &[f32], n_lags: usize) -> Vec<f64> {
    (0..n_lags.min(signal.len()))
        .map(|lag| {
            signal[..signal.len() - lag]
                .iter()
                .zip(&signal[lag..])
                .map(|(&a, &b)| a as f64 * b as f64)
                .sum()
        })
        .collect()
}

/// Parabolic interpolation of a peak position.
fn interpolate_peak(values: &[f64], peak_idx: usize) -> f64 {
    if peak_idx == 0 || peak_idx + 1 >= values.len() {
        return peak_idx as f64;
    }
    let (y0, y1, y2) = (values[peak_idx - 1], values[peak_idx], values[peak_idx + 1]);
    let denominator = 2.0 * (2.0 * y1 - y0 - y2);
    if denominator.abs() < 1e-12 {
        return peak_idx as f64;
    }
    peak_idx as f64 + ((y0 - y2) / denominator).clamp(-0.5, 0.5)
}

/// Dynamic-programming beat tracker.
///
/// Each frame's cumulative score is its smoothed onset strength plus the
/// best predecessor score within `[period / 2, 2 * period]` frames back,
/// penalised by `tightness * ln(interval / period)^2`.
fn track_beats(envelope: &[f32], period: f64, tightness: f64) -> Vec<usize> {
    let n = envelope.len();
    if n == 0 || !(period >= 1.0) {
        return Vec::new();
    }

    let local = smooth(envelope, period / 32.0);
    let mut cumulative = vec![0.0f64; n];
    let mut backlink: Vec<Option<usize>> = vec![None; n];

    let min_back = (period / 2.0).round().max(1.0) as usize;
    let max_back = (2.0 * period).round() as usize;

    for i in 0..n {
        let mut best: Option<(usize, f64)> = None;
        if i >= min_back {
            for prev in i.saturating_sub(max_back)..=i - min_back {
                let interval = (i - prev) as f64 / period;
                let score = cumulative[prev] - tightness * interval.ln().powi(2);
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((prev, score));
                }
            }
        }
        match best {
            Some((prev, score)) if score > 0.0 => {
                cumulative[i] = local[i] + score;
                backlink[i] = Some(prev);
            }
            _ => cumulative[i] = local[i],
        }
    }

    let Some(last) = last_beat(&cumulative) else {
        return Vec::new();
    };

    let mut beats = vec![last];
    let mut current = last;
    while let Some(prev) = backlink[current] {
        beats.push(prev);
        current = prev;
    }
    beats.reverse();

    trim_weak_beats(beats, &local)
}

/// Last local maximum of the cumulative score that reaches half the median local maximum.
fn last_beat(cumulative: &[f64]) -> Option<usize> {
    let n = cumulative.len();
    let maxima: Vec<usize> = (0..n)
        .filter(|&i| {
            let left = i == 0 || cumulative[i] > cumulative[i - 1];
            let right = i + 1 == n || cumulative[i] >= cumulative[i + 1];
            left && right && cumulative[i] > 0.0
        })
        .collect();
    if maxima.is_empty() {
        return None;
    }

    let mut values: Vec<f64> = maxima.iter().map(|&i| cumulative[i]).collect();
    values.sort_by(f64::total_cmp);
    let median = values[values.len() / 2];
    maxima.into_iter().rev().find(|&i| cumulative[i] >= 0.5 * median)
}

/// Drop leading and trailing beats on weak onsets.
fn trim_weak_beats(beats: Vec<usize>, local: &[f64]) -> Vec<usize> {
    if beats.is_empty() {
        return beats;
    }
    let rms = (beats.iter().map(|&b| local[b] * local[b]).sum::<f64>() / beats.len() as f64).sqrt();
    let threshold = 0.5 * rms;
    let first = beats.iter().position(|&b| local[b] >= threshold);
    let last = beats.iter().rposition(|&b| local[b] >= threshold);
    match (first, last) {
        (Some(first), Some(last)) => beats[first..=last].to_vec(),
        _ => Vec::new(),
    }
}

/// Gaussian smoothing with standard deviation `sigma` frames.
fn smooth(signal: &[f32], sigma: f64) -> Vec<f64> {
    let sigma = sigma.max(0.5);
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let n = signal.len() as isize;

    (0..n)
        .map(|i| {
            (-radius..=radius)
                .zip(&kernel)
                .filter_map(|(k, &w)| {
                    let j = i + k;
                    (0..n).contains(&j).then(|| signal[j as usize] as f64 * w)
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f64, seconds: f64, sample_rate: u32) -> Vec<f32> {
        let n = (seconds * sample_rate as f64) as usize;
        let period = 60.0 / bpm;
        let mut samples = vec![0.0f32; n];
        let mut t = 0.1;
        while t < seconds {
            let start = (t * sample_rate as f64) as usize;
            for (k, sample) in samples.iter_mut().skip(start).take(441).enumerate() {
                let decay = (-(k as f32) / 80.0).exp();
                *sample = decay * (2.0 * std::f32::consts::PI * 1500.0 * k as f32 / sample_rate as f32).sin();
            }
            t += period;
        }
        samples
    }

    #[test]
    fn test_click_track_tempo() {
        let estimator = TempoEstimator::default();
        let tempo = estimator.estimate(&click_track(100.0, 12.0, 22050), 22050);
        assert!(!tempo.degraded);
        assert!((tempo.bpm - 100.0).abs() < 3.0, "bpm {}", tempo.bpm);
        assert!(tempo.beat_times.len() >= 10);
        assert!(tempo.beat_times.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_silence_falls_back() {
        let tempo = TempoEstimator::default().estimate(&vec![0.0; 22050 * 3], 22050);
        assert_eq!(tempo.bpm, 120.0);
        assert!(tempo.beat_times.is_empty());
        assert!(tempo.degraded);
    }

    #[test]
    fn test_empty_and_missing_inputs_fall_back() {
        let estimator = TempoEstimator::default();
        assert_eq!(estimator.estimate(&[], 22050), TempoEstimate::fallback());
        assert_eq!(estimator.estimate_file(Path::new("/no/such/file.wav")), TempoEstimate::fallback());
    }

    #[test]
    fn test_zero_sample_rate_falls_back() {
        let estimator = TempoEstimator::default();
        assert_eq!(estimator.estimate(&[0.1; 22050], 0), TempoEstimate::fallback());

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("zero-rate.wav");
        std::fs::write(&path, crate::preprocessing::load_audio::tests::wav_bytes_with_rate(0, 22050)).unwrap();
        assert_eq!(estimator.estimate_file(&path), TempoEstimate::fallback());
    }

    #[test]
    fn test_interpolate_peak() {
        assert_eq!(interpolate_peak(&[0.0, 1.0, 0.0], 1), 1.0);
        assert!(interpolate_peak(&[0.0, 1.0, 1.0], 1) > 1.0);
    }

    #[test]
    fn test_beats_follow_impulses() {
        let mut envelope = vec![0.0f32; 400];
        for i in (20..400).step_by(40) {
            envelope[i] = 1.0;
        }
        let beats = track_beats(&envelope, 40.0, 100.0);
        assert!(beats.len() >= 8);
        assert!(beats.iter().all(|&b| {
            let phase = (b as i64 - 20).rem_euclid(40);
            phase <= 1 || phase >= 39
        }));
    }
}

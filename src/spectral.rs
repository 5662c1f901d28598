//! Spectral processing utilities (STFT, band flux, peak picking).
//!
//! Shared by the tempo estimator and the drum onset cascade. Frames are
//! centred: frame `t` covers `[t * hop - n_fft / 2, t * hop + n_fft / 2)`,
//! so frame times line up with onset times.

use ndarray::{Array2, ArrayView1};
use rustfft::{num_complex::Complex32, FftPlanner};

use crate::config::Band;
use crate::error::{Result, TranscriptionError};

/// Magnitude spectrogram shaped `(n_frames, n_fft / 2 + 1)`.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub magnitudes: Array2<f32>,
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}

impl Spectrogram {
    /// Centred, Hann-windowed STFT magnitudes of a mono signal.
    pub fn compute(samples: &[f32], sample_rate: u32, n_fft: usize, hop_length: usize) -> Result<Self> {
        if n_fft < 2 || hop_length == 0 {
            return Err(TranscriptionError::Config(format!(
                "invalid STFT geometry: n_fft {n_fft}, hop {hop_length}"
            )));
        }
        if samples.is_empty() {
            return Err(TranscriptionError::DetectionFailed("no samples to analyse".into()));
        }

        let pad = n_fft / 2;
        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let n_frames = 1 + samples.len() / hop_length;
        let n_bins = n_fft / 2 + 1;
        let window = hann_window(n_fft);

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);
        let mut magnitudes = Array2::<f32>::zeros((n_frames, n_bins));
        let mut buffer = vec![Complex32::new(0.0, 0.0); n_fft];

        for (frame_idx, mut row) in magnitudes.outer_iter_mut().enumerate() {
            let start = frame_idx * hop_length;
            let frame = &padded[start..start + n_fft];
            for ((slot, &sample), &win) in buffer.iter_mut().zip(frame).zip(&window) {
                *slot = Complex32::new(sample * win, 0.0);
            }
            fft.process(&mut buffer);
            for (out, value) in row.iter_mut().zip(&buffer[..n_bins]) {
                *out = value.norm();
            }
        }

        Ok(Self {
            magnitudes,
            sample_rate,
            n_fft,
            hop_length,
        })
    }

    pub fn n_frames(&self) -> usize {
        self.magnitudes.nrows()
    }

    /// Analysis frames per second.
    pub fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop_length as f64
    }

    pub fn frame_time(&self, frame: usize) -> f64 {
        frame as f64 / self.frame_rate()
    }

    /// Nearest frame to `seconds`, clamped to the spectrogram.
    pub fn time_to_frame(&self, seconds: f64) -> usize {
        let frame = (seconds.max(0.0) * self.frame_rate()).round() as usize;
        frame.min(self.n_frames().saturating_sub(1))
    }

    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.n_fft as f32
    }

    fn band_bins(&self, band: Band) -> std::ops::Range<usize> {
        let hz_per_bin = self.sample_rate as f32 / self.n_fft as f32;
        let n_bins = self.magnitudes.ncols();
        let low = ((band.low_hz / hz_per_bin).ceil().max(0.0) as usize).min(n_bins);
        let high = (((band.high_hz / hz_per_bin).floor().max(0.0) as usize) + 1).min(n_bins);
        low..high.max(low)
    }

    /// Half-wave rectified log-magnitude flux summed over the bins of `band`.
    pub fn band_flux(&self, band: Band) -> Vec<f32> {
        let bins = self.band_bins(band);
        let mut flux = vec![0.0; self.n_frames()];
        for t in 1..self.n_frames() {
            let current = self.magnitudes.row(t);
            let previous = self.magnitudes.row(t - 1);
            flux[t] = bins
                .clone()
                .map(|b| (current[b].ln_1p() - previous[b].ln_1p()).max(0.0))
                .sum();
        }
        flux
    }

    /// Flux over every bin.
    pub fn onset_strength(&self) -> Vec<f32> {
        self.band_flux(Band::new(0.0, self.sample_rate as f32 / 2.0))
    }

    /// Spectral energy of `band` at `frame`.
    pub fn band_energy(&self, band: Band, frame: usize) -> f32 {
        let row = self.magnitudes.row(frame.min(self.n_frames().saturating_sub(1)));
        self.band_bins(band).map(|b| row[b] * row[b]).sum()
    }

    /// Magnitude-weighted mean frequency of `band` at `frame`; 0 when silent.
    pub fn band_centroid(&self, band: Band, frame: usize) -> f32 {
        let row = self.magnitudes.row(frame.min(self.n_frames().saturating_sub(1)));
        centroid(row, self.band_bins(band), |b| self.bin_frequency(b))
    }
}

fn centroid(row: ArrayView1<f32>, bins: std::ops::Range<usize>, freq: impl Fn(usize) -> f32) -> f32 {
    let (weighted, total) = bins.fold((0.0f32, 0.0f32), |(weighted, total), b| {
        (weighted + freq(b) * row[b], total + row[b])
    });
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

/// Scale a non-negative envelope to a peak of 1. Silent input stays zero.
pub fn normalize(envelope: &[f32]) -> Vec<f32> {
    let max = envelope.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        envelope.iter().map(|v| v / max).collect()
    } else {
        vec![0.0; envelope.len()]
    }
}

/// Peak picking windows in frames, librosa style.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakPickParams {
    pub pre_max: usize,
    pub post_max: usize,
    pub pre_avg: usize,
    pub post_avg: usize,
    /// Margin above the local mean a peak must clear.
    pub delta: f32,
    /// Minimum frames between picked peaks.
    pub wait: usize,
}

impl PeakPickParams {
    /// The usual onset settings (30 ms max window, 100 ms mean window) at `frame_rate`.
    pub fn for_frame_rate(frame_rate: f64, delta: f32, wait_s: f64) -> Self {
        let frames = |seconds: f64| (seconds * frame_rate).round() as usize;
        Self {
            pre_max: frames(0.03).max(1),
            post_max: 1,
            pre_avg: frames(0.10).max(1),
            post_avg: frames(0.10).max(1) + 1,
            delta,
            wait: frames(wait_s),
        }
    }
}

/// Frames that are a local maximum, exceed the local mean by `delta` and
/// are at least `wait` frames after the previous pick.
pub fn pick_peaks(envelope: &[f32], params: &PeakPickParams) -> Vec<usize> {
    let n = envelope.len();
    let mut peaks = Vec::new();
    let mut last: Option<usize> = None;

    for i in 0..n {
        let value = envelope[i];
        if value <= 0.0 {
            continue;
        }

        let max_lo = i.saturating_sub(params.pre_max);
        let max_hi = (i + params.post_max).min(n - 1);
        let local_max = envelope[max_lo..=max_hi].iter().cloned().fold(f32::MIN, f32::max);
        if value < local_max {
            continue;
        }

        let avg_lo = i.saturating_sub(params.pre_avg);
        let avg_hi = (i + params.post_avg).min(n - 1);
        let window = &envelope[avg_lo..=avg_hi];
        let local_mean = window.iter().sum::<f32>() / window.len() as f32;
        if value < local_mean + params.delta {
            continue;
        }

        if last.is_some_and(|prev| i - prev <= params.wait) {
            continue;
        }
        peaks.push(i);
        last = Some(i);
    }

    peaks
}

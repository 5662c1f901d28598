//! Multi-band drum onset detection and classification.
//!
//! Drums carry no pitch, so hits are found per frequency band and told apart
//! by spectral and temporal shape. The cascade runs from the least ambiguous
//! class (kick) to the noisiest (cymbals); each stage drops onsets that an
//! earlier stage already claimed within the dedup tolerance.

use tracing::debug;

use crate::config::{Band, DrumParams, TrackParams};
use crate::constants::DRUM_SAMPLE_RATE;
use crate::error::{Result, TranscriptionError};
use crate::spectral::{normalize, pick_peaks, PeakPickParams, Spectrogram};
use crate::types::Note;

use super::NoteDetector;

/// The drum vocabulary, with General MIDI percussion keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrumKind {
    Kick,
    Snare,
    ClosedHiHat,
    OpenHiHat,
    LowTom,
    MidTom,
    HighTom,
    Crash,
    Ride,
}

impl DrumKind {
    pub fn gm_pitch(self) -> u8 {
        match self {
            DrumKind::Kick => 36,
            DrumKind::Snare => 38,
            DrumKind::ClosedHiHat => 42,
            DrumKind::OpenHiHat => 46,
            DrumKind::LowTom => 41,
            DrumKind::MidTom => 45,
            DrumKind::HighTom => 48,
            DrumKind::Crash => 49,
            DrumKind::Ride => 51,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrumHit {
    pub time: f64,
    pub kind: DrumKind,
    /// Normalised onset strength in [0, 1].
    pub strength: f32,
}

impl DrumHit {
    pub fn to_note(self, duration: f64) -> Note {
        let velocity = (50.0 + 77.0 * self.strength.clamp(0.0, 1.0)).round() as u8;
        Note::new(self.kind.gm_pitch(), self.time, self.time + duration, velocity)
    }
}

#[derive(Debug, Clone, Copy)]
struct BandOnset {
    frame: usize,
    time: f64,
    strength: f32,
}

pub fn classify_tom(centroid_hz: f32, params: &DrumParams) -> DrumKind {
    if centroid_hz < params.tom_low_centroid_hz {
        DrumKind::LowTom
    } else if centroid_hz < params.tom_mid_centroid_hz {
        DrumKind::MidTom
    } else {
        DrumKind::HighTom
    }
}

pub fn classify_hihat(decay_s: f64, params: &DrumParams) -> DrumKind {
    if decay_s > params.open_hihat_decay_s {
        DrumKind::OpenHiHat
    } else {
        DrumKind::ClosedHiHat
    }
}

pub fn classify_cymbal(peak_amplitude: f32, params: &DrumParams) -> DrumKind {
    if peak_amplitude >= params.crash_attack_threshold {
        DrumKind::Crash
    } else {
        DrumKind::Ride
    }
}

/// Seconds from the energy peak until the energy first falls below half of
/// it. Energy that never decays within the window reports the whole
/// remaining window.
pub fn decay_to_half(energies: &[f32], frame_duration: f64) -> f64 {
    if energies.is_empty() {
        return 0.0;
    }
    // first frame holding the maximum
    let peak_idx = (1..energies.len()).fold(0, |best, i| if energies[i] > energies[best] { i } else { best });
    let peak = energies[peak_idx];
    if peak <= 0.0 {
        return 0.0;
    }
    let frames = energies[peak_idx..]
        .iter()
        .position(|&e| e < peak / 2.0)
        .unwrap_or(energies.len() - peak_idx);
    frames as f64 * frame_duration
}

/// Largest absolute sample in `samples[start..start + len]`.
pub fn peak_amplitude(samples: &[f32], start: usize, len: usize) -> f32 {
    let start = start.min(samples.len());
    let end = start.saturating_add(len).min(samples.len());
    samples[start..end].iter().fold(0.0f32, |max, s| max.max(s.abs()))
}

/// Add the candidates that are not within `tolerance` seconds of any hit
/// accepted so far, including earlier candidates of the same stage.
pub fn accept_unique(accepted: Vec<DrumHit>, candidates: impl IntoIterator<Item = DrumHit>, tolerance: f64) -> Vec<DrumHit> {
    candidates.into_iter().fold(accepted, |mut hits, candidate| {
        if hits.iter().all(|hit| (hit.time - candidate.time).abs() > tolerance) {
            hits.push(candidate);
        }
        hits
    })
}

pub struct DrumOnsetDetector {
    pub params: DrumParams,
}

impl DrumOnsetDetector {
    pub fn new(params: DrumParams) -> Self {
        Self { params }
    }

    /// Peak-picked onsets of one band; none when the band is near silent
    /// relative to the full spectrum.
    fn band_onsets(&self, spec: &Spectrogram, band: Band, delta: f32, full_peak: f32) -> Vec<BandOnset> {
        let flux = spec.band_flux(band);
        let band_peak = flux.iter().cloned().fold(0.0f32, f32::max);
        if band_peak <= 0.0 || band_peak < self.params.min_band_flux_ratio * full_peak {
            return Vec::new();
        }
        let envelope = normalize(&flux);
        let peak_params = PeakPickParams::for_frame_rate(spec.frame_rate(), delta, self.params.refractory_s);
        pick_peaks(&envelope, &peak_params)
            .into_iter()
            .map(|frame| BandOnset {
                frame,
                time: spec.frame_time(frame),
                strength: envelope[frame],
            })
            .collect()
    }

    /// Run the cascade and return classified hits in time order.
    pub fn detect_hits(&self, samples: &[f32]) -> Result<Vec<DrumHit>> {
        if samples.is_empty() {
            return Err(TranscriptionError::DetectionFailed("no audio samples".into()));
        }
        let p = &self.params;
        let spec = Spectrogram::compute(samples, DRUM_SAMPLE_RATE as u32, p.n_fft, p.hop_length)?;
        let full_peak = spec.onset_strength().into_iter().fold(0.0f32, f32::max);
        if full_peak <= 0.0 {
            return Ok(Vec::new());
        }

        let hit = |onset: &BandOnset, kind: DrumKind| DrumHit {
            time: onset.time,
            kind,
            strength: onset.strength,
        };

        // kick
        let kicks: Vec<DrumHit> = self
            .band_onsets(&spec, p.kick_band, p.kick_delta, full_peak)
            .iter()
            .map(|o| hit(o, DrumKind::Kick))
            .collect();
        let hits = accept_unique(Vec::new(), kicks, p.dedup_tolerance_s);

        // snare: body onset confirmed by a snap onset
        let snaps = self.band_onsets(&spec, p.snare_snap_band, p.snare_delta, full_peak);
        let snares: Vec<DrumHit> = self
            .band_onsets(&spec, p.snare_body_band, p.snare_delta, full_peak)
            .iter()
            .filter(|body| snaps.iter().any(|snap| (snap.time - body.time).abs() <= p.dedup_tolerance_s))
            .map(|o| hit(o, DrumKind::Snare))
            .collect();
        let hits = accept_unique(hits, snares, p.dedup_tolerance_s);

        // toms by spectral centroid
        let toms: Vec<DrumHit> = self
            .band_onsets(&spec, p.tom_band, p.tom_delta, full_peak)
            .iter()
            .map(|o| hit(o, classify_tom(spec.band_centroid(p.tom_band, o.frame), p)))
            .collect();
        let hits = accept_unique(hits, toms, p.dedup_tolerance_s);

        // hi-hat by decay time
        let decay_frames = ((p.decay_window_s * spec.frame_rate()).round() as usize).max(1);
        let frame_duration = 1.0 / spec.frame_rate();
        let hihats: Vec<DrumHit> = self
            .band_onsets(&spec, p.hihat_band, p.hihat_delta, full_peak)
            .iter()
            .map(|o| {
                let end = (o.frame + decay_frames).min(spec.n_frames());
                let energies: Vec<f32> = (o.frame..end).map(|f| spec.band_energy(p.hihat_band, f)).collect();
                hit(o, classify_hihat(decay_to_half(&energies, frame_duration), p))
            })
            .collect();
        let hits = accept_unique(hits, hihats, p.fast_dedup_tolerance_s);

        // crash or ride by attack amplitude
        let attack_len = (p.attack_window_s * DRUM_SAMPLE_RATE as f64).round() as usize;
        let cymbals: Vec<DrumHit> = self
            .band_onsets(&spec, p.cymbal_band, p.cymbal_delta, full_peak)
            .iter()
            .map(|o| {
                let start = (o.time * DRUM_SAMPLE_RATE as f64).round() as usize;
                hit(o, classify_cymbal(peak_amplitude(samples, start, attack_len), p))
            })
            .collect();
        let mut hits = accept_unique(hits, cymbals, p.dedup_tolerance_s);

        hits.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(hits)
    }
}

impl NoteDetector for DrumOnsetDetector {
    fn name(&self) -> &'static str {
        "drum-onsets"
    }

    fn sample_rate(&self) -> u32 {
        DRUM_SAMPLE_RATE as u32
    }

    fn detect(&self, samples: &[f32], _params: &TrackParams) -> Result<Vec<Note>> {
        let hits = self.detect_hits(samples)?;
        debug!("Drum cascade: {} hits", hits.len());
        Ok(hits
            .into_iter()
            .map(|hit| hit.to_note(self.params.hit_duration_s))
            .collect())
    }
}

//! Single-voice melody tracking with probabilistic YIN.

use pyin::{Framing, PYINExecutor, PadMode};
use tracing::debug;

use crate::config::{MonophonicParams, TrackParams};
use crate::error::{Result, TranscriptionError};
use crate::postprocessing::helpers::ported::librosa::hz_to_midi_f64;
use crate::types::Note;

use super::NoteDetector;

/// One analysis frame of the f0 track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchFrame {
    pub time: f64,
    /// NaN when unvoiced.
    pub f0_hz: f64,
    pub voiced: bool,
    pub voiced_probability: f64,
}

pub struct MonophonicPitchDetector {
    pub params: MonophonicParams,
}

impl MonophonicPitchDetector {
    pub fn new(params: MonophonicParams) -> Self {
        Self { params }
    }

    /// Run pYIN over `samples` (already at the tracker rate).
    pub fn track(&self, samples: &[f32], fmin_hz: f64, fmax_hz: f64) -> Vec<PitchFrame> {
        let wav: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        let mut executor = PYINExecutor::new(
            fmin_hz,
            fmax_hz,
            self.params.sample_rate,
            self.params.frame_length,
            None,
            Some(self.params.hop_length),
            None,
        );
        let (timestamps, f0, voiced_flag, voiced_prob) =
            executor.pyin(&wav, f64::NAN, Framing::Center(PadMode::Constant(0.)));

        timestamps
            .iter()
            .zip(f0.iter())
            .zip(voiced_flag.iter())
            .zip(voiced_prob.iter())
            .map(|(((&time, &f0_hz), &voiced), &voiced_probability)| PitchFrame {
                time,
                f0_hz,
                voiced,
                voiced_probability,
            })
            .collect()
    }
}

impl NoteDetector for MonophonicPitchDetector {
    fn name(&self) -> &'static str {
        "monophonic"
    }

    fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    fn detect(&self, samples: &[f32], params: &TrackParams) -> Result<Vec<Note>> {
        if samples.len() < self.params.frame_length / 2 {
            return Err(TranscriptionError::DetectionFailed(format!(
                "{} samples is too short for pitch tracking",
                samples.len()
            )));
        }

        let frames = self.track(samples, params.min_frequency_hz as f64, params.max_frequency_hz as f64);
        let voiced = frames.iter().filter(|f| f.voiced).count();
        let notes = frames_to_notes(&frames, &self.params, params.min_note_length_ms as f64 / 1000.0);
        debug!("Pitch track: {} frames, {} voiced, {} notes", frames.len(), voiced, notes.len());
        Ok(notes)
    }
}

#[derive(Debug)]
struct Segment {
    pitch: i32,
    start: f64,
    end: f64,
    pitches: Vec<f64>,
    probabilities: Vec<f64>,
    gap_start: Option<f64>,
}

impl Segment {
    fn open(time: f64, midi: f64, probability: f64) -> Self {
        Self {
            pitch: midi.round() as i32,
            start: time,
            end: time,
            pitches: vec![midi],
            probabilities: vec![probability],
            gap_start: None,
        }
    }

    fn extend(&mut self, time: f64, midi: f64, probability: f64) {
        self.pitches.push(midi);
        self.probabilities.push(probability);
        self.end = time;
        self.gap_start = None;
    }

    /// Mean pitch and probability; `None` when shorter than `min_duration`.
    fn finish(self, min_duration: f64) -> Option<Note> {
        let duration = self.end - self.start;
        if duration < min_duration || duration <= 0.0 {
            return None;
        }
        let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
        let pitch = mean(&self.pitches).round().clamp(0.0, 127.0) as u8;
        let confidence = mean(&self.probabilities);
        let velocity = ((confidence * 100.0) as i32).clamp(40, 127) as u8;
        Some(Note::new(pitch, self.start, self.end, velocity).with_confidence(confidence as f32))
    }
}

/// Segment an f0 track into notes.
///
/// Frames that are unvoiced, or below the voiced-probability threshold, are
/// gaps. A note continues while the rounded pitch stays within
/// `pitch_tolerance` semitones of where it started and no gap grows beyond
/// `gap_tolerance_s`. Consecutive same-pitch notes separated by at most the gap
/// tolerance are merged afterwards, keeping the louder velocity.
pub fn frames_to_notes(frames: &[PitchFrame], params: &MonophonicParams, min_duration: f64) -> Vec<Note> {
    let mut notes = Vec::new();
    let mut current: Option<Segment> = None;
    let mut previous_time: Option<f64> = None;

    for frame in frames {
        let valid = frame.voiced
            && frame.f0_hz.is_finite()
            && frame.f0_hz > 0.0
            && frame.voiced_probability.is_finite()
            && frame.voiced_probability >= params.voiced_threshold;

        if !valid {
            let gap_exceeded = match current.as_mut() {
                Some(segment) => match segment.gap_start {
                    None => {
                        segment.gap_start = Some(frame.time);
                        segment.end = previous_time.unwrap_or(frame.time).max(segment.end);
                        false
                    }
                    Some(gap_start) => frame.time - gap_start > params.gap_tolerance_s,
                },
                None => false,
            };
            if gap_exceeded {
                notes.extend(current.take().and_then(|s| s.finish(min_duration)));
            }
            previous_time = Some(frame.time);
            continue;
        }

        let midi = hz_to_midi_f64(frame.f0_hz);
        match current.as_mut() {
            Some(segment) if (midi.round() as i32 - segment.pitch).abs() <= params.pitch_tolerance => {
                segment.extend(frame.time, midi, frame.voiced_probability);
            }
            _ => {
                notes.extend(current.take().and_then(|s| s.finish(min_duration)));
                current = Some(Segment::open(frame.time, midi, frame.voiced_probability));
            }
        }
        previous_time = Some(frame.time);
    }

    notes.extend(current.and_then(|s| s.finish(min_duration)));

    merge_adjacent(notes, params.gap_tolerance_s)
}

/// Join each note to the one directly before it when they share a pitch and
/// the gap between them is within `gap_tolerance_s`. Expects time order.
fn merge_adjacent(notes: Vec<Note>, gap_tolerance_s: f64) -> Vec<Note> {
    notes.into_iter().fold(Vec::new(), |mut merged: Vec<Note>, note| {
        match merged.last_mut() {
            Some(last) if last.pitch == note.pitch && note.start - last.end <= gap_tolerance_s => {
                last.end = last.end.max(note.end);
                last.velocity = last.velocity.max(note.velocity);
                last.confidence = match (last.confidence, note.confidence) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            }
            _ => merged.push(note),
        }
        merged
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOP: f64 = 128.0 / 22050.0;

    fn frames(hz: &[f64]) -> Vec<PitchFrame> {
        hz.iter()
            .enumerate()
            .map(|(i, &f0_hz)| PitchFrame {
                time: i as f64 * HOP,
                f0_hz,
                voiced: f0_hz > 0.0,
                voiced_probability: if f0_hz > 0.0 { 0.9 } else { 0.0 },
            })
            .collect()
    }

    fn params() -> MonophonicParams {
        MonophonicParams::default()
    }

    #[test]
    fn test_vibrato_stays_one_note() {
        // A4 wobbling about a quarter tone
        let track: Vec<f64> = (0..60).map(|i| if i % 2 == 0 { 440.0 } else { 452.0 }).collect();
        let notes = frames_to_notes(&frames(&track), &params(), 0.02);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 69);
        assert_eq!(notes[0].velocity, 90);
        assert!(notes[0].end > notes[0].start);
    }

    #[test]
    fn test_short_gap_is_bridged() {
        let mut track = vec![440.0; 20];
        track.extend([0.0; 4]);
        track.extend([440.0; 20]);
        let notes = frames_to_notes(&frames(&track), &params(), 0.02);
        assert_eq!(notes.len(), 1);
        assert!((notes[0].end - 43.0 * HOP).abs() < 1e-9);
    }

    #[test]
    fn test_long_gap_splits_and_pitch_change_splits() {
        let mut track = vec![440.0; 20];
        track.extend([0.0; 20]);
        track.extend([440.0; 20]);
        track.extend([523.25; 20]);
        let notes = frames_to_notes(&frames(&track), &params(), 0.02);
        let pitches: Vec<u8> = notes.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![69, 69, 72]);
    }

    #[test]
    fn test_interleaved_pitch_is_not_merged_across() {
        let mut track = vec![440.0; 20];
        track.extend([523.25; 6]);
        track.extend([440.0; 20]);
        let notes = frames_to_notes(&frames(&track), &params(), 0.02);

        let pitches: Vec<u8> = notes.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![69, 72, 69]);
        for pair in notes.windows(2) {
            assert!(pair[1].start >= pair[0].end, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_dropped_blip_rejoins_its_neighbours() {
        // two frames of C5 are too short to keep; the A4 either side closes up
        let mut track = vec![440.0; 20];
        track.extend([523.25; 2]);
        track.extend([440.0; 20]);
        let notes = frames_to_notes(&frames(&track), &params(), 0.02);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 69);
    }

    #[test]
    fn test_short_blips_are_dropped() {
        let mut track = vec![0.0; 10];
        track.extend([440.0; 2]);
        track.extend([0.0; 30]);
        assert!(frames_to_notes(&frames(&track), &params(), 0.02).is_empty());
    }

    #[test]
    fn test_low_probability_frames_are_gaps() {
        let mut track = frames(&[440.0; 30]);
        for frame in &mut track {
            frame.voiced_probability = 0.01;
        }
        assert!(frames_to_notes(&track, &params(), 0.02).is_empty());
    }

    #[test]
    fn test_velocity_floor() {
        let mut track = frames(&[440.0; 30]);
        for frame in &mut track {
            frame.voiced_probability = 0.1;
        }
        let notes = frames_to_notes(&track, &params(), 0.02);
        assert_eq!(notes[0].velocity, 40);
        assert_eq!(notes[0].confidence, Some(0.1));
    }

    #[test]
    fn test_too_short_input_is_an_error() {
        let detector = MonophonicPitchDetector::new(params());
        let err = detector.detect(&[], &crate::config::ParamsTable::VOCALS).unwrap_err();
        assert!(matches!(err, TranscriptionError::DetectionFailed(_)));
    }
}

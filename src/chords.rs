//! Chord progression estimation by windowed pitch-class voting.
//!
//! A template-matching heuristic: each window's notes vote for their pitch
//! classes (weighted by velocity) and the best-scoring root/quality template
//! names the window. Passing tones and sparse voicings can mislead it.

use crate::types::{ChordEvent, Note};

pub const PITCH_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Chord qualities as (label suffix, semitones above the root), in match order.
pub const CHORD_TEMPLATES: [(&str, &[usize]); 8] = [
    ("", &[0, 4, 7]),
    ("m", &[0, 3, 7]),
    ("7", &[0, 4, 7, 10]),
    ("M7", &[0, 4, 7, 11]),
    ("m7", &[0, 3, 7, 10]),
    ("dim", &[0, 3, 6]),
    ("aug", &[0, 4, 8]),
    ("sus4", &[0, 5, 7]),
];

pub const DEFAULT_WINDOW_S: f64 = 0.5;

/// Velocity-weighted pitch-class votes of the notes overlapping `[start, end)`.
pub fn pitch_class_votes(notes: &[Note], start: f64, end: f64) -> [u32; 12] {
    notes
        .iter()
        .filter(|note| note.start < end && note.end > start)
        .fold([0u32; 12], |mut votes, note| {
            votes[note.pitch_class()] += note.velocity as u32;
            votes
        })
}

/// Best `(root, quality)` label for the votes, `None` when nothing scores.
///
/// Roots are tried in chromatic order from C and qualities in
/// [`CHORD_TEMPLATES`] order; a later candidate must score strictly higher
/// to win, so ties go to the first one seen.
pub fn best_chord(votes: &[u32; 12]) -> Option<String> {
    let mut best: Option<(u32, usize, &str)> = None;
    for root in 0..12 {
        for (suffix, intervals) in CHORD_TEMPLATES {
            let score: u32 = intervals.iter().map(|interval| votes[(root + interval) % 12]).sum();
            if score > best.map_or(0, |(s, _, _)| s) {
                best = Some((score, root, suffix));
            }
        }
    }
    best.map(|(_, root, suffix)| format!("{}{}", PITCH_NAMES[root], suffix))
}

/// Chord timeline over `[0, max note end]` in non-overlapping windows.
///
/// Consecutive windows with the same label produce one event at the first
/// window's start; windows without a scoring chord emit nothing.
pub fn estimate_chords(notes: &[Note], window_s: f64) -> Vec<ChordEvent> {
    if notes.is_empty() || !(window_s > 0.0) {
        return Vec::new();
    }
    let end_time = notes.iter().map(|n| n.end).fold(f64::MIN, f64::max);

    let mut chords: Vec<ChordEvent> = Vec::new();
    let mut index = 0usize;
    loop {
        let start = index as f64 * window_s;
        if start >= end_time {
            break;
        }
        let votes = pitch_class_votes(notes, start, start + window_s);
        if let Some(label) = best_chord(&votes) {
            if chords.last().map_or(true, |last| last.label != label) {
                chords.push(ChordEvent {
                    time: (start * 100.0).round() / 100.0,
                    label,
                });
            }
        }
        index += 1;
    }
    chords
}

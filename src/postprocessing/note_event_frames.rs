use crate::config::TrackParams;
use crate::constants::{AUDIO_SAMPLE_RATE, FFT_HOP, MAX_FREQ_IDX, MIDI_OFFSET};

use super::helpers::{
    helpers::{constrain_frequency, get_inferred_onsets},
    ported::numpy::{arg_max, arg_rel_max, global_max, where_greater_than_axis1},
};

#[derive(Debug, Clone, PartialEq)]
pub struct NoteEventFrame {
    pub start_frame: usize,
    pub duration_frames: usize,
    pub pitch_midi: usize,
    pub amplitude: f32,
}

/// Decoder settings for turning activations into notes.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Minimum amplitude of an onset activation to be considered an onset.
    pub onset_thresh: f32,
    /// Minimum amplitude of a frame activation for a note to remain "on".
    /// Negative values are treated as zero.
    pub frame_thresh: f32,
    /// Minimum allowed note length in frames.
    pub min_note_len: usize,
    /// Add onsets where frame amplitudes jump.
    pub infer_onsets: bool,
    pub max_freq: Option<f32>,
    pub min_freq: Option<f32>,
    /// Recover notes that have energy but no onset.
    pub melodia_trick: bool,
    /// Number of frames allowed to drop below the frame threshold.
    pub energy_tolerance: usize,
}

impl DecodeOptions {
    pub fn from_params(params: &TrackParams) -> Self {
        let frames_per_ms = AUDIO_SAMPLE_RATE as f32 / FFT_HOP as f32 / 1000.0;
        Self {
            onset_thresh: params.onset_threshold,
            frame_thresh: params.frame_threshold,
            min_note_len: (params.min_note_length_ms * frames_per_ms).round() as usize,
            infer_onsets: true,
            max_freq: Some(params.max_frequency_hz),
            min_freq: Some(params.min_frequency_hz),
            melodia_trick: true,
            energy_tolerance: params.energy_tolerance_frames,
        }
    }
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            onset_thresh: 0.5,
            frame_thresh: 0.3,
            min_note_len: 11,
            infer_onsets: true,
            max_freq: None,
            min_freq: None,
            melodia_trick: true,
            energy_tolerance: 11,
        }
    }
}

/// Clear `freq_idx` and its neighbours from the remaining-energy matrix at frame `i`.
fn clear_energy(remaining_energy: &mut [Vec<f32>], i: usize, freq_idx: usize) {
    let row = &mut remaining_energy[i];
    row[freq_idx] = 0.0;
    if freq_idx < MAX_FREQ_IDX && freq_idx + 1 < row.len() {
        row[freq_idx + 1] = 0.0;
    }
    if freq_idx > 0 {
        row[freq_idx - 1] = 0.0;
    }
}

fn mean_amplitude(frames: &[Vec<f32>], start: usize, end: usize, freq_idx: usize) -> f32 {
    if end <= start {
        return 0.0;
    }
    frames[start..end].iter().map(|row| row[freq_idx]).sum::<f32>() / (end - start) as f32
}

/// Decode frame and onset activations `(n_times, n_freqs)` into polyphonic note events.
///
/// Amplitudes are mean frame activations in `[0, 1]`.
pub fn output_to_notes_poly(
    mut frames: Vec<Vec<f32>>,
    mut onsets: Vec<Vec<f32>>,
    options: &DecodeOptions,
) -> Vec<NoteEventFrame> {
    let n_frames = frames.len();
    if n_frames < 2 || onsets.len() != n_frames {
        return Vec::new();
    }

    // the leftover-energy sweep only ends once every cell is at or below this
    let frame_thresh = options.frame_thresh.max(0.0);

    constrain_frequency(&mut onsets, &mut frames, options.max_freq, options.min_freq);

    let inferred_onsets = if options.infer_onsets {
        get_inferred_onsets(&onsets, &frames, 2)
    } else {
        onsets
    };

    let mut peak_threshold_matrix: Vec<Vec<f32>> = inferred_onsets.iter().map(|o| vec![0.0; o.len()]).collect();
    for (row, col) in arg_rel_max(&inferred_onsets, 2) {
        peak_threshold_matrix[row][col] = inferred_onsets[row][col];
    }

    let (note_starts, freq_idxs) = where_greater_than_axis1(&peak_threshold_matrix, options.onset_thresh);

    let mut remaining_energy = frames.clone();

    // Latest onsets first, so earlier notes cannot swallow later ones' energy.
    let mut note_events: Vec<NoteEventFrame> = note_starts
        .iter()
        .zip(freq_idxs.iter())
        .rev()
        .filter_map(|(&note_start_idx, &freq_idx)| {
            if note_start_idx >= n_frames - 1 {
                return None;
            }

            // find where the energy at this pitch drops below the threshold for long enough
            let mut i = note_start_idx + 1;
            let mut k = 0;
            while i < n_frames - 1 && k < options.energy_tolerance {
                if remaining_energy[i][freq_idx] < frame_thresh {
                    k += 1;
                } else {
                    k = 0;
                }
                i += 1;
            }
            i -= k;

            if i - note_start_idx <= options.min_note_len {
                return None;
            }

            for j in note_start_idx..i {
                clear_energy(&mut remaining_energy, j, freq_idx);
            }

            Some(NoteEventFrame {
                start_frame: note_start_idx,
                duration_frames: i - note_start_idx,
                pitch_midi: freq_idx + MIDI_OFFSET,
                amplitude: mean_amplitude(&frames, note_start_idx, i, freq_idx),
            })
        })
        .collect();

    if options.melodia_trick {
        note_events.extend(melodia_notes(&frames, &mut remaining_energy, frame_thresh, options));
    }

    note_events
}

/// Walk outwards from the strongest leftover energy peaks to recover notes
/// whose onsets were missed.
fn melodia_notes(
    frames: &[Vec<f32>],
    remaining_energy: &mut [Vec<f32>],
    frame_thresh: f32,
    options: &DecodeOptions,
) -> Vec<NoteEventFrame> {
    let n_frames = frames.len();
    let mut notes = Vec::new();

    while global_max(remaining_energy) > frame_thresh {
        let Some((i_mid, freq_idx)) = strongest_cell(remaining_energy) else {
            break;
        };
        remaining_energy[i_mid][freq_idx] = 0.0;

        // forward pass
        let mut i = i_mid + 1;
        let mut k = 0;
        while i < n_frames - 1 && k < options.energy_tolerance {
            if remaining_energy[i][freq_idx] < frame_thresh {
                k += 1;
            } else {
                k = 0;
            }
            clear_energy(remaining_energy, i, freq_idx);
            i += 1;
        }
        let i_end = (i - 1 - k).max(i_mid);

        // backward pass
        let mut i_start = i_mid;
        if i_mid > 0 {
            let mut i = i_mid - 1;
            let mut k = 0;
            while i > 0 && k < options.energy_tolerance {
                if remaining_energy[i][freq_idx] < frame_thresh {
                    k += 1;
                } else {
                    k = 0;
                }
                clear_energy(remaining_energy, i, freq_idx);
                i -= 1;
            }
            i_start = (i + 1 + k).min(i_mid);
        }

        if i_end <= i_start || i_end - i_start <= options.min_note_len {
            // too short; its energy is already cleared
            continue;
        }

        notes.push(NoteEventFrame {
            start_frame: i_start,
            duration_frames: i_end - i_start,
            pitch_midi: freq_idx + MIDI_OFFSET,
            amplitude: mean_amplitude(frames, i_start, i_end, freq_idx),
        });
    }

    notes
}

fn strongest_cell(energy: &[Vec<f32>]) -> Option<(usize, usize)> {
    energy
        .iter()
        .enumerate()
        .filter_map(|(row_idx, row)| arg_max(row).map(|col| (row_idx, col, row[col])))
        .fold(None, |best: Option<(usize, usize, f32)>, cell| match best {
            Some(b) if cell.2 <= b.2 => Some(b),
            _ => Some(cell),
        })
        .map(|(row, col, _)| (row, col))
}

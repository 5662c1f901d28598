use crate::constants::MIDI_OFFSET;
use crate::postprocessing::helpers::ported::numpy::{global_max, max_3d_for_axis0, min_3d_for_axis0};

use super::ported::librosa::hz_to_midi;

/// Column index of the note bin closest to `hz`, clamped to `[0, n_bins]`.
fn freq_to_bin(hz: f32, n_bins: usize) -> usize {
    let idx = (hz_to_midi(hz) - MIDI_OFFSET as f32).round();
    if idx <= 0.0 {
        0
    } else {
        (idx as usize).min(n_bins)
    }
}

/// Zero the onset and frame activations outside `[min_freq, max_freq]`.
///
/// Applied before decoding, so out-of-range pitches can never start a note.
pub fn constrain_frequency(
    onsets: &mut [Vec<f32>],
    frames: &mut [Vec<f32>],
    max_freq: Option<f32>,
    min_freq: Option<f32>,
) {
    let n_bins = frames.first().map_or(0, Vec::len);
    let max_idx = max_freq.map_or(n_bins, |hz| freq_to_bin(hz, n_bins));
    let min_idx = min_freq.map_or(0, |hz| freq_to_bin(hz, n_bins));

    for row in onsets.iter_mut().chain(frames.iter_mut()) {
        let len = row.len();
        row[max_idx.min(len)..].fill(0.0);
        row[..min_idx.min(len)].fill(0.0);
    }
}

/// Infer onsets from large changes in frame amplitudes.
///
/// The positive `n_diff`-step frame differences are rescaled to the onset
/// maximum and combined with the predicted onsets by element-wise max.
pub fn get_inferred_onsets(onsets: &[Vec<f32>], frames: &[Vec<f32>], n_diff: usize) -> Vec<Vec<f32>> {
    let n_cols = frames.first().map_or(0, Vec::len);
    if frames.is_empty() || n_diff == 0 {
        return onsets.to_vec();
    }

    let diffs: Vec<Vec<Vec<f32>>> = (1..=n_diff)
        .map(|n| {
            (0..frames.len())
                .map(|t| {
                    let current = &frames[t];
                    match t.checked_sub(n) {
                        Some(prev) => current.iter().zip(&frames[prev]).map(|(a, b)| a - b).collect(),
                        None => current.clone(),
                    }
                })
                .collect()
        })
        .collect();

    let mut frame_diff = min_3d_for_axis0(&diffs);

    for (t, row) in frame_diff.iter_mut().enumerate() {
        if t < n_diff {
            row.fill(0.0);
        } else {
            row.iter_mut().for_each(|v| *v = v.max(0.0));
        }
    }

    let onset_max = global_max(onsets);
    let frame_diff_max = global_max(&frame_diff);
    if frame_diff_max > 0.0 {
        let scale = onset_max / frame_diff_max;
        frame_diff.iter_mut().flatten().for_each(|v| *v *= scale);
    }

    debug_assert!(frame_diff.iter().all(|row| row.len() == n_cols));
    max_3d_for_axis0(&[onsets.to_vec(), frame_diff])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constrain_frequency_zeroes_outside_band() {
        let mut onsets = vec![vec![1.0; 88]; 2];
        let mut frames = vec![vec![1.0; 88]; 2];
        // A2 (110 Hz) is bin 24, A3 (220 Hz) is bin 36
        constrain_frequency(&mut onsets, &mut frames, Some(220.0), Some(110.0));
        for row in onsets.iter().chain(frames.iter()) {
            assert_eq!(row[23], 0.0);
            assert_eq!(row[24], 1.0);
            assert_eq!(row[35], 1.0);
            assert_eq!(row[36], 0.0);
        }
    }

    #[test]
    fn test_constrain_frequency_below_piano_range() {
        let mut onsets = vec![vec![1.0; 88]];
        let mut frames = vec![vec![1.0; 88]];
        constrain_frequency(&mut onsets, &mut frames, None, Some(20.0));
        assert_eq!(frames[0][0], 1.0);
    }

    #[test]
    fn test_inferred_onsets_pick_up_frame_jumps() {
        let onsets = vec![vec![0.0, 0.0], vec![0.0, 0.0], vec![0.0, 0.8], vec![0.0, 0.0]];
        let frames = vec![vec![0.0, 0.0], vec![0.0, 0.0], vec![0.0, 0.0], vec![0.9, 0.0]];
        let inferred = get_inferred_onsets(&onsets, &frames, 2);
        assert!((inferred[3][0] - 0.8).abs() < 1e-6);
        assert_eq!(inferred[2][1], 0.8);
    }
}

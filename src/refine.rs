//! Shared post-processing for pitched tracks: confidence filter, beat-grid
//! quantization and same-pitch fragment merging, applied in that order.

use crate::config::TrackParams;
use crate::types::Note;

/// How merged fragments combine their velocities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeVelocity {
    /// Arithmetic mean over all fused fragments (neural detector).
    Mean,
    /// Loudest fragment wins (monophonic tracker).
    Max,
}

/// Drop notes whose confidence is below `threshold`. Notes without a
/// confidence are kept.
pub fn filter_by_confidence(notes: Vec<Note>, threshold: f32) -> Vec<Note> {
    notes
        .into_iter()
        .filter(|note| note.confidence.map_or(true, |c| c >= threshold))
        .collect()
}

/// Grid step in seconds, or `None` when the tempo or resolution is unusable.
pub fn grid_seconds(bpm: f64, resolution_beats: f64) -> Option<f64> {
    let grid = 60.0 / bpm * resolution_beats;
    (bpm > 0.0 && grid.is_finite() && grid > 0.0).then_some(grid)
}

/// Snap start and end to the nearest grid multiple. Notes collapsed to zero
/// length get one grid step. Skipped when the tempo is not positive.
pub fn quantize(notes: Vec<Note>, bpm: f64, resolution_beats: f64) -> Vec<Note> {
    let Some(grid) = grid_seconds(bpm, resolution_beats) else {
        return notes;
    };
    notes
        .into_iter()
        .map(|note| {
            let start = ((note.start / grid).round() * grid).max(0.0);
            let mut end = (note.end / grid).round() * grid;
            if end <= start {
                end = start + grid;
            }
            Note { start, end, ..note }
        })
        .collect()
}

pub fn sort_by_start(mut notes: Vec<Note>) -> Vec<Note> {
    notes.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));
    notes
}

struct Run {
    note: Note,
    velocity_sum: u32,
    fragments: u32,
}

impl Run {
    fn new(note: Note) -> Self {
        Self {
            velocity_sum: note.velocity as u32,
            fragments: 1,
            note,
        }
    }

    fn absorb(mut self, next: Note, velocity: MergeVelocity) -> Self {
        self.note.end = self.note.end.max(next.end);
        self.note.confidence = match (self.note.confidence, next.confidence) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.velocity_sum += next.velocity as u32;
        self.fragments += 1;
        self.note.velocity = match velocity {
            MergeVelocity::Mean => (self.velocity_sum as f64 / self.fragments as f64).round() as u8,
            MergeVelocity::Max => self.note.velocity.max(next.velocity),
        };
        self
    }
}

/// Fuse consecutive same-pitch notes whose gap (`next.start - prev.end`,
/// negative when overlapping) is at most `threshold` seconds.
///
/// Different pitches are never merged. The output is sorted by start and
/// merging it again is a no-op.
pub fn merge(notes: Vec<Note>, threshold: f64, velocity: MergeVelocity) -> Vec<Note> {
    let mut by_pitch: Vec<Vec<Note>> = vec![Vec::new(); 128];
    for note in sort_by_start(notes) {
        by_pitch[note.pitch.min(127) as usize].push(note);
    }

    let merged = by_pitch.into_iter().flat_map(|group| {
        group
            .into_iter()
            .fold(Vec::<Run>::new(), |mut runs, note| {
                match runs.pop() {
                    Some(run) if note.start - run.note.end <= threshold => runs.push(run.absorb(note, velocity)),
                    Some(run) => {
                        runs.push(run);
                        runs.push(Run::new(note));
                    }
                    None => runs.push(Run::new(note)),
                }
                runs
            })
            .into_iter()
            .map(|run| run.note)
    });

    sort_by_start(merged.collect())
}

/// Collapse drum hits that landed on the same `(pitch, start)` after
/// quantization, keeping the loudest.
pub fn dedup_hits(notes: Vec<Note>) -> Vec<Note> {
    sort_by_start(notes).into_iter().fold(Vec::new(), |mut kept: Vec<Note>, hit| {
        let duplicate = kept
            .iter_mut()
            .rev()
            .take_while(|k| (hit.start - k.start).abs() < 1e-9)
            .find(|k| k.pitch == hit.pitch);
        match duplicate {
            Some(existing) => existing.velocity = existing.velocity.max(hit.velocity),
            None => kept.push(hit),
        }
        kept
    })
}

/// Filter → quantize → sort → merge.
pub fn refine(notes: Vec<Note>, params: &TrackParams, bpm: f64, velocity: MergeVelocity) -> Vec<Note> {
    let filtered = filter_by_confidence(notes, params.confidence_threshold);
    let quantized = quantize(filtered, bpm, params.quantize_resolution_beats);
    let valid: Vec<Note> = quantized.into_iter().filter(|n| n.end > n.start).collect();
    merge(sort_by_start(valid), params.merge_threshold_s, velocity)
}

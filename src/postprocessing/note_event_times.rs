use super::{helpers::ported::librosa::model_frame_to_time, note_event_frames::NoteEventFrame};
use crate::types::Note;

/// Convert frame-domain note events to [`Note`]s in seconds.
///
/// The decoder amplitude becomes both the confidence and, scaled to 1-127,
/// the velocity. Output is sorted by start time.
pub fn note_frames_to_time(notes: &[NoteEventFrame]) -> Vec<Note> {
    let mut converted: Vec<Note> = notes
        .iter()
        .filter(|note| note.pitch_midi <= 127 && note.duration_frames > 0)
        .map(|note| {
            let start = model_frame_to_time(note.start_frame) as f64;
            let end = model_frame_to_time(note.start_frame + note.duration_frames) as f64;
            let amplitude = note.amplitude.clamp(0.0, 1.0);
            let velocity = (amplitude * 127.0).round() as u8;
            Note::new(note.pitch_midi as u8, start, end, velocity).with_confidence(amplitude)
        })
        .collect();

    converted.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));
    converted
}

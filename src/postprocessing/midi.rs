use midly::num::u7;
use midly::Format;
use midly::Header;
use midly::MetaMessage;
use midly::MidiMessage;
use midly::Smf;
use midly::Timing;
use midly::Track;
use midly::TrackEvent;
use midly::TrackEventKind;

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::Path;

use crate::constants::{DEFAULT_BPM, TICKS_PER_BEAT};
use crate::error::{Result, TranscriptionError};
use crate::types::Note;

/// Notes recovered from a MIDI file together with its tempo.
#[derive(Debug, Clone)]
pub struct DecodedMidi {
    pub bpm: f64,
    pub ticks_per_beat: u16,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone)]
struct TrackEventAbsolute<'a> {
    tick: u32,
    kind: TrackEventKind<'a>,
}

impl TrackEventAbsolute<'_> {
    /// Note-on sorts before note-off at the same tick.
    fn order_key(&self) -> (u32, u8) {
        let rank = match self.kind {
            TrackEventKind::Midi { message: MidiMessage::NoteOn { .. }, .. } => 0,
            _ => 1,
        };
        (self.tick, rank)
    }
}

fn seconds_to_ticks(seconds: f64, ticks_per_second: f64) -> u32 {
    (seconds.max(0.0) * ticks_per_second).round() as u32
}

fn tempo_micros(bpm: f64) -> u32 {
    (60_000_000.0 / bpm).round().clamp(1.0, 16_777_215.0) as u32
}

/// Absolute-time note-on/off pairs ordered by `(tick, on before off)`, delta encoded.
pub fn generate_ordered_midi_events(note_events: &[Note], ticks_per_second: f64) -> Vec<TrackEvent<'static>> {
    let mut track_events_absolute: Vec<TrackEventAbsolute> = note_events
        .iter()
        .flat_map(|note| {
            let key = u7::new(note.pitch.min(127));
            let vel = u7::new(note.velocity.clamp(1, 127));
            let start_tick = seconds_to_ticks(note.start, ticks_per_second);
            let end_tick = seconds_to_ticks(note.end, ticks_per_second).max(start_tick);
            [
                TrackEventAbsolute {
                    tick: start_tick,
                    kind: TrackEventKind::Midi {
                        channel: 0.into(),
                        message: MidiMessage::NoteOn { key, vel },
                    },
                },
                TrackEventAbsolute {
                    tick: end_tick,
                    kind: TrackEventKind::Midi {
                        channel: 0.into(),
                        message: MidiMessage::NoteOff { key, vel },
                    },
                },
            ]
        })
        .collect();

    // stable, so same-kind events at one tick keep note order
    track_events_absolute.sort_by_key(TrackEventAbsolute::order_key);

    let mut previous_tick = 0;
    track_events_absolute
        .into_iter()
        .map(|event| {
            let delta = event.tick - previous_tick;
            previous_tick = event.tick;
            TrackEvent {
                delta: delta.into(),
                kind: event.kind,
            }
        })
        .collect()
}

/// Encode notes as a single-track standard MIDI file at the given tempo.
pub fn generate_midi_file_data(notes: &[Note], beats_per_minute: f64) -> Result<Vec<u8>> {
    if !(beats_per_minute > 0.0) {
        return Err(TranscriptionError::EncodingFailed(format!(
            "tempo must be positive, got {beats_per_minute}"
        )));
    }

    let timing = Timing::Metrical(TICKS_PER_BEAT.into());
    let ticks_per_second = TICKS_PER_BEAT as f64 * beats_per_minute / 60.0;

    let mut smf = Smf::new(Header {
        format: Format::SingleTrack,
        timing,
    });
    let mut track = Track::new();

    // Set tempo to match the BPM
    track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(tempo_micros(beats_per_minute).into())),
    });
    track.extend(generate_ordered_midi_events(notes, ticks_per_second));
    track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    smf.tracks.push(track);

    let mut buffer = Vec::new();
    smf.write_std(&mut Cursor::new(&mut buffer))
        .map_err(|e| TranscriptionError::EncodingFailed(e.to_string()))?;

    Ok(buffer)
}

/// Write notes to a `.mid` file.
pub fn write_midi_file(path: &Path, notes: &[Note], beats_per_minute: f64) -> Result<()> {
    let buffer = generate_midi_file_data(notes, beats_per_minute)?;
    std::fs::write(path, buffer)
        .map_err(|e| TranscriptionError::EncodingFailed(format!("{}: {e}", path.display())))
}

/// Decode a standard MIDI file into notes.
///
/// The first tempo meta-event sets the tempo for the whole file (120 BPM if
/// absent). Note-offs and zero-velocity note-ons close the oldest pending
/// note of the same pitch; note-ons still open at the end are dropped.
pub fn parse_midi_data(data: &[u8]) -> Result<DecodedMidi> {
    let smf = Smf::parse(data)?;
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => tpb.as_int(),
        Timing::Timecode(..) => {
            return Err(TranscriptionError::InvalidMidi("SMPTE timecode timing is not supported".into()));
        }
    };
    if ticks_per_beat == 0 {
        return Err(TranscriptionError::InvalidMidi("ticks per beat is zero".into()));
    }

    let tempo = smf
        .tracks
        .iter()
        .flatten()
        .find_map(|event| match event.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(micros)) if micros.as_int() > 0 => Some(micros.as_int()),
            _ => None,
        });
    let bpm = tempo.map_or(DEFAULT_BPM, |micros| 60_000_000.0 / micros as f64);
    let seconds_per_tick = 60.0 / (bpm * ticks_per_beat as f64);

    let mut notes = Vec::new();
    for track in &smf.tracks {
        let mut track_tick: u64 = 0;
        let mut pending: HashMap<u8, VecDeque<(u64, u8)>> = HashMap::new();

        for event in track {
            track_tick += event.delta.as_int() as u64;
            let TrackEventKind::Midi { message, .. } = event.kind else {
                continue;
            };
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    pending.entry(key.as_int()).or_default().push_back((track_tick, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let Some((start_tick, velocity)) = pending.get_mut(&key.as_int()).and_then(VecDeque::pop_front)
                    else {
                        continue;
                    };
                    notes.push(Note::new(
                        key.as_int(),
                        start_tick as f64 * seconds_per_tick,
                        track_tick as f64 * seconds_per_tick,
                        velocity,
                    ));
                }
                _ => {}
            }
        }
    }

    notes.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));

    Ok(DecodedMidi {
        bpm,
        ticks_per_beat,
        notes,
    })
}

pub fn read_midi_file(path: &Path) -> Result<DecodedMidi> {
    if !path.exists() {
        return Err(TranscriptionError::InputNotFound(path.to_path_buf()));
    }
    let data = std::fs::read(path)?;
    parse_midi_data(&data)
}

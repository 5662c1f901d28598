//! End-to-end tests over generated WAV fixtures.
//!
//! No note model is shipped with the tests, so the neural lanes are expected
//! to fail cleanly while drums and melody still come through.

use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use song_transcribe::config::{DrumMode, MelodyMode};
use song_transcribe::detectors::{MonophonicPitchDetector, NoteDetector};
use song_transcribe::postprocessing::midi::{read_midi_file, write_midi_file};
use song_transcribe::{
    estimate_chords, CancellationToken, NoProgress, Note, ParamsTable, Settings, StemDirectory, TempoEstimator,
    TranscriptionContext,
};
use tempfile::TempDir;

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create WAV file");
    for &sample in samples {
        writer
            .write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)
            .expect("Failed to write sample");
    }
    writer.finalize().expect("Failed to finalize WAV");
}

fn sine(frequency_hz: f64, seconds: f64, sample_rate: u32) -> Vec<f32> {
    (0..(seconds * sample_rate as f64) as usize)
        .map(|i| (0.5 * (2.0 * PI * frequency_hz * i as f64 / sample_rate as f64).sin()) as f32)
        .collect()
}

/// Decaying 60 Hz thumps at the given times.
fn kicks(onsets: &[f64], seconds: f64, sample_rate: u32) -> Vec<f32> {
    let sr = sample_rate as f64;
    let mut samples = vec![0.0f32; (seconds * sr) as usize];
    for &onset in onsets {
        let start = (onset * sr) as usize;
        for k in 0..(0.45 * sr) as usize {
            let t = k as f64 / sr;
            let fade_in = (t / 0.002).min(1.0);
            let value = 0.8 * fade_in * (-t / 0.08).exp() * (2.0 * PI * 60.0 * t).sin();
            if let Some(sample) = samples.get_mut(start + k) {
                *sample += value as f32;
            }
        }
    }
    samples
}

fn click_track(bpm: f64, seconds: f64, sample_rate: u32) -> Vec<f32> {
    let mut samples = vec![0.0f32; (seconds * sample_rate as f64) as usize];
    let mut t = 0.1;
    while t < seconds {
        let start = (t * sample_rate as f64) as usize;
        let len = sample_rate as usize / 50;
        for (k, sample) in samples.iter_mut().skip(start).take(len).enumerate() {
            let decay = (-(k as f64) / (len as f64 / 5.0)).exp();
            *sample = (decay * (2.0 * PI * 1500.0 * k as f64 / sample_rate as f64).sin()) as f32;
        }
        t += 60.0 / bpm;
    }
    samples
}

const KICK_ONSETS: [f64; 4] = [0.25, 0.75, 1.25, 1.75];

/// A song directory with a mix and the four stems.
fn song_fixture(dir: &Path) -> (PathBuf, PathBuf) {
    let stems = dir.join("stems");
    std::fs::create_dir_all(&stems).unwrap();
    write_wav(&stems.join("drums.wav"), &kicks(&KICK_ONSETS, 2.5, 44100), 44100);
    write_wav(&stems.join("bass.wav"), &sine(82.41, 2.5, 22050), 22050);
    write_wav(&stems.join("other.wav"), &sine(261.63, 2.5, 22050), 22050);
    write_wav(&stems.join("vocals.wav"), &sine(440.0, 2.5, 22050), 22050);

    let mix = dir.join("mix.wav");
    write_wav(&mix, &kicks(&KICK_ONSETS, 2.5, 22050), 22050);
    (mix, stems)
}

fn settings_without_model(dir: &Path) -> Settings {
    Settings {
        model_path: dir.join("missing-model.onnx"),
        ..Settings::default()
    }
}

#[test]
fn test_transcribe_stem_directory() {
    let tmp = TempDir::new().unwrap();
    let (mix, stems) = song_fixture(tmp.path());
    let mut settings = settings_without_model(tmp.path());
    settings.artifact_dir = Some(tmp.path().join("artifacts"));

    let context = TranscriptionContext::new(settings).unwrap();
    let result = context.transcribe(&mix, &StemDirectory::new(&stems), &NoProgress, &CancellationToken::new());

    assert!(result.success, "{:?}", result.error);
    assert!(result.tempo.bpm > 0.0);
    assert_eq!(
        result.tracks.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["bass", "drums", "melody", "other"]
    );

    // no model: the neural lanes fail on their own
    for name in ["bass", "other"] {
        let track = result.track(name).unwrap();
        assert!(track.is_failed(), "{name} should fail without a model");
        assert!(track.midi_artifact.is_none());
    }
    assert!(result.chords.is_empty());

    let drums = result.track("drums").unwrap();
    assert_eq!(drums.notes.len(), KICK_ONSETS.len(), "{:?}", drums.notes);
    for (note, onset) in drums.notes.iter().zip(KICK_ONSETS) {
        assert_eq!(note.pitch, 36);
        assert!((note.start - onset).abs() < 0.08, "{} vs {onset}", note.start);
        assert!(note.end > note.start);
    }

    let melody = result.track("melody").unwrap();
    assert!(melody.error.is_none());
    let longest = melody
        .notes
        .iter()
        .max_by(|a, b| a.duration().total_cmp(&b.duration()))
        .expect("melody notes");
    assert_eq!(longest.pitch, 69);

    assert_eq!(result.notes_count, drums.notes.len() + melody.notes.len());
    assert!(result.duration >= longest.end);

    // artifacts are isolated per run and decode back to the same notes
    let drums_midi = drums.midi_artifact.as_ref().expect("drums artifact");
    assert_eq!(drums_midi, &tmp.path().join("artifacts").join(&result.run_id).join("drums.mid"));
    let decoded = read_midi_file(drums_midi).unwrap();
    assert_eq!(decoded.notes.len(), drums.notes.len());
    assert!((decoded.bpm - result.tempo.bpm).abs() < 0.01);
    assert!(melody.midi_artifact.as_ref().is_some_and(|p| p.exists()));
}

/// 16-bit mono WAV bytes with a zero sample rate in the header.
fn zero_rate_wav(n_samples: usize) -> Vec<u8> {
    let data_len = (n_samples * 2) as u32;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    for field in [16u32.to_le_bytes(), [1, 0, 1, 0], 0u32.to_le_bytes(), 0u32.to_le_bytes(), [2, 0, 16, 0]] {
        bytes.extend_from_slice(&field);
    }
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(bytes.len() + n_samples * 2, 0x10);
    bytes
}

#[test]
fn test_zero_sample_rate_stem_fails_only_its_track() {
    let tmp = TempDir::new().unwrap();
    let (mix, stems) = song_fixture(tmp.path());
    std::fs::write(stems.join("vocals.wav"), zero_rate_wav(22050)).unwrap();

    let context = TranscriptionContext::new(settings_without_model(tmp.path())).unwrap();
    let result = context.transcribe(&mix, &StemDirectory::new(&stems), &NoProgress, &CancellationToken::new());

    assert!(result.success, "{:?}", result.error);
    let melody = result.track("melody").unwrap();
    assert!(melody.is_failed());
    assert!(melody.error.as_ref().unwrap().contains("zero sample rate"), "{:?}", melody.error);
    assert_eq!(result.track("drums").unwrap().notes.len(), KICK_ONSETS.len());
}

#[test]
fn test_run_ids_are_unique() {
    let tmp = TempDir::new().unwrap();
    let (mix, stems) = song_fixture(tmp.path());
    let mut settings = settings_without_model(tmp.path());
    settings.drum_mode = DrumMode::Skip;
    let context = TranscriptionContext::new(settings).unwrap();
    let separator = StemDirectory::new(&stems);

    let first = context.transcribe(&mix, &separator, &NoProgress, &CancellationToken::new());
    let second = context.transcribe(&mix, &separator, &NoProgress, &CancellationToken::new());
    assert_ne!(first.run_id, second.run_id);

    let drums = first.track("drums").unwrap();
    assert!(drums.notes.is_empty());
    assert!(drums.error.is_none());
}

#[test]
fn test_every_track_failing_is_a_failed_result() {
    let tmp = TempDir::new().unwrap();
    let stems = tmp.path().join("stems");
    std::fs::create_dir_all(&stems).unwrap();
    write_wav(&stems.join("bass.wav"), &sine(82.41, 1.0, 22050), 22050);
    let mix = tmp.path().join("mix.wav");
    write_wav(&mix, &sine(82.41, 1.0, 22050), 22050);

    let mut settings = settings_without_model(tmp.path());
    settings.melody_mode = MelodyMode::Neural;
    let context = TranscriptionContext::new(settings).unwrap();
    let result = context.transcribe(&mix, &StemDirectory::new(&stems), &NoProgress, &CancellationToken::new());

    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("all tracks failed"));
    assert!(result.tracks.values().all(|t| t.is_failed()));
    assert_eq!(result.notes_count, 0);
}

#[test]
fn test_progress_reaches_done() {
    let tmp = TempDir::new().unwrap();
    let (mix, stems) = song_fixture(tmp.path());
    let mut settings = settings_without_model(tmp.path());
    settings.drum_mode = DrumMode::Skip;
    let context = TranscriptionContext::new(settings).unwrap();

    let percents = std::sync::Mutex::new(Vec::new());
    let sink = |event: song_transcribe::ProgressEvent| percents.lock().unwrap().push(event.percent);
    context.transcribe(&mix, &StemDirectory::new(&stems), &sink, &CancellationToken::new());

    let percents = percents.into_inner().unwrap();
    assert!(percents.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(percents.last(), Some(&100.0));
}

#[test]
fn test_tempo_from_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("clicks.wav");
    write_wav(&path, &click_track(100.0, 12.0, 44100), 44100);

    let tempo = TempoEstimator::default().estimate_file(&path);
    assert!(!tempo.degraded);
    assert!((tempo.bpm - 100.0).abs() < 3.0, "bpm {}", tempo.bpm);

    let missing = TempoEstimator::default().estimate_file(&tmp.path().join("nope.wav"));
    assert_eq!(missing.bpm, 120.0);
    assert!(missing.beat_times.is_empty());
}

#[test]
fn test_monophonic_detector_on_a_sine() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("a4.wav");
    write_wav(&path, &sine(440.0, 1.5, 44100), 44100);

    let detector = MonophonicPitchDetector::new(Default::default());
    let notes = detector.detect_file(&path, &ParamsTable::VOCALS).unwrap();
    assert!(!notes.is_empty());
    let total: f64 = notes.iter().map(Note::duration).sum();
    let on_pitch: f64 = notes.iter().filter(|n| n.pitch == 69).map(Note::duration).sum();
    assert!(on_pitch > 0.9 * total);
    assert!(notes.iter().all(|n| (40..=127).contains(&n.velocity)));
}

#[test]
fn test_chords_from_midi_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("progression.mid");
    let chord = |pitches: [u8; 3], start: f64| pitches.map(|p| Note::new(p, start, start + 1.0, 90));
    let notes: Vec<Note> = [chord([60, 64, 67], 0.0), chord([62, 65, 69], 1.0), chord([62, 66, 69], 2.0)]
        .into_iter()
        .flatten()
        .collect();
    write_midi_file(&path, &notes, 120.0).unwrap();

    let decoded = read_midi_file(&path).unwrap();
    let labels: Vec<(f64, String)> = estimate_chords(&decoded.notes, 0.5)
        .into_iter()
        .map(|c| (c.time, c.label))
        .collect();
    assert_eq!(
        labels,
        vec![(0.0, "C".to_string()), (1.0, "Dm".to_string()), (2.0, "D".to_string())]
    );
}

//! End-to-end transcription: separation → tempo → per-stem detection and
//! refinement → chords → optional MIDI artifacts.
//!
//! A [`TranscriptionContext`] is built once per process and shared by every
//! run. It owns the settings and a lazily loaded note model that is only
//! read after initialisation. Each run gets its own UUID so intermediate and
//! artifact files never collide between concurrent runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chords::estimate_chords;
use crate::config::{Settings, TempoSource};
use crate::detectors::{DrumOnsetDetector, MonophonicPitchDetector, NeuralPitchDetector, NoteDetector};
use crate::error::{Result, TranscriptionError};
use crate::inference::NeuralModel;
use crate::postprocessing::midi::write_midi_file;
use crate::refine::{dedup_hits, quantize, refine};
use crate::router::{DetectorKind, Route, Step, TrackRouter};
use crate::tempo::TempoEstimator;
use crate::types::{InstrumentClass, Note, TempoEstimate, Track, TranscriptionResult};

/// Stem paths keyed by instrument class.
pub type StemPaths = BTreeMap<InstrumentClass, PathBuf>;

/// Source separation backend.
pub trait Separator: Send + Sync {
    /// Split `input` into the four instrument stems, writing any files it
    /// produces under `output_dir`.
    fn separate(&self, input: &Path, output_dir: &Path) -> Result<StemPaths>;

    fn name(&self) -> &'static str;
}

/// Resolves an identifier (URL, upload id, path) to a local waveform file.
pub trait AudioSource: Send + Sync {
    fn acquire(&self, identifier: &str) -> Result<PathBuf>;
}

/// Stems already separated into `drums.wav`, `bass.wav`, `other.wav` and
/// `vocals.wav` inside one directory.
#[derive(Debug, Clone)]
pub struct StemDirectory {
    pub dir: PathBuf,
}

impl StemDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Separator for StemDirectory {
    fn separate(&self, _input: &Path, _output_dir: &Path) -> Result<StemPaths> {
        if !self.dir.is_dir() {
            return Err(TranscriptionError::Separation(format!(
                "stem directory not found: {}",
                self.dir.display()
            )));
        }
        let stems: StemPaths = InstrumentClass::ALL
            .iter()
            .map(|&class| (class, self.dir.join(format!("{}.wav", class.stem_name()))))
            .filter(|(_, path)| path.exists())
            .collect();
        if stems.is_empty() {
            return Err(TranscriptionError::Separation(format!(
                "no stem files in {}",
                self.dir.display()
            )));
        }
        Ok(stems)
    }

    fn name(&self) -> &'static str {
        "stem-directory"
    }
}

/// The identifier is a local file path.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFile;

impl AudioSource for LocalFile {
    fn acquire(&self, identifier: &str) -> Result<PathBuf> {
        let path = PathBuf::from(identifier);
        if !path.exists() {
            return Err(TranscriptionError::InputNotFound(path));
        }
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquire,
    Separate,
    Tempo,
    Transcribe,
    Chords,
    Export,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// Overall completion, 0-100.
    pub percent: f32,
    pub message: String,
}

pub trait ProgressSink {
    fn report(&self, event: ProgressEvent);
}

impl<F: Fn(ProgressEvent)> ProgressSink for F {
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Discards progress events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Cooperative cancellation, checked between pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TranscriptionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-run bookkeeping.
struct Run<'a> {
    id: String,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
}

impl Run<'_> {
    fn report(&self, stage: Stage, percent: f32, message: impl Into<String>) {
        self.progress.report(ProgressEvent {
            stage,
            percent,
            message: message.into(),
        });
    }
}

pub struct TranscriptionContext {
    settings: Settings,
    router: TrackRouter,
    tempo: TempoEstimator,
    model: OnceLock<std::result::Result<NeuralModel, String>>,
}

impl TranscriptionContext {
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            router: TrackRouter::from_settings(&settings),
            tempo: TempoEstimator::default(),
            settings,
            model: OnceLock::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn router(&self) -> &TrackRouter {
        &self.router
    }

    /// The note model, loaded on first use. A failed load is remembered, so
    /// later runs fail fast instead of retrying.
    pub fn neural_model(&self) -> Result<&NeuralModel> {
        self.model
            .get_or_init(|| NeuralModel::load(&self.settings.model_path).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| TranscriptionError::DetectionFailed(e.clone()))
    }

    /// Acquire `identifier` through `source`, then [`transcribe`](Self::transcribe) it.
    pub fn transcribe_from_source(
        &self,
        source: &dyn AudioSource,
        identifier: &str,
        separator: &dyn Separator,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> TranscriptionResult {
        progress.report(ProgressEvent {
            stage: Stage::Acquire,
            percent: 0.0,
            message: format!("Acquiring {identifier}"),
        });
        match source.acquire(identifier) {
            Ok(path) => self.transcribe(&path, separator, progress, cancel),
            Err(err) => {
                warn!("Could not acquire {identifier}: {err}");
                TranscriptionResult::failure(Uuid::new_v4().to_string(), TempoEstimate::fallback(), err)
            }
        }
    }

    /// Transcribe one mixed waveform into tracks, tempo and chords.
    ///
    /// Never fails outright: problems end up in the `error` fields of the
    /// result and its tracks.
    pub fn transcribe(
        &self,
        input: &Path,
        separator: &dyn Separator,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> TranscriptionResult {
        let run = Run {
            id: Uuid::new_v4().to_string(),
            progress,
            cancel,
        };
        info!("Transcription run {} for {}", run.id, input.display());

        match self.run_stages(input, separator, &run) {
            Ok(result) => result,
            Err((tempo, err)) => {
                warn!("Run {} failed: {err}", run.id);
                TranscriptionResult::failure(run.id.clone(), tempo, err)
            }
        }
    }

    fn run_stages(
        &self,
        input: &Path,
        separator: &dyn Separator,
        run: &Run,
    ) -> std::result::Result<TranscriptionResult, (TempoEstimate, TranscriptionError)> {
        let early = |err| (TempoEstimate::fallback(), err);

        if !input.exists() {
            return Err(early(TranscriptionError::InputNotFound(input.to_path_buf())));
        }
        run.cancel.check().map_err(early)?;

        // Separation
        run.report(Stage::Separate, 5.0, format!("Separating stems ({})", separator.name()));
        let work_dir = std::env::temp_dir().join("song-transcribe").join(&run.id);
        let stems = separator.separate(input, &work_dir).map_err(early)?;
        debug!("Separated {} stems into {}", stems.len(), work_dir.display());
        run.cancel.check().map_err(early)?;

        // Tempo
        run.report(Stage::Tempo, 15.0, "Estimating tempo");
        let tempo_input = match self.settings.tempo_source {
            TempoSource::Bass => stems.get(&InstrumentClass::Bass).map(PathBuf::as_path).unwrap_or(input),
            TempoSource::Mix => input,
        };
        let tempo = self.tempo.estimate_file(tempo_input);
        run.cancel.check().map_err(|err| (tempo.clone(), err))?;

        // Tracks
        let mut tracks: BTreeMap<String, Track> = BTreeMap::new();
        let n_classes = InstrumentClass::ALL.len() as f32;
        for (i, class) in InstrumentClass::ALL.into_iter().enumerate() {
            let route = self.router.route(class);
            run.report(
                Stage::Transcribe,
                20.0 + 65.0 * i as f32 / n_classes,
                format!("Transcribing {}", route.track_name),
            );
            let track = match stems.get(&class) {
                Some(path) => self.transcribe_track(&route, path, tempo.bpm),
                None => Track::failed(
                    route.track_name.clone(),
                    TranscriptionError::Separation(format!("no {class} stem")),
                ),
            };
            tracks.insert(route.track_name, track);
            run.cancel.check().map_err(|err| (tempo.clone(), err))?;
        }

        // Chords from the harmonic lanes
        run.report(Stage::Chords, 88.0, "Estimating chords");
        let harmonic: Vec<Note> = [InstrumentClass::Bass, InstrumentClass::Other]
            .iter()
            .filter_map(|class| tracks.get(class.track_name()))
            .flat_map(|track| track.notes.iter().cloned())
            .collect();
        let chords = estimate_chords(&harmonic, self.settings.chord_window_s);
        debug!("{} chord changes", chords.len());
        run.cancel.check().map_err(|err| (tempo.clone(), err))?;

        // MIDI artifacts
        if let Some(artifact_dir) = &self.settings.artifact_dir {
            run.report(Stage::Export, 95.0, "Writing MIDI files");
            let run_dir = artifact_dir.join(&run.id);
            for track in tracks.values_mut().filter(|t| !t.is_failed()) {
                let path = run_dir.join(format!("{}.mid", track.name));
                match write_artifact(&run_dir, &path, &track.notes, tempo.bpm) {
                    Ok(()) => track.midi_artifact = Some(path),
                    Err(err) => {
                        warn!("{}: could not write MIDI: {err}", track.name);
                        track.error = Some(err.to_string());
                    }
                }
            }
        }

        let failed: Vec<String> = tracks
            .values()
            .filter(|t| t.is_failed())
            .map(|t| format!("{}: {}", t.name, t.error.as_deref().unwrap_or("failed")))
            .collect();
        let all_failed = failed.len() == tracks.len();
        let duration = tracks
            .values()
            .flat_map(|t| t.notes.iter())
            .map(|n| n.end)
            .fold(0.0, f64::max);
        let notes_count = tracks.values().map(|t| t.notes.len()).sum();

        run.report(Stage::Done, 100.0, "Done");
        info!(
            "Run {} finished: {} notes over {:.1}s, {} of {} tracks failed",
            run.id,
            notes_count,
            duration,
            failed.len(),
            tracks.len()
        );

        Ok(TranscriptionResult {
            success: !all_failed,
            run_id: run.id.clone(),
            tempo,
            tracks,
            chords,
            duration,
            notes_count,
            error: all_failed.then(|| format!("all tracks failed ({})", failed.join("; "))),
        })
    }

    /// Detect and refine one stem. Errors are kept on the track.
    pub fn transcribe_track(&self, route: &Route, path: &Path, bpm: f64) -> Track {
        let name = route.track_name.clone();
        if route.is_skipped() {
            debug!("{name}: skipped");
            return Track::with_notes(name, Vec::new());
        }

        let detected = match self.detect(&route.primary, path) {
            Ok(notes) => Ok((notes, &route.primary)),
            Err(err) => match &route.fallback {
                Some(fallback) if !err.is_input_error() => {
                    warn!("{name}: {err}; retrying with the {:?} detector", fallback.detector);
                    self.detect(fallback, path).map(|notes| (notes, fallback))
                }
                _ => Err(err),
            },
        };

        match detected {
            Ok((raw, step)) => {
                let raw_count = raw.len();
                let notes = match step.detector {
                    DetectorKind::DrumOnsets => {
                        dedup_hits(quantize(raw, bpm, step.params.quantize_resolution_beats))
                    }
                    _ => refine(raw, &step.params, bpm, route.merge_velocity),
                };
                info!("{name}: {} notes ({raw_count} detected)", notes.len());
                Track::with_notes(name, notes)
            }
            Err(err) => {
                if err.is_input_error() {
                    warn!("{name}: bad input: {err}");
                } else {
                    warn!("{name}: detection failed: {err}");
                }
                Track::failed(name, err)
            }
        }
    }

    fn detect(&self, step: &Step, path: &Path) -> Result<Vec<Note>> {
        match step.detector {
            DetectorKind::DrumOnsets => {
                DrumOnsetDetector::new(self.settings.drums.clone()).detect_file(path, &step.params)
            }
            DetectorKind::Monophonic => {
                MonophonicPitchDetector::new(self.settings.monophonic.clone()).detect_file(path, &step.params)
            }
            DetectorKind::Neural => NeuralPitchDetector::new(self.neural_model()?).detect_file(path, &step.params),
            DetectorKind::Skip => Ok(Vec::new()),
        }
    }
}

fn write_artifact(run_dir: &Path, path: &Path, notes: &[Note], bpm: f64) -> Result<()> {
    std::fs::create_dir_all(run_dir)
        .map_err(|e| TranscriptionError::EncodingFailed(format!("{}: {e}", run_dir.display())))?;
    write_midi_file(path, notes, bpm)
}

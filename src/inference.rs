use std::path::Path;

use ndarray::{concatenate, s, Array2, Array3, ArrayView3, Axis, Ix2};
use ort::{GraphOptimizationLevel, Session, Tensor};
use tracing::{debug, info};

use crate::constants::{ANNOTATIONS_FPS, AUDIO_N_SAMPLES, AUDIO_SAMPLE_RATE, FFT_HOP, N_OVERLAPPING_FRAMES};
use crate::error::{Result, TranscriptionError};
use crate::preprocessing::load_audio::get_audio_input;

const FRAMES_OUTPUT: &str = "StatefulPartitionedCall:1";
const ONSETS_OUTPUT: &str = "StatefulPartitionedCall:2";

/// Frame and onset activations, shaped `(n_frames, n_pitches)`.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub frames: Array2<f32>,
    pub onsets: Array2<f32>,
}

impl ModelOutput {
    pub fn frames_rows(&self) -> Vec<Vec<f32>> {
        self.frames.outer_iter().map(|row| row.to_vec()).collect()
    }

    pub fn onsets_rows(&self) -> Vec<Vec<f32>> {
        self.onsets.outer_iter().map(|row| row.to_vec()).collect()
    }
}

/// Stitch per-window model output back into one continuous activation matrix.
fn unwrap_output(
    output: Array3<f32>,
    audio_original_length: usize,
    n_overlapping_frames: usize,
) -> Result<Array2<f32>> {
    let shape = output.shape().to_vec();

    let n_olap = n_overlapping_frames / 2;
    if shape[1] <= 2 * n_olap {
        return Err(TranscriptionError::DetectionFailed(format!(
            "model window of {} frames is shorter than the overlap",
            shape[1]
        )));
    }
    let trimmed_output = output.slice(s![.., n_olap..shape[1] - n_olap, ..]).to_owned();

    let unwrapped_output = trimmed_output.into_shape((shape[0] * (shape[1] - 2 * n_olap), shape[2]))?;

    let n_output_frames_original =
        ((audio_original_length as f32) * (ANNOTATIONS_FPS as f32 / AUDIO_SAMPLE_RATE as f32)).floor() as usize;
    let n_frames = n_output_frames_original.min(unwrapped_output.nrows());

    Ok(unwrapped_output.slice(s![..n_frames, ..]).to_owned())
}

/// A loaded polyphonic note-estimation model.
///
/// The session is never mutated by inference, so one instance can serve
/// concurrent runs.
pub struct NeuralModel {
    session: Session,
}

impl NeuralModel {
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(TranscriptionError::DetectionFailed(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;

        info!("Loaded note model from {}", model_path.display());
        Ok(Self { session })
    }

    /// Run the model over model-rate (22050 Hz) mono audio.
    pub fn predict(&self, audio: &[f32]) -> Result<ModelOutput> {
        let overlap_len = N_OVERLAPPING_FRAMES * FFT_HOP;
        let hop_size = AUDIO_N_SAMPLES - overlap_len;

        let (audio_windows, original_length) = get_audio_input(audio, overlap_len, hop_size)?;
        debug!("Running note model over {} windows", audio_windows.len());

        let mut frames: Vec<Array3<f32>> = Vec::with_capacity(audio_windows.len());
        let mut onsets: Vec<Array3<f32>> = Vec::with_capacity(audio_windows.len());

        for window in audio_windows {
            // (1, n_samples) -> (1, n_samples, 1)
            let window = window.insert_axis(Axis(2));
            let input_shape: Vec<i64> = window.shape().iter().map(|&dim| dim as i64).collect();
            let input_data: Vec<f32> = window.into_raw_vec();
            let input_tensor = Tensor::from_array((input_shape, input_data))?;
            let outputs = self.session.run(ort::inputs![input_tensor]?)?;

            for (&name, value) in outputs.iter() {
                let target = match name {
                    FRAMES_OUTPUT => &mut frames,
                    ONSETS_OUTPUT => &mut onsets,
                    _ => continue,
                };
                let activations = value
                    .try_extract_tensor::<f32>()?
                    .index_axis(Axis(0), 0)
                    .into_dimensionality::<Ix2>()?
                    .insert_axis(Axis(0))
                    .to_owned();
                target.push(activations);
            }
        }

        Ok(ModelOutput {
            frames: stitch(&frames, original_length, "frames")?,
            onsets: stitch(&onsets, original_length, "onsets")?,
        })
    }
}

fn stitch(windows: &[Array3<f32>], original_length: usize, label: &str) -> Result<Array2<f32>> {
    if windows.is_empty() {
        return Err(TranscriptionError::DetectionFailed(format!("model produced no {label} output")));
    }
    let views: Vec<ArrayView3<f32>> = windows.iter().map(|array| array.view()).collect();
    let concatenated = concatenate(Axis(0), views.as_slice())?;
    unwrap_output(concatenated, original_length, N_OVERLAPPING_FRAMES)
}

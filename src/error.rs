//! Error taxonomy for the transcription core.
//!
//! Detector-level operations return [`Result`] and never panic past their own
//! boundary. The pipeline turns these into per-track error strings, so one
//! failed stem never aborts the others.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Audio file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Audio file is empty: {}", .0.display())]
    InputEmpty(PathBuf),

    #[error("Failed to decode audio file '{}': {reason}", path.display())]
    InvalidAudio { path: PathBuf, reason: String },

    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    #[error("MIDI encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid MIDI data: {0}")]
    InvalidMidi(String),

    #[error("Stem separation failed: {0}")]
    Separation(String),

    #[error("Transcription cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TranscriptionError>;

impl TranscriptionError {
    /// True when the failure is about the input file rather than the algorithm.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TranscriptionError::InputNotFound(_)
                | TranscriptionError::InputEmpty(_)
                | TranscriptionError::InvalidAudio { .. }
        )
    }

    pub fn invalid_audio(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        TranscriptionError::InvalidAudio {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<ort::Error> for TranscriptionError {
    fn from(err: ort::Error) -> Self {
        TranscriptionError::DetectionFailed(format!("model runtime: {err}"))
    }
}

impl From<ndarray::ShapeError> for TranscriptionError {
    fn from(err: ndarray::ShapeError) -> Self {
        TranscriptionError::DetectionFailed(format!("unexpected tensor shape: {err}"))
    }
}

impl From<midly::Error> for TranscriptionError {
    fn from(err: midly::Error) -> Self {
        TranscriptionError::InvalidMidi(err.to_string())
    }
}

impl From<serde_json::Error> for TranscriptionError {
    fn from(err: serde_json::Error) -> Self {
        TranscriptionError::Config(err.to_string())
    }
}

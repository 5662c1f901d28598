//! Audio-to-symbolic song transcription.
//!
//! Separated stems go in; per-instrument note tracks, a global tempo and a
//! chord timeline come out, with MIDI as the interchange format.

pub mod chords;
pub mod config;
pub mod constants;
pub mod detectors;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod refine;
pub mod router;
pub mod spectral;
pub mod tempo;
pub mod types;
pub mod preprocessing {
    pub mod load_audio;
    pub mod windowed_audio;
}
pub mod postprocessing {
    pub mod helpers {
        pub mod ported {
            pub mod librosa;
            pub mod numpy;
        }
        pub mod helpers;
    }
    pub mod note_event_frames;
    pub mod note_event_times;
    pub mod midi;
}

pub use chords::estimate_chords;
pub use config::{ParamsTable, Settings, TrackParams};
pub use error::{Result, TranscriptionError};
pub use pipeline::{CancellationToken, LocalFile, NoProgress, ProgressEvent, StemDirectory, TranscriptionContext};
pub use router::TrackRouter;
pub use tempo::TempoEstimator;
pub use types::{ChordEvent, InstrumentClass, Note, TempoEstimate, Track, TranscriptionResult};

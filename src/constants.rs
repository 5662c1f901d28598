// Inference
pub const AUDIO_SAMPLE_RATE: usize = 22050;
pub const FFT_HOP: usize = 256;
pub const ANNOTATIONS_FPS: usize = AUDIO_SAMPLE_RATE / FFT_HOP;
pub const AUDIO_WINDOW_LENGTH: usize = 2;
pub const AUDIO_N_SAMPLES: usize = AUDIO_SAMPLE_RATE * AUDIO_WINDOW_LENGTH - FFT_HOP;
pub const ANNOT_N_FRAMES: usize = ANNOTATIONS_FPS * AUDIO_WINDOW_LENGTH;
pub const N_OVERLAPPING_FRAMES: usize = 30;
pub const WINDOW_OFFSET: f32 = (FFT_HOP as f32 / AUDIO_SAMPLE_RATE as f32)
    * (ANNOT_N_FRAMES as f32 - AUDIO_N_SAMPLES as f32 / FFT_HOP as f32)
    + 0.0018;
pub const MODEL_PATH: &str = "./model/icassp_2022_nmp.onnx";
pub const MODEL_PATH_ENV: &str = "SONG_TRANSCRIBE_MODEL";

// Model output geometry
pub const N_FREQ_BINS_NOTES: usize = 88;
pub const MAX_FREQ_IDX: usize = N_FREQ_BINS_NOTES - 1;

// Drums and tempo analysis
pub const DRUM_SAMPLE_RATE: usize = 44100;
pub const DEFAULT_BPM: f64 = 120.0;

// MIDI Conversion
pub const MIDI_OFFSET: usize = 21;
pub const TICKS_PER_BEAT: u16 = 480;

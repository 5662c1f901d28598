use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use song_transcribe::chords::{estimate_chords, DEFAULT_WINDOW_S};
use song_transcribe::postprocessing::midi::read_midi_file;
use song_transcribe::{
    CancellationToken, ProgressEvent, Settings, StemDirectory, TempoEstimator, TranscriptionContext,
    TranscriptionError,
};

/// Transcribe separated song stems into notes, tempo and chords
#[derive(Parser, Debug)]
#[command(name = "song-transcribe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transcribe a mix from its separated stems and print the JSON result
    Transcribe {
        /// The full mix
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Directory holding drums.wav, bass.wav, other.wav and vocals.wav
        #[arg(short, long, value_name = "DIR")]
        stems: PathBuf,

        /// Write per-track MIDI files under this directory
        #[arg(short, long, value_name = "DIR")]
        artifacts: Option<PathBuf>,

        /// JSON settings overriding the defaults
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Estimate the chord timeline of a MIDI file
    Chords {
        #[arg(short, long, value_name = "FILE")]
        midi: PathBuf,

        /// Window length in seconds
        #[arg(short, long, default_value_t = DEFAULT_WINDOW_S)]
        window: f64,
    },
    /// Estimate tempo and beats of an audio file
    Tempo {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run one subcommand; `Ok(false)` means it ran but produced a failed result.
fn run(command: Command) -> Result<bool, TranscriptionError> {
    match command {
        Command::Transcribe {
            input,
            stems,
            artifacts,
            config,
        } => {
            let mut settings = match config {
                Some(path) => Settings::from_json_file(&path)?,
                None => Settings::default(),
            };
            if artifacts.is_some() {
                settings.artifact_dir = artifacts;
            }

            let context = TranscriptionContext::new(settings)?;
            let progress = |event: ProgressEvent| {
                tracing::info!("[{:>3.0}%] {}", event.percent, event.message);
            };
            let result = context.transcribe(
                &input,
                &StemDirectory::new(stems),
                &progress,
                &CancellationToken::new(),
            );
            print_json(&result)?;
            Ok(result.success)
        }
        Command::Chords { midi, window } => {
            if !(window > 0.0) {
                return Err(TranscriptionError::Config(format!("window must be positive, got {window}")));
            }
            let decoded = read_midi_file(&midi)?;
            print_json(&estimate_chords(&decoded.notes, window))?;
            Ok(true)
        }
        Command::Tempo { input } => {
            let tempo = TempoEstimator::default().estimate_file(&input);
            print_json(&tempo)?;
            Ok(true)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), TranscriptionError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| TranscriptionError::EncodingFailed(e.to_string()))?;
    println!("{json}");
    Ok(())
}

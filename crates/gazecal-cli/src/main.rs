//! gazecal CLI: run the offline eye-tracker calibration pipeline.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use gazecal::session::apply_gaze_model;
use gazecal::trigger::{read_trigger_table, retime};
use gazecal::{
    BlinkFilter, GazeModel, Segmenter, SegmenterConfig, Session, SessionConfig, Stage, StageStatus,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "gazecal")]
#[command(about = "Offline calibration of a head-mounted eye tracker against a scene camera")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session stages described by a JSON configuration.
    Run(CliRunArgs),

    /// List the trigger epochs of a `(frameTime, triggerLevel)` table.
    Epochs(CliEpochsArgs),

    /// Apply a stored gaze model to a pupil position table.
    Apply(CliApplyArgs),

    /// Print the default session configuration as JSON.
    DefaultConfig,

    /// Decode a 16-bit payload word against the marker dictionary.
    DecodeTest {
        /// Observed payload (hex, e.g. 0xB532).
        #[arg(long)]
        word: String,
        /// Maximum number of corrected bits.
        #[arg(long, default_value = "1")]
        max_bits: u32,
    },
}

#[derive(Debug, Clone, Args)]
struct CliRunArgs {
    /// Session configuration (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Override the data directory from the configuration.
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Override the recording stamp from the configuration.
    #[arg(long)]
    session: Option<String>,

    /// Recompute stages whose outputs already exist.
    #[arg(long)]
    force: bool,

    /// Run only this stage.
    #[arg(long, value_enum)]
    stage: Option<StageArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StageArg {
    Eye,
    Targets,
    Calibration,
    Gaze,
}

impl From<StageArg> for Stage {
    fn from(s: StageArg) -> Self {
        match s {
            StageArg::Eye => Stage::EyeExtraction,
            StageArg::Targets => Stage::TargetExtraction,
            StageArg::Calibration => Stage::CameraCalibration,
            StageArg::Gaze => Stage::GazeMapping,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CliEpochsArgs {
    /// Trigger table of one stream.
    #[arg(long)]
    triggers: PathBuf,

    /// Replace recorded frame times by the nominal rate (frames per second).
    #[arg(long)]
    frame_rate: Option<f64>,

    /// Epochs must last strictly longer than this many frames.
    #[arg(long, default_value = "80")]
    min_duration: usize,
}

#[derive(Debug, Clone, Args)]
struct CliApplyArgs {
    /// Gaze model JSON written by the gaze mapping stage.
    #[arg(long)]
    model: PathBuf,

    /// Pupil position table.
    #[arg(long)]
    pupil: PathBuf,

    /// Output gaze table.
    #[arg(long)]
    out: PathBuf,

    /// Blink threshold on detector confidence.
    #[arg(long, default_value = "0.9")]
    min_confidence: f64,

    /// Blink threshold on pupil diameter (pixels).
    #[arg(long)]
    min_diameter: Option<f64>,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_session(&args),
        Commands::Epochs(args) => run_epochs(&args),
        Commands::Apply(args) => run_apply(&args),
        Commands::DefaultConfig => run_default_config(),
        Commands::DecodeTest { word, max_bits } => run_decode_test(&word, max_bits),
    }
}

// ── run ───────────────────────────────────────────────────────────────

fn run_session(args: &CliRunArgs) -> CliResult<()> {
    let mut config = SessionConfig::load(&args.config)?;
    if let Some(p) = &args.data_path {
        config.data_path = Some(p.clone());
    }
    if let Some(s) = &args.session {
        config.session = Some(s.clone());
    }
    config.force_reprocess |= args.force;

    let session = Session::new(config)?;
    tracing::info!(
        root = %session.files().root().display(),
        session = session.files().stamp(),
        "session loaded"
    );
    let reports = match args.stage {
        Some(s) => vec![session.run_stage(s.into())],
        None => session.run(),
    };

    let mut failed = 0usize;
    for r in &reports {
        match &r.status {
            StageStatus::Completed => println!("{:<20} completed", r.stage.to_string()),
            StageStatus::Skipped => println!("{:<20} skipped (output exists)", r.stage.to_string()),
            StageStatus::Failed(e) => {
                failed += 1;
                println!("{:<20} failed: {}", r.stage.to_string(), e);
            }
        }
    }
    if failed > 0 {
        return Err(format!("{failed} stage(s) failed").into());
    }
    Ok(())
}

// ── epochs ────────────────────────────────────────────────────────────

fn run_epochs(args: &CliEpochsArgs) -> CliResult<()> {
    let mut stamps = read_trigger_table(&args.triggers)?;
    if let Some(fps) = args.frame_rate {
        retime(&mut stamps, fps);
    }
    let segmenter = Segmenter::new(SegmenterConfig {
        min_duration_frames: args.min_duration,
        ..SegmenterConfig::default()
    });
    let epochs = segmenter.segment_timestamps(&stamps)?;

    tracing::info!(frames = stamps.len(), epochs = epochs.len(), "segmented");
    let listing: Vec<serde_json::Value> = epochs
        .iter()
        .map(|e| {
            let first = stamps.get(e.start_index + 1).map(|s| s.time_ms);
            let last = stamps.get(e.stop_index).map(|s| s.time_ms);
            serde_json::json!({
                "startIndex": e.start_index,
                "stopIndex": e.stop_index,
                "durationFrames": e.duration_frames,
                "firstFrame": e.start_index + 1,
                "durationMs": first.zip(last).map(|(a, b)| b - a),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

// ── apply ─────────────────────────────────────────────────────────────

fn run_apply(args: &CliApplyArgs) -> CliResult<()> {
    let model = GazeModel::load_json(&args.model)?;
    let blink = BlinkFilter {
        min_diameter: args.min_diameter,
        min_confidence: args.min_confidence,
    };
    let rows = apply_gaze_model(&model, &args.pupil, &blink, &args.out)?;
    println!("wrote {rows} gaze rows to {}", args.out.display());
    Ok(())
}

// ── default-config ────────────────────────────────────────────────────

fn run_default_config() -> CliResult<()> {
    let json = serde_json::to_string_pretty(&SessionConfig::default())?;
    println!("{json}");
    Ok(())
}

// ── decode-test ───────────────────────────────────────────────────────

fn run_decode_test(word_str: &str, max_bits: u32) -> CliResult<()> {
    use gazecal::marker::dictionary::{match_word, CODES, MIN_ROTATION_DISTANCE};

    let word_str = word_str
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let word = u16::from_str_radix(word_str, 16)
        .map_err(|e| -> CliError { format!("invalid hex word: {}", e).into() })?;

    println!("marker dictionary: {} codes, min distance {}", CODES.len(), MIN_ROTATION_DISTANCE);
    match match_word(word, max_bits) {
        Some(m) => println!(
            "0x{word:04X} -> id {} (rotation {}, {} bit(s) corrected)",
            m.id, m.rotation, m.distance
        ),
        None => println!("0x{word:04X} -> no match within {max_bits} bit(s)"),
    }
    Ok(())
}

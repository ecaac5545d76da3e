use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use crossbeam_channel::tick;
use tracing_subscriber::EnvFilter;

use barkwatch::audio;
use barkwatch::config::Config;
use barkwatch::controller::CaptureOutcome;
use barkwatch::error::BarkwatchError;
use barkwatch::monitor::SoundMonitor;
use barkwatch::presence;
use barkwatch::session::SessionHandle;

#[derive(Parser)]
#[command(
    name = "barkwatch",
    about = "Listen for loud events and upload what was heard",
    long_about = "Barkwatch polls a microphone for the ambient sound pressure level. When \
        a sustained loud event coincides with presence, it records a short clip, \
        encodes it as WAV or MP3, and uploads it to a remote collector as \
        multipart/form-data. Optionally posts an environment reading after each \
        delivered clip."
)]
struct Cli {
    /// Path to config file
    ///
    /// Defaults to ~/.config/barkwatch/config.yaml if not specified.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    ///
    /// Sets the log level to debug for the barkwatch crate, showing every
    /// level reading, session transition and collector response line.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor and upload captures (foreground)
    ///
    /// Polls the configured audio source, triggers a capture after the
    /// configured run of loud readings while presence is active, and
    /// uploads each clip. Runs until interrupted with Ctrl+C.
    Run,

    /// Record and upload one clip now, bypassing detection
    Capture,

    /// Print live sound levels for calibration
    ///
    /// Shows the dB SPL estimate for each polling window so threshold_db
    /// and reference_rms can be tuned against a reference meter.
    Level {
        /// Stop after this many readings
        #[arg(long, short = 'n')]
        count: Option<u64>,
    },

    /// List available audio input devices
    Devices,

    /// Generate shell completions
    ///
    /// Prints a completion script for the given shell to stdout.
    /// Source or install the output to enable tab completion.
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, elvish, powershell)
        shell: Shell,
    },
}

fn load_config(cli: &Cli) -> Result<Config, BarkwatchError> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    Config::load(&path)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("barkwatch=debug,info")
    } else {
        EnvFilter::new("barkwatch=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = run(cli);
    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), BarkwatchError> {
    match cli.command {
        Command::Devices => run_devices(),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "barkwatch", &mut std::io::stdout());
            Ok(())
        }
        _ => run_with_config(cli),
    }
}

fn run_devices() -> Result<(), BarkwatchError> {
    let devices = audio::capture::list_input_devices()?;
    let default_name = audio::capture::default_input_device_name();

    if devices.is_empty() {
        println!("No audio input devices found.");
        return Ok(());
    }

    for (i, name) in devices.iter().enumerate() {
        let marker = if default_name.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("  {}: {name}{marker}", i + 1);
    }
    Ok(())
}

fn run_with_config(cli: Cli) -> Result<(), BarkwatchError> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Run => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(barkwatch::device::run_device(config))
        }
        Command::Capture => run_capture(&config),
        Command::Level { count } => run_level(&config, count),
        Command::Devices | Command::Completions { .. } => unreachable!(),
    }
}

fn run_capture(config: &Config) -> Result<(), BarkwatchError> {
    match barkwatch::device::capture_once(config)? {
        CaptureOutcome::Delivered(report) => {
            println!(
                "Uploaded {} ({} bytes{})",
                report.filename,
                report.payload_bytes,
                if report.truncated { ", truncated" } else { "" }
            );
            Ok(())
        }
        CaptureOutcome::Failed { stage, error } => Err(BarkwatchError::Other(format!(
            "capture failed while {stage}: {error}"
        ))),
        CaptureOutcome::Ignored => Ok(()),
    }
}

fn run_level(config: &Config, count: Option<u64>) -> Result<(), BarkwatchError> {
    let source = audio::shared(audio::open_source(config)?);
    let presence = presence::create_sensor(&config.presence)?;
    let mut monitor = SoundMonitor::new(&config.detection, source, presence, SessionHandle::new());

    let threshold = config.detection.threshold_db;
    let ticker = tick(config.detection.poll_interval());
    let mut taken = 0u64;

    while count.is_none_or(|n| taken < n) {
        ticker
            .recv()
            .map_err(|e| BarkwatchError::Other(format!("level ticker stopped: {e}")))?;
        match monitor.measure()? {
            Some(db) => {
                let marker = if db > threshold { " *" } else { "" };
                println!("{db:6.1} dB{marker}");
                taken += 1;
            }
            None => println!("   -- no audio"),
        }
    }
    Ok(())
}

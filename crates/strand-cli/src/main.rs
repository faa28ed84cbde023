//! Strand CLI - Command-line player for the Strand orchestration core
//!
//! Features:
//! - Local file playback through GStreamer
//! - Keyboard-style control over stdin (play/pause, seek, quality)
//! - Live telemetry output (TTFF, frame interval percentiles)
//! - GStreamer installation check
//! - Headless simulation against the in-memory engine

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod input;
mod output;

/// Strand CLI - Playback orchestration toolkit
#[derive(Parser)]
#[command(name = "strand")]
#[command(version)]
#[command(about = "Media playback with dynamic stream routing and frame telemetry", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format for telemetry and reports (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,

    /// Log format (text, json)
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a local media file
    Play {
        /// Path to the media file
        path: String,

        /// Pre-decrypted copy produced by an external provisioning step
        #[arg(long)]
        decrypted: Option<String>,

        /// Video sink factory to try first
        #[arg(long)]
        sink: Option<String>,

        /// Decryptor element factory for protected streams
        #[arg(long)]
        decryptor: Option<String>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Check the GStreamer installation
    Check,

    /// Run a scripted session against the in-memory engine
    Simulate {
        /// Simulated media duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Frames per second
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Expose protected streams
        #[arg(long)]
        protected: bool,

        /// Include a decryptor stage
        #[arg(long)]
        decryptor: bool,
    },
}

fn init_logging(verbose: bool, log_format: &str) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, &cli.log_format);
    strand_core::init();

    match cli.command {
        Commands::Play { path, decrypted, sink, decryptor, config } => {
            let options = commands::PlayOptions {
                path,
                decrypted,
                sink,
                decryptor,
                config,
            };
            commands::play(options, &cli.format).await?;
        }
        Commands::Check => {
            commands::check(&cli.format)?;
        }
        Commands::Simulate { duration, fps, protected, decryptor } => {
            let options = commands::SimulateOptions {
                duration_secs: duration,
                fps,
                protected,
                decryptor,
            };
            commands::simulate(options, &cli.format).await?;
        }
    }

    Ok(())
}

//! phraser - phrase segmentation and humanization for MIDI files
//!
//! Subcommands:
//! - `phraser segment <input> <output-dir>` - Split a part into one file per phrase
//! - `phraser humanize <input> <output>` - Add articulation and dynamics to a melody/bass pair
//! - `phraser trills <input>` - List detected trills
//! - `phraser key <input>` - Estimate the key
//! - `phraser config` - Show the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phrasingconf::PhrasingConfig;

mod commands;

#[derive(Parser)]
#[command(name = "phraser")]
#[command(about = "Phrase segmentation and expressive humanization for MIDI files")]
#[command(version)]
struct Cli {
    /// Config file to load instead of ./phrasing.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split one part into phrases, writing a MIDI file per phrase
    Segment {
        /// Input MIDI file
        input: PathBuf,

        /// Directory for the phrase files (created if missing)
        output_dir: PathBuf,

        /// Which part (track with notes, 0-based) to segment
        #[arg(short, long, default_value = "0")]
        track: usize,

        /// Key of the piece, e.g. "C", "F#m", "Bb minor". Estimated when omitted.
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Humanize a performance: part 0 is the melody, part 1 the bass
    Humanize {
        /// Input MIDI file
        input: PathBuf,

        /// Output MIDI file
        output: PathBuf,

        /// Seed for the velocity jitter
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// List trills in one part
    Trills {
        /// Input MIDI file
        input: PathBuf,

        /// Which part (track with notes, 0-based) to scan
        #[arg(short, long, default_value = "0")]
        track: usize,
    },

    /// Estimate the key of a file from all of its parts
    Key {
        /// Input MIDI file
        input: PathBuf,
    },

    /// Print the effective configuration and where it came from
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = PhrasingConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    // Results go to stdout, logs to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Segment {
            input,
            output_dir,
            track,
            key,
        } => {
            commands::segment(&config, &input, &output_dir, track, key.as_deref())?;
        }
        Commands::Humanize {
            input,
            output,
            seed,
        } => {
            commands::humanize(&config, &input, &output, seed)?;
        }
        Commands::Trills { input, track } => {
            commands::trills(&config, &input, track)?;
        }
        Commands::Key { input } => {
            commands::key(&input)?;
        }
        Commands::Config => {
            commands::show_config(&config, &sources)?;
        }
    }

    Ok(())
}

//! Montage CLI: merge, crop, overlay and generate videos, or record from a camera.
//!
//! Usage:
//!   montage merge <FILES>...              Concatenate media files
//!   montage pair <VIDEO> <AUDIO>          Put the sound of one file under the picture of another
//!   montage crop <FILE> --start --end     Export part of a file
//!   montage generate <IMAGES>...          Build a video from still images
//!   montage overlay <FILE> --spec <JSON>  Burn overlays into a video
//!   montage record                        Record from the camera (gst builds)
//!   montage probe <FILE>                  Show what a media file contains

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use montage_common::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "montage",
    about = "Media composition and capture toolkit",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Concatenate media files in order
    Merge {
        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Export audio only
        #[arg(long)]
        audio: bool,
    },

    /// Combine the picture of one file with the sound of another
    Pair {
        video: PathBuf,
        audio: PathBuf,
    },

    /// Export the part of a file between two times
    Crop {
        file: PathBuf,

        /// Start time in seconds
        #[arg(long)]
        start: f64,

        /// End time in seconds
        #[arg(long)]
        end: f64,

        /// Export audio only
        #[arg(long)]
        audio: bool,
    },

    /// Build a video from still images
    Generate {
        /// Image files, one per frame
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Show a single image for this many seconds instead
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Burn overlays described in a JSON file into a video
    Overlay {
        file: PathBuf,

        /// Overlay description file
        #[arg(long)]
        spec: PathBuf,
    },

    /// Record from the camera and microphone until Ctrl+C
    Record {
        /// Use the front camera
        #[arg(long)]
        front: bool,

        /// Stop after this many seconds
        #[arg(long)]
        max_duration: Option<f64>,
    },

    /// Show what a media file contains
    Probe { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load();
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    montage_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Merge { files, audio } => commands::media::merge(&config, files, audio).await,
        Commands::Pair { video, audio } => commands::media::pair(&config, video, audio).await,
        Commands::Crop {
            file,
            start,
            end,
            audio,
        } => commands::media::crop(&config, file, start, end, audio).await,
        Commands::Generate { images, duration } => {
            commands::media::generate(&config, images, duration).await
        }
        Commands::Overlay { file, spec } => commands::overlay::run(&config, file, spec).await,
        Commands::Record {
            front,
            max_duration,
        } => commands::record::run(&config, front, max_duration).await,
        Commands::Probe { file } => commands::media::probe(&config, file),
    }
}

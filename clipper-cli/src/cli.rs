use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "clipper", author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "CLIPPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Clip the current live edge of a channel
    Clip {
        /// Channel name
        channel: String,

        /// Playlist URL to clip instead of deriving one from the channel
        #[arg(long)]
        source_url: Option<String>,

        /// Platform used to derive the playlist URL
        #[arg(long, value_enum, default_value_t = Platform::Twitch)]
        platform: Platform,

        /// Directory clips are written under (`<dir>/<channel>/<id>.<format>`)
        #[arg(short = 'o', long, env = "CLIPPER_CLIPS_DIR")]
        output_dir: Option<PathBuf>,

        /// Container format of the clip
        #[arg(long)]
        container: Option<String>,

        /// Path to the ffmpeg binary
        #[arg(long, env = "CLIPPER_FFMPEG")]
        ffmpeg: Option<String>,

        /// Maximum concurrent segment downloads (0 = unlimited)
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Result output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },

    /// Configuration management
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,

        /// Write the default configuration to the config file
        #[arg(long, conflicts_with = "show")]
        reset: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    /// Twitch master playlists through the configured proxy template
    Twitch,
    /// Use `--source-url` as is
    Direct,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable output
    Pretty,
    /// JSON response body
    Json,
}

impl Args {
    pub fn output_format(&self) -> Option<OutputFormat> {
        match &self.command {
            Commands::Clip { format, .. } => Some(*format),
            Commands::Config { .. } => None,
        }
    }
}

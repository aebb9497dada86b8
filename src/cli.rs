use clap::{Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

use crate::ui::OutputFormat;

/// Merge a video with a music track, optionally ducking the original audio
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Output format for messages
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Put a music track under a video and export it as MP4
    Merge(MergeArgs),
    /// Show which FFmpeg engine will be used
    Engine(EngineArgs),
    /// Show the configuration file and its values
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    /// Source video file (mp4, mov, mkv, avi)
    #[arg(value_hint = ValueHint::FilePath)]
    pub video: PathBuf,

    /// Music file (mp3, wav, m4a, aac, flac)
    #[arg(value_hint = ValueHint::FilePath)]
    pub music: PathBuf,

    /// Output path; defaults to <videoname>_with_music.mp4 next to the video
    #[arg(short = 'o', long = "out-file", value_hint = ValueHint::FilePath)]
    pub out_file: Option<PathBuf>,

    /// Keep the original video audio under the music
    #[arg(long, overrides_with = "no_duck")]
    pub duck: bool,

    /// Replace the original video audio entirely
    #[arg(long, overrides_with = "duck")]
    pub no_duck: bool,

    /// Music volume as a fraction (0.0-1.0)
    #[arg(long, allow_negative_numbers = true)]
    pub music_level: Option<f64>,

    /// Original audio volume as a fraction (0.0-1.0)
    #[arg(long, allow_negative_numbers = true)]
    pub original_level: Option<f64>,

    /// Overwrite an existing output file
    #[arg(long)]
    pub force: bool,

    /// Cancel the merge if it runs longer than this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Show raw ffmpeg output instead of only the progress bar
    #[arg(long)]
    pub verbose: bool,
}

impl MergeArgs {
    /// Resolve the ducking flags against the configured default.
    pub fn duck_with_default(&self, default: bool) -> bool {
        if self.no_duck {
            false
        } else if self.duck {
            true
        } else {
            default
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Look for FFmpeg again instead of using the status found at startup
    #[arg(long)]
    pub refresh: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn merge_accepts_levels_and_flags() {
        let cli = parse(&[
            "musicmerge",
            "merge",
            "clip.mp4",
            "song.mp3",
            "-o",
            "out.mp4",
            "--no-duck",
            "--music-level",
            "-0.5",
        ]);
        let Commands::Merge(args) = cli.command else {
            panic!("expected merge");
        };
        assert_eq!(args.out_file, Some(PathBuf::from("out.mp4")));
        assert_eq!(args.music_level, Some(-0.5));
        assert!(!args.duck_with_default(true));
    }

    #[test]
    fn ducking_defaults_to_config() {
        let cli = parse(&["musicmerge", "merge", "clip.mp4", "song.mp3"]);
        let Commands::Merge(args) = cli.command else {
            panic!("expected merge");
        };
        assert!(args.duck_with_default(true));
        assert!(!args.duck_with_default(false));
    }

    #[test]
    fn json_output_is_global() {
        let cli = parse(&["musicmerge", "engine", "--output", "json", "--refresh"]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Engine(EngineArgs { refresh: true })));
    }
}

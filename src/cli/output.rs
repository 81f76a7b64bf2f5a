//! Output formatting for resolved videos

use crate::cli::args::VerbosityLevel;
use crate::core::video_info::{ResolvedStream, Video};
use colored::Colorize;

/// Output formatter for tuberesolve
pub struct OutputFormatter {
    verbosity: VerbosityLevel,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self { verbosity }
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        self.verbosity
    }

    /// Print warning message
    pub fn warning(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            eprintln!("{} {}", "warning:".yellow().bold(), message);
        }
    }

    /// Print error message
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "error:".red().bold(), message);
    }

    /// Print the video header and one line per stream
    pub fn print_video(&self, video: &Video, streams: &[&ResolvedStream]) {
        if self.verbosity == VerbosityLevel::Quiet {
            for stream in streams {
                println!("{}", stream.url);
            }
            return;
        }

        println!("{}", video.title().bold());
        if let Some(id) = video.video_id() {
            println!("{} {}", "id:".dimmed(), id);
        }
        println!(
            "{} of {} streams",
            streams.len().to_string().green(),
            video.len()
        );
        println!();

        for stream in streams {
            println!("  {}", format_stream_line(stream));
            if self.verbosity == VerbosityLevel::Verbose {
                println!("    {}", stream.url.dimmed());
            }
        }
    }

    /// Print streams as pretty JSON
    pub fn print_json(&self, streams: &[&ResolvedStream]) -> Result<(), serde_json::Error> {
        println!("{}", serde_json::to_string_pretty(streams)?);
        Ok(())
    }
}

/// One-line summary of a stream
pub fn format_stream_line(stream: &ResolvedStream) -> String {
    let profile = &stream.quality_profile;
    format!(
        "itag={:<4} {:<5} {:<6} {} ({}) | {} {}k | {}",
        stream.itag,
        profile.container,
        profile.resolution,
        profile.video_codec,
        profile.profile,
        profile.audio_codec,
        profile.audio_bitrate,
        stream.file_name()
    )
}

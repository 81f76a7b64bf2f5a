//! Command line argument parsing

use crate::platform::client::HttpClientConfig;
use crate::platform::formats::StreamFilter;
use clap::Parser;
use std::time::Duration;

/// Resolve playable, signed stream URLs from a video page
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Video page URL
    pub url: String,

    /// Only streams with this container (e.g., 'mp4', 'webm')
    #[arg(short, long, value_name = "EXT")]
    pub ext: Option<String>,

    /// Only streams with this resolution (e.g., '720p')
    #[arg(short, long, value_name = "RES")]
    pub resolution: Option<String>,

    /// Only streams with this codec profile (e.g., 'High', '3D')
    #[arg(short, long, value_name = "PROFILE")]
    pub profile: Option<String>,

    /// Print the matching stream URL and exit
    #[arg(short = 'g', long)]
    pub print_url: bool,

    /// Print streams as JSON
    #[arg(long, conflicts_with = "print_url")]
    pub json: bool,

    /// HTTP timeout (e.g., 30s, 1m)
    #[arg(long, value_name = "DURATION", default_value = "30s")]
    pub timeout: humantime::Duration,

    /// Override User-Agent header
    #[arg(long, value_name = "USER_AGENT")]
    pub user_agent: Option<String>,

    /// Proxy URL (http/https/socks)
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet output (only errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Get HTTP timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        self.timeout.into()
    }

    /// HTTP client settings from the flags
    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.timeout_duration(),
            user_agent: self.user_agent.clone(),
            proxy_url: self.proxy.clone(),
        }
    }

    /// Stream filter from `--ext`, `--resolution` and `--profile`
    pub fn stream_filter(&self) -> StreamFilter {
        StreamFilter {
            extension: self.ext.clone(),
            resolution: self.resolution.clone(),
            profile: self.profile.clone(),
        }
    }

    /// Check if any stream filter flag was given
    pub fn has_filter(&self) -> bool {
        self.ext.is_some() || self.resolution.is_some() || self.profile.is_some()
    }

    /// Get output verbosity level
    pub fn verbosity_level(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

/// Output verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityLevel {
    /// Quiet (only errors)
    Quiet,
    /// Normal
    Normal,
    /// Verbose (debug info)
    Verbose,
}

impl VerbosityLevel {
    /// Default log filter directive for this level
    pub fn log_directive(&self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "info",
            VerbosityLevel::Verbose => "debug",
        }
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            url: String::new(),
            ext: None,
            resolution: None,
            profile: None,
            print_url: false,
            json: false,
            timeout: humantime::Duration::from(Duration::from_secs(30)),
            user_agent: None,
            proxy: None,
            verbose: false,
            quiet: false,
        }
    }
}

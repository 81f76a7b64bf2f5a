//! Main entry point for the tuberesolve CLI

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tuberesolve::cli::{Args, OutputFormatter, VerbosityLevel};
use tuberesolve::core::video_info::ResolvedStream;
use tuberesolve::platform::client::VideoClient;
use tuberesolve::utils::is_video_url;
use tuberesolve::{ResolveError, StreamResolver};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let formatter = OutputFormatter::new(args.verbosity_level());

    if let Err(e) = init_logging(args.verbosity_level()) {
        formatter.error(&format!("{:#}", e));
        std::process::exit(2);
    }

    if let Err(e) = run(&args, &formatter).await {
        formatter.error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(args: &Args, formatter: &OutputFormatter) -> Result<()> {
    debug!("Parsed args: {:?}", args);
    if !is_video_url(&args.url) {
        formatter.warning(&format!("{} is not a known video page URL", args.url));
    }

    let client = VideoClient::with_config(args.http_config()).context("building HTTP client")?;
    let resolver = StreamResolver::new(client);
    let video = resolver
        .resolve(&args.url)
        .await
        .with_context(|| format!("resolving {}", args.url))?;

    if video.is_empty() {
        formatter.warning("no playable streams were resolved");
    }

    let filter = args.stream_filter();
    if args.print_url {
        let stream = if args.has_filter() {
            video.get(&filter)?
        } else {
            video.best().ok_or(ResolveError::NoMatch)?
        };
        info!("Selected itag {} ({})", stream.itag, stream.resolution());
        println!("{}", stream.url);
        return Ok(());
    }

    let streams: Vec<&ResolvedStream> = video.filter(&filter);
    if args.json {
        formatter.print_json(&streams)?;
    } else {
        formatter.print_video(&video, &streams);
    }
    Ok(())
}

/// Initialize logging system
fn init_logging(verbosity: VerbosityLevel) -> Result<()> {
    // RUST_LOG wins over the verbosity flags
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(verbosity.log_directive()))
        .context("invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .context("installing log subscriber")?;

    Ok(())
}

mod error;
mod probe;

use std::path::PathBuf;
use std::process;

use chunk_demuxer::TimeDelta;
use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::error::Result;
use crate::probe::{ProbeOptions, probe};

/// Feeds a WebM file through the chunk demuxer in fixed-size pieces and
/// prints what each stream delivered.
#[derive(Debug, Parser)]
#[command(name = "chunkprobe", version, about)]
struct Args {
    /// WebM file to read
    input: PathBuf,

    /// MIME type with codecs, as a media source would declare it
    #[arg(
        short = 't',
        long = "type",
        default_value = r#"video/webm; codecs="vorbis,vp8""#
    )]
    mime_type: String,

    /// Bytes per append call
    #[arg(short, long, default_value_t = 4096)]
    chunk_size: usize,

    /// Seek to this position (milliseconds) before reading
    #[arg(long)]
    seek: Option<i64>,

    /// Print every delivered buffer (timestamp, duration, size, keyframe)
    #[arg(short, long)]
    dump: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let data = tokio::fs::read(&args.input).await?;
    info!("Read {} bytes from {}", data.len(), args.input.display());

    let name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chunkprobe".to_string());
    let options = ProbeOptions {
        mime_type: args.mime_type,
        chunk_size: args.chunk_size,
        seek: args.seek.map(TimeDelta::from_millis),
        dump: args.dump,
    };

    let report = probe(&name, &data, &options).await?;

    println!("duration: {} ms", report.duration);
    println!("buffered: {}", report.buffered);
    for (stream_type, summary) in &report.streams {
        println!("{stream_type}: {summary}");
    }
    for error in &report.errors {
        println!("error: {error}");
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

use anyhow::{Context, Result};
use clap::Parser;
use humansize::{format_size, DECIMAL};
use log::{error, info, LevelFilter};
use squeeze::{
    compress_with_ffmpeg, paths::default_output_path, CompressConfig, CompressOptions,
    CompressOutcome, CompressRequest, EncodingTarget,
};
use std::path::PathBuf;

/// Re-encode a video until it fits under a target file size
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video file to compress
    file_path: PathBuf,

    /// Target size in MiB
    target_size: u64,

    /// Accepted undershoot below the target, in percent
    #[arg(short = 't', default_value_t = 10)]
    tolerance: u32,

    /// Output file (default: "<name> (compressed).<ext>" next to the input)
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// Keep the source frame rate instead of capping it
    #[arg(long)]
    keep_framerate: bool,

    /// Use the slower, higher quality encoder preset for the final pass
    #[arg(long)]
    extra_quality: bool,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with -v
    env_logger::Builder::new()
        .filter_level(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let cfg = CompressConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    if !args.file_path.is_file() {
        error!("Input file not found: {}", args.file_path.display());
        std::process::exit(1);
    }

    let target = EncodingTarget::from_cli(args.target_size, args.tolerance)
        .context("Invalid target size or tolerance")?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.file_path));

    let request = CompressRequest {
        input: args.file_path.clone(),
        output,
        target,
        options: CompressOptions {
            keep_framerate: args.keep_framerate,
            extra_quality: args.extra_quality,
        },
    };

    info!(
        "Compressing {} to at most {} MiB -> {}",
        request.input.display(),
        args.target_size,
        request.output.display()
    );

    match compress_with_ffmpeg(&cfg, &request).await {
        Ok(CompressOutcome::AlreadySatisfied { size_bytes }) => {
            error!(
                "File is already {} which is within the {} MiB target, nothing to do",
                format_size(size_bytes, DECIMAL),
                args.target_size
            );
            std::process::exit(1);
        }
        Ok(CompressOutcome::Converged(summary)) => {
            let report = &summary.report;
            println!("Done: {}", report.output.display());
            println!("  Original size: {}", format_size(summary.before_size_bytes, DECIMAL));
            println!(
                "  New size:      {} ({})",
                format_mib(report.final_size_bytes),
                format_size(report.final_size_bytes, DECIMAL)
            );
            println!("  Of target:     {:.2}%", report.percent_of_target);
            println!("  Attempts:      {}", report.attempts);
            println!("  Elapsed:       {:.1}s", report.elapsed.as_secs_f64());
            Ok(())
        }
        Err(e) => {
            error!("Compression failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Sizes in the unit the target is given in
fn format_mib(bytes: u64) -> String {
    format!("{:.2} MiB", bytes as f64 / (1024.0 * 1024.0))
}

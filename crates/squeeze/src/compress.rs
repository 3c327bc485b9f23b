use std::path::{Path, PathBuf};
use log::{debug, info};
use crate::config::CompressConfig;
use crate::controller::{CompressOptions, ConvergenceController, ConvergenceReport, EncodingTarget};
use crate::encoder::{Encoder, FfmpegEncoder};
use crate::error::CompressError;
use crate::ffprobe::{probe_profile, FfprobeProber, Prober};
use crate::streamable::{normalize, FfmpegRemuxer, Remuxer};

/// One input file to shrink toward a size
#[derive(Debug, Clone)]
pub struct CompressRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target: EncodingTarget,
    pub options: CompressOptions,
}

#[derive(Debug, Clone)]
pub struct CompressReport {
    pub before_size_bytes: u64,
    pub report: ConvergenceReport,
}

#[derive(Debug, Clone)]
pub enum CompressOutcome {
    /// The input is already at or under the target; nothing was written
    AlreadySatisfied { size_bytes: u64 },
    Converged(CompressReport),
}

/// Run a full compression: size check, fast-start normalization, probing,
/// then the convergence loop. Temporary files are gone when this returns.
pub async fn compress<P, E, R>(
    config: &CompressConfig,
    prober: &P,
    encoder: &E,
    remuxer: &R,
    request: &CompressRequest,
) -> Result<CompressOutcome, CompressError>
where
    P: Prober + ?Sized,
    E: Encoder + ?Sized,
    R: Remuxer + ?Sized,
{
    let before_size_bytes = file_size(&request.input).await?;
    if before_size_bytes <= request.target.target_size_bytes {
        info!(
            "{} is already {} bytes, at or under the {} byte target",
            request.input.display(),
            before_size_bytes,
            request.target.target_size_bytes
        );
        return Ok(CompressOutcome::AlreadySatisfied {
            size_bytes: before_size_bytes,
        });
    }

    let working = normalize(remuxer, &request.input, config.streamable_probe_bytes).await?;

    let audio_dir = tempfile::Builder::new()
        .prefix("squeeze-audio")
        .tempdir()
        .map_err(|e| CompressError::io(std::env::temp_dir(), e))?;
    // matroska audio takes whatever codec is configured
    let audio_scratch = audio_dir.path().join("audio.mka");

    let source = probe_profile(prober, working.path(), &audio_scratch).await?;
    drop(audio_dir);
    debug!("Source profile: {:?}", source);

    let controller = ConvergenceController::new(config.controller_settings(), encoder);
    let report = controller
        .run(working.path(), &request.output, &source, &request.target, request.options)
        .await?;

    Ok(CompressOutcome::Converged(CompressReport {
        before_size_bytes,
        report,
    }))
}

/// [`compress`] with the ffmpeg-backed prober, encoder and remuxer
pub async fn compress_with_ffmpeg(
    config: &CompressConfig,
    request: &CompressRequest,
) -> Result<CompressOutcome, CompressError> {
    let prober = FfprobeProber::new(config);
    let encoder = FfmpegEncoder::new(config);
    let remuxer = FfmpegRemuxer::new(config);
    compress(config, &prober, &encoder, &remuxer, request).await
}

async fn file_size(path: &Path) -> Result<u64, CompressError> {
    Ok(tokio::fs::metadata(path)
        .await
        .map_err(|e| CompressError::io(path, e))?
        .len())
}

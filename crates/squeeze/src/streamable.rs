//! Fast-start detection and normalization.
//!
//! The check is a heuristic over the first bytes of the file, not a container
//! parse. Anything it cannot classify is treated as streamable so no remux is
//! attempted.

use std::io::Read;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use log::{debug, info};
use crate::config::CompressConfig;
use crate::error::{CompressError, ExecError, RemuxError};
use crate::ffmpeg::{CommandBuilder, FFmpegRunner};
use crate::paths::streamable_copy;
use tempfile::TempPath;

/// Index box marker
const INDEX_MARKER: &[u8; 4] = b"moov";
/// Media data box marker
const DATA_MARKER: &[u8; 4] = b"mdat";

fn find_marker(prefix: &[u8], marker: &[u8; 4]) -> Option<usize> {
    prefix.windows(marker.len()).position(|w| w == marker)
}

/// Classify a file prefix. Only "media data before index" is non-streamable.
pub fn is_streamable(prefix: &[u8]) -> bool {
    match (find_marker(prefix, INDEX_MARKER), find_marker(prefix, DATA_MARKER)) {
        (Some(index), Some(data)) => index < data,
        _ => true,
    }
}

/// Read at most `probe_bytes` from the start of `path` and classify them
pub fn is_streamable_file(path: &Path, probe_bytes: usize) -> std::io::Result<bool> {
    let mut prefix = Vec::with_capacity(probe_bytes);
    std::fs::File::open(path)?
        .take(probe_bytes as u64)
        .read_to_end(&mut prefix)?;
    Ok(is_streamable(&prefix))
}

/// Rewrites a file so its index precedes the media data
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn make_streamable(&self, input: &Path, output: &Path) -> Result<(), RemuxError>;
}

/// [`Remuxer`] that stream-copies through ffmpeg with `+faststart`
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    runner: FFmpegRunner,
}

impl FfmpegRemuxer {
    pub fn new(cfg: &CompressConfig) -> Self {
        Self {
            runner: FFmpegRunner::new(cfg.ffmpeg_bin.clone()),
        }
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn make_streamable(&self, input: &Path, output: &Path) -> Result<(), RemuxError> {
        let args = CommandBuilder::build_faststart_command(input, output);
        let result = self.runner.execute_ffmpeg(&args, None).await.map_err(|e| match e {
            ExecError::Spawn { bin, source } => RemuxError::Spawn { bin, source },
            other => RemuxError::Failed {
                exit_code: -1,
                stderr: other.to_string(),
            },
        })?;

        if !result.success {
            return Err(RemuxError::Failed {
                exit_code: result.exit_code.unwrap_or(-1),
                stderr: result.stderr,
            });
        }
        Ok(())
    }
}

/// The file the rest of the run reads from.
///
/// Holds the temporary fast-start copy, if one was made, and deletes it on drop.
#[derive(Debug)]
pub enum WorkingInput {
    Original(PathBuf),
    Remuxed(TempPath),
}

impl WorkingInput {
    pub fn path(&self) -> &Path {
        match self {
            WorkingInput::Original(path) => path,
            WorkingInput::Remuxed(copy) => copy,
        }
    }
}

/// Produce a working input with a fast-start layout, remuxing only when needed
pub async fn normalize<R: Remuxer + ?Sized>(
    remuxer: &R,
    input: &Path,
    probe_bytes: usize,
) -> Result<WorkingInput, CompressError> {
    let streamable = is_streamable_file(input, probe_bytes)
        .map_err(|e| CompressError::io(input, e))?;

    if streamable {
        debug!("{} already has a fast-start layout", input.display());
        return Ok(WorkingInput::Original(input.to_path_buf()));
    }

    let copy = streamable_copy(input).map_err(|e| CompressError::io(input, e))?;
    info!("Moving index to the front: {} -> {}", input.display(), copy.display());
    remuxer.make_streamable(input, &copy).await?;

    Ok(WorkingInput::Remuxed(copy))
}

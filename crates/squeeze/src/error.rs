use std::path::PathBuf;
use thiserror::Error;

/// Failures running an external tool, independent of its exit status
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {}: {source}", .bin.display())]
    Spawn {
        bin: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0} seconds")]
    TimedOut(u64),

    #[error(transparent)]
    Io(std::io::Error),
}

/// Metadata extraction failures
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe for {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ffprobe failed (exit code {exit_code}) for {}: {stderr}", .path.display())]
    Failed {
        path: PathBuf,
        exit_code: i32,
        stderr: String,
    },

    #[error("failed to parse ffprobe output for {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no video stream found in {}", .0.display())]
    NoVideoStream(PathBuf),

    #[error("missing or unreadable {field} in {}", .path.display())]
    MissingField { path: PathBuf, field: &'static str },
}

/// Which encoder pass an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Statistics,
    Final,
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pass::Statistics => write!(f, "pass 1"),
            Pass::Final => write!(f, "pass 2"),
        }
    }
}

/// Encoder invocation failures. None of these are retried.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to spawn encoder {}: {source}", .bin.display())]
    Spawn {
        bin: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder failed during {pass} (exit code {exit_code}): {stderr}")]
    EncoderFailed {
        pass: Pass,
        exit_code: i32,
        stderr: String,
    },

    #[error("encoder {pass} timed out after {secs} seconds and was killed")]
    TimedOut { pass: Pass, secs: u64 },

    #[error("encoder produced an empty file: {}", .0.display())]
    EmptyOutput(PathBuf),

    #[error("encoder I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fast-start remux failures
#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("failed to spawn remux tool {}: {source}", .bin.display())]
    Spawn {
        bin: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remux failed (exit code {exit_code}): {stderr}")]
    Failed { exit_code: i32, stderr: String },
}

/// Everything that ends a compression run early
#[derive(Debug, Error)]
pub enum CompressError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Remux(#[from] RemuxError),

    #[error("bitrate got too low ({bitrate_bps} bps on attempt {attempt}); target size is not reachable for this source")]
    BitrateFloorReached { bitrate_bps: u64, attempt: u32 },

    #[error("gave up after {attempts} attempts without landing inside the tolerance band")]
    AttemptsExhausted { attempts: u32 },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompressError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompressError::Io { path: path.into(), source }
    }
}

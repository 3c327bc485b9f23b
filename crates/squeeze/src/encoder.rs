use std::path::Path;
use async_trait::async_trait;
use log::debug;
use crate::config::CompressConfig;
use crate::error::{EncodeError, ExecError, Pass};
use crate::ffmpeg::{CommandBuilder, EncoderProfile, FFmpegRunner};
use crate::ffprobe::SourceProfile;

/// Parameters for a single encode attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptParameters {
    pub video_bitrate_bps: u32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub extra_quality: bool,
}

/// Black-box two-pass encoder. Overwrites `output` unconditionally.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        params: &AttemptParameters,
        source: &SourceProfile,
    ) -> Result<(), EncodeError>;
}

/// [`Encoder`] that runs ffmpeg twice: statistics pass, then final pass
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    runner: FFmpegRunner,
    profile: EncoderProfile,
    timeout_secs: Option<u64>,
}

impl FfmpegEncoder {
    pub fn new(cfg: &CompressConfig) -> Self {
        Self {
            runner: FFmpegRunner::new(cfg.ffmpeg_bin.clone()),
            profile: EncoderProfile::from_config(cfg),
            timeout_secs: cfg.encode_timeout_secs,
        }
    }

    async fn run_pass(&self, pass: Pass, args: &[String]) -> Result<(), EncodeError> {
        let result = self
            .runner
            .execute_ffmpeg(args, self.timeout_secs)
            .await
            .map_err(|e| match e {
                ExecError::Spawn { bin, source } => EncodeError::Spawn { bin, source },
                ExecError::TimedOut(secs) => EncodeError::TimedOut { pass, secs },
                ExecError::Io(e) => EncodeError::Io(e),
            })?;

        if !result.success {
            return Err(EncodeError::EncoderFailed {
                pass,
                exit_code: result.exit_code.unwrap_or(-1),
                stderr: result.stderr,
            });
        }

        debug!("Encoder {} finished", pass);
        Ok(())
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        params: &AttemptParameters,
        source: &SourceProfile,
    ) -> Result<(), EncodeError> {
        // pass log files live only as long as this attempt
        let passlog_dir = tempfile::Builder::new().prefix("squeeze-passlog").tempdir()?;
        let passlog_prefix = passlog_dir.path().join("ffmpeg2pass");

        let builder = CommandBuilder::new(&self.profile);

        let first = builder.build_first_pass_command(input, &passlog_prefix, params, source);
        self.run_pass(Pass::Statistics, &first).await?;

        let second = builder.build_final_pass_command(input, output, &passlog_prefix, params, source);
        self.run_pass(Pass::Final, &second).await
    }
}

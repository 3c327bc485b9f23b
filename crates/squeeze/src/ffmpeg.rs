use std::path::{Path, PathBuf};
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use crate::config::CompressConfig;
use crate::encoder::AttemptParameters;
use crate::error::ExecError;
use crate::ffprobe::SourceProfile;

/// Null muxer target for the statistics pass
#[cfg(windows)]
pub const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
pub const NULL_DEVICE: &str = "/dev/null";

/// Output extensions that get the fast-start flag on the final pass
const FASTSTART_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov"];

/// Result from FFmpeg execution
#[derive(Debug, Clone)]
pub struct FFmpegResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// Spawns ffmpeg and collects its stderr
#[derive(Debug, Clone)]
pub struct FFmpegRunner {
    pub ffmpeg_bin: PathBuf,
}

impl FFmpegRunner {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self { ffmpeg_bin: ffmpeg_bin.into() }
    }

    /// Execute ffmpeg with the given arguments and an optional wall-clock limit.
    ///
    /// A non-zero exit is reported through [`FFmpegResult::success`], not as an error;
    /// only spawn failures and timeouts are errors. A timed-out child is killed.
    pub async fn execute_ffmpeg(
        &self,
        args: &[String],
        timeout_secs: Option<u64>,
    ) -> Result<FFmpegResult, ExecError> {
        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(args);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            bin: self.ffmpeg_bin.clone(),
            source,
        })?;

        let stderr = child.stderr.take();

        let stderr_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(stderr) = stderr {
                let mut line_stream = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = line_stream.next_line().await {
                    lines.push(line);
                }
            }
            lines.join("\n")
        });

        let status = match timeout_secs {
            Some(secs) => match timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(result) => result.map_err(ExecError::Io)?,
                Err(_) => {
                    child.kill().await.map_err(ExecError::Io)?;
                    return Err(ExecError::TimedOut(secs));
                }
            },
            None => child.wait().await.map_err(ExecError::Io)?,
        };

        let stderr = stderr_handle.await.unwrap_or_default();

        Ok(FFmpegResult {
            success: status.success(),
            exit_code: status.code(),
            stderr,
        })
    }
}

/// Encoder settings that stay fixed across attempts
#[derive(Debug, Clone)]
pub struct EncoderProfile {
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub extra_quality_preset: String,
}

impl EncoderProfile {
    pub fn from_config(cfg: &CompressConfig) -> Self {
        Self {
            video_codec: cfg.video_codec.clone(),
            audio_codec: cfg.audio_codec.clone(),
            preset: cfg.preset.clone(),
            extra_quality_preset: cfg.extra_quality_preset.clone(),
        }
    }
}

/// Command builder for generating FFmpeg command lines
pub struct CommandBuilder<'a> {
    profile: &'a EncoderProfile,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(profile: &'a EncoderProfile) -> Self {
        CommandBuilder { profile }
    }

    /// Video filter chain for an attempt, if any filter is needed.
    ///
    /// Scaling is skipped when the attempt keeps the source size, and the frame
    /// rate filter only appears when the attempt changes the rate.
    pub fn video_filters(params: &AttemptParameters, source: &SourceProfile) -> Option<String> {
        let mut filters = Vec::new();

        if (params.width, params.height) != (source.width, source.height) {
            filters.push(format!("scale={}:{}", params.width, params.height));
        }
        if params.frame_rate != source.frame_rate {
            filters.push(format!("fps={}", params.frame_rate));
        }

        if filters.is_empty() {
            None
        } else {
            Some(filters.join(","))
        }
    }

    fn push_video_args(
        &self,
        args: &mut Vec<String>,
        input: &Path,
        params: &AttemptParameters,
        source: &SourceProfile,
        preset: &str,
    ) {
        args.extend(["-y", "-hide_banner", "-loglevel", "error", "-i"].map(String::from));
        args.push(input.to_string_lossy().to_string());

        if let Some(filters) = Self::video_filters(params, source) {
            args.push("-vf".to_string());
            args.push(filters);
        }

        args.push("-c:v".to_string());
        args.push(self.profile.video_codec.clone());
        args.push("-preset".to_string());
        args.push(preset.to_string());
        args.push("-b:v".to_string());
        args.push(params.video_bitrate_bps.to_string());
    }

    /// Pass 1: statistics only, no audio, output discarded
    pub fn build_first_pass_command(
        &self,
        input: &Path,
        passlog_prefix: &Path,
        params: &AttemptParameters,
        source: &SourceProfile,
    ) -> Vec<String> {
        let mut args = Vec::new();
        self.push_video_args(&mut args, input, params, source, &self.profile.preset);

        args.extend(["-pass", "1", "-passlogfile"].map(String::from));
        args.push(passlog_prefix.to_string_lossy().to_string());
        args.extend(["-an", "-f", "null", NULL_DEVICE].map(String::from));

        args
    }

    /// Pass 2: final muxed output using the pass 1 statistics
    pub fn build_final_pass_command(
        &self,
        input: &Path,
        output: &Path,
        passlog_prefix: &Path,
        params: &AttemptParameters,
        source: &SourceProfile,
    ) -> Vec<String> {
        let preset = if params.extra_quality {
            &self.profile.extra_quality_preset
        } else {
            &self.profile.preset
        };

        let mut args = Vec::new();
        self.push_video_args(&mut args, input, params, source, preset);

        args.extend(["-pass", "2", "-passlogfile"].map(String::from));
        args.push(passlog_prefix.to_string_lossy().to_string());
        args.push("-c:a".to_string());
        args.push(self.profile.audio_codec.clone());

        let wants_faststart = output
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FASTSTART_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if wants_faststart {
            args.extend(["-movflags", "+faststart"].map(String::from));
        }

        args.push(output.to_string_lossy().to_string());
        args
    }

    /// Audio-only re-encode used to measure the post-encode audio bitrate
    pub fn build_audio_probe_command(&self, input: &Path, scratch: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error", "-i"]
            .map(String::from)
            .to_vec();
        args.push(input.to_string_lossy().to_string());
        args.extend(["-vn", "-c:a"].map(String::from));
        args.push(self.profile.audio_codec.clone());
        args.push(scratch.to_string_lossy().to_string());
        args
    }

    /// Stream-copy remux that moves the index to the front
    pub fn build_faststart_command(input: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error", "-i"]
            .map(String::from)
            .to_vec();
        args.push(input.to_string_lossy().to_string());
        args.extend(["-map", "0", "-c", "copy", "-movflags", "+faststart"].map(String::from));
        args.push(output.to_string_lossy().to_string());
        args
    }
}

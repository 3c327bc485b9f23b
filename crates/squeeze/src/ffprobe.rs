use std::path::{Path, PathBuf};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use tokio::process::Command;
use crate::config::CompressConfig;
use crate::error::ProbeError;
use crate::ffmpeg::{CommandBuilder, EncoderProfile, FFmpegRunner};

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
    pub bit_rate: Option<String>,
}

impl FFProbeData {
    /// First video stream, if any
    pub fn video_stream(&self) -> Option<&FFProbeStream> {
        self.streams.iter().find(|s| s.codec_type.as_deref() == Some("video"))
    }

    /// First audio stream, if any
    pub fn audio_stream(&self) -> Option<&FFProbeStream> {
        self.streams.iter().find(|s| s.codec_type.as_deref() == Some("audio"))
    }

    /// Container duration in seconds
    pub fn duration_seconds(&self) -> Option<f64> {
        self.format
            .duration
            .as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
    }

    /// Audio bitrate from the first audio stream, falling back to the container bitrate
    pub fn audio_bitrate_bps(&self) -> Option<u32> {
        self.audio_stream()
            .and_then(|s| s.bit_rate.as_deref())
            .and_then(|b| b.trim().parse::<u32>().ok())
            .or_else(|| {
                self.format
                    .bit_rate
                    .as_deref()
                    .and_then(|b| b.trim().parse::<u32>().ok())
            })
            .filter(|b| *b > 0)
    }

    pub fn require_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        self.duration_seconds().ok_or_else(|| missing_field(path, "duration"))
    }

    pub fn require_video_stream(&self, path: &Path) -> Result<&FFProbeStream, ProbeError> {
        self.video_stream()
            .ok_or_else(|| ProbeError::NoVideoStream(path.to_path_buf()))
    }

    pub fn require_frame_rate(&self, path: &Path) -> Result<u32, ProbeError> {
        self.require_video_stream(path)?
            .r_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .ok_or_else(|| missing_field(path, "r_frame_rate"))
    }

    pub fn require_resolution(&self, path: &Path) -> Result<(u32, u32), ProbeError> {
        let stream = self.require_video_stream(path)?;
        stream
            .width
            .zip(stream.height)
            .filter(|(w, h)| *w > 0 && *h > 0)
            .ok_or_else(|| missing_field(path, "width/height"))
    }

    /// Duration, frame rate and resolution of the primary video stream
    pub fn video_info(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        let duration_seconds = self.require_duration(path)?;
        let frame_rate = self.require_frame_rate(path)?;
        let (width, height) = self.require_resolution(path)?;
        Ok(VideoInfo {
            duration_seconds,
            frame_rate,
            width,
            height,
        })
    }
}

fn missing_field(path: &Path, field: &'static str) -> ProbeError {
    ProbeError::MissingField {
        path: path.to_path_buf(),
        field,
    }
}

/// Parse an ffprobe rational frame rate ("30000/1001", "60/1") and round to whole fps
pub fn parse_frame_rate(frame_rate_str: &str) -> Option<u32> {
    let (num, den) = match frame_rate_str.trim().split_once('/') {
        Some((n, d)) => (n.parse::<f64>().ok()?, d.parse::<f64>().ok()?),
        None => (frame_rate_str.trim().parse::<f64>().ok()?, 1.0),
    };

    if den == 0.0 || num <= 0.0 {
        return None;
    }

    Some((num / den).round() as u32)
}

/// Container and video stream properties that come from one ffprobe run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub duration_seconds: f64,
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
}

/// Source properties gathered once before the first attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProfile {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub audio_bitrate_bps: Option<u32>,
}

/// Media metadata extraction
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError>;

    async fn probe_frame_rate(&self, path: &Path) -> Result<u32, ProbeError>;

    async fn probe_resolution(&self, path: &Path) -> Result<(u32, u32), ProbeError>;

    /// Duration, frame rate and resolution together. Implementations that can
    /// read all three at once should override this.
    async fn probe_video_info(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        let duration_seconds = self.probe_duration(path).await?;
        let frame_rate = self.probe_frame_rate(path).await?;
        let (width, height) = self.probe_resolution(path).await?;
        Ok(VideoInfo {
            duration_seconds,
            frame_rate,
            width,
            height,
        })
    }

    /// Re-encode the audio track alone into `scratch` and read back its bitrate.
    /// Returns `None` when nothing usable comes out (e.g. no audio track).
    async fn probe_audio_bitrate(&self, path: &Path, scratch: &Path) -> Option<u32>;
}

/// Gather the full source profile for a working input
pub async fn probe_profile<P: Prober + ?Sized>(
    prober: &P,
    path: &Path,
    audio_scratch: &Path,
) -> Result<SourceProfile, ProbeError> {
    let video = prober.probe_video_info(path).await?;
    let audio_bitrate_bps = prober.probe_audio_bitrate(path, audio_scratch).await;

    Ok(SourceProfile {
        duration_seconds: video.duration_seconds,
        width: video.width,
        height: video.height,
        frame_rate: video.frame_rate,
        audio_bitrate_bps,
    })
}

/// [`Prober`] backed by the ffprobe and ffmpeg binaries
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_bin: PathBuf,
    runner: FFmpegRunner,
    profile: EncoderProfile,
}

impl FfprobeProber {
    pub fn new(cfg: &CompressConfig) -> Self {
        Self {
            ffprobe_bin: cfg.ffprobe_bin.clone(),
            runner: FFmpegRunner::new(cfg.ffmpeg_bin.clone()),
            profile: EncoderProfile::from_config(cfg),
        }
    }

    /// Run ffprobe and parse the JSON output
    pub async fn probe_file(&self, file_path: &Path) -> Result<FFProbeData, ProbeError> {
        debug!("Executing FFprobe for: {}", file_path.display());

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(file_path)
            .output()
            .await
            .map_err(|source| ProbeError::Spawn {
                path: file_path.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: file_path.to_path_buf(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|source| ProbeError::Parse {
            path: file_path.to_path_buf(),
            source,
        })
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        self.probe_file(path).await?.require_duration(path)
    }

    async fn probe_frame_rate(&self, path: &Path) -> Result<u32, ProbeError> {
        self.probe_file(path).await?.require_frame_rate(path)
    }

    async fn probe_resolution(&self, path: &Path) -> Result<(u32, u32), ProbeError> {
        self.probe_file(path).await?.require_resolution(path)
    }

    /// One ffprobe run for all three properties
    async fn probe_video_info(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        self.probe_file(path).await?.video_info(path)
    }

    async fn probe_audio_bitrate(&self, path: &Path, scratch: &Path) -> Option<u32> {
        debug!(
            "Re-encoding audio of {} with {} into {}",
            path.display(),
            self.profile.audio_codec,
            scratch.display()
        );

        let args = CommandBuilder::new(&self.profile).build_audio_probe_command(path, scratch);
        let result = match self.runner.execute_ffmpeg(&args, None).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Could not run ffmpeg for audio bitrate probe: {}", e);
                return None;
            }
        };

        if !result.success {
            debug!("Audio re-encode produced nothing usable: {}", result.stderr.trim());
            return None;
        }

        match self.probe_file(scratch).await {
            Ok(data) => data.audio_bitrate_bps(),
            Err(e) => {
                warn!("Could not read audio bitrate back from scratch file: {}", e);
                None
            }
        }
    }
}

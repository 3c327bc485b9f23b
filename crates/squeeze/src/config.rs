use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Subtracted from the correction factor after an attempt overshoots the target.
pub const OVERSHOOT_DAMPING: f64 = 0.05;
/// Below this video bitrate (bps) the target size is considered infeasible.
pub const BITRATE_FLOOR_BPS: u32 = 1000;
/// Audio bitrate is only subtracted when at least this much video bitrate remains.
pub const MIN_VIDEO_BITRATE_AFTER_AUDIO_BPS: u32 = 1000;
/// Headroom for container and metadata overhead.
pub const BITRATE_SAFETY_MARGIN: f64 = 0.99;
/// Frame rate ceiling applied unless the caller keeps the source frame rate.
pub const MAX_FRAME_RATE: u32 = 30;
/// Number of leading bytes inspected when checking for a fast-start layout.
pub const STREAMABLE_PROBE_BYTES: usize = 8192;

/// Configuration for the size-targeting compressor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// ffmpeg video encoder used for both passes
    pub video_codec: String,
    /// ffmpeg audio encoder used for the final pass and the audio bitrate probe
    pub audio_codec: String,
    /// Encoder speed preset for regular runs
    pub preset: String,
    /// Encoder speed preset for the final pass when extra quality is requested
    pub extra_quality_preset: String,
    /// Frame rate ceiling (fps)
    pub max_frame_rate: u32,
    /// Flat correction subtracted from the factor after an overshoot
    pub overshoot_damping: f64,
    /// Minimum viable video bitrate in bps
    pub bitrate_floor_bps: u32,
    /// Minimum video bitrate that must remain after subtracting audio
    pub min_video_bitrate_after_audio_bps: u32,
    /// Multiplier applied to the initial bitrate estimate
    pub bitrate_safety_margin: f64,
    /// Give up after this many encode attempts (None = no limit)
    pub max_attempts: Option<u32>,
    /// Kill an encoder pass that runs longer than this many seconds
    pub encode_timeout_secs: Option<u64>,
    /// Bytes read from the head of the input for the fast-start check
    pub streamable_probe_bytes: usize,
}

/// Tuning knobs consumed by the convergence controller
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub overshoot_damping: f64,
    pub bitrate_floor_bps: u32,
    pub min_video_bitrate_after_audio_bps: u32,
    pub bitrate_safety_margin: f64,
    pub max_frame_rate: u32,
    pub max_attempts: Option<u32>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        CompressConfig::default_config().controller_settings()
    }
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl CompressConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "medium".to_string(),
            extra_quality_preset: "slow".to_string(),
            max_frame_rate: MAX_FRAME_RATE,
            overshoot_damping: OVERSHOOT_DAMPING,
            bitrate_floor_bps: BITRATE_FLOOR_BPS,
            min_video_bitrate_after_audio_bps: MIN_VIDEO_BITRATE_AFTER_AUDIO_BPS,
            bitrate_safety_margin: BITRATE_SAFETY_MARGIN,
            max_attempts: Some(25),
            encode_timeout_secs: None,
            streamable_probe_bytes: STREAMABLE_PROBE_BYTES,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // JSON unless the file says otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Project the controller tuning values out of the full configuration
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            overshoot_damping: self.overshoot_damping,
            bitrate_floor_bps: self.bitrate_floor_bps,
            min_video_bitrate_after_audio_bps: self.min_video_bitrate_after_audio_bps,
            bitrate_safety_margin: self.bitrate_safety_margin,
            max_frame_rate: self.max_frame_rate,
            max_attempts: self.max_attempts,
        }
    }
}

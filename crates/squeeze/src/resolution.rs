//! Bitrate-driven resolution and frame-rate selection.
//!
//! Presets are expressed in landscape terms. Selection works on the
//! orientation-normalized (long edge, short edge) of the source and swaps the
//! result back for portrait sources.

/// A minimum bitrate and the landscape resolution it can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionPreset {
    pub threshold_kbps: u32,
    pub width: u32,
    pub height: u32,
}

impl ResolutionPreset {
    const fn new(threshold_kbps: u32, width: u32, height: u32) -> Self {
        Self { threshold_kbps, width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Presets for sources at or below 30 fps, descending by threshold.
pub const PRESETS_UP_TO_30FPS: [ResolutionPreset; 6] = [
    ResolutionPreset::new(1600, 1920, 1080),
    ResolutionPreset::new(900, 1280, 720),
    ResolutionPreset::new(500, 854, 480),
    ResolutionPreset::new(300, 640, 360),
    ResolutionPreset::new(150, 426, 240),
    ResolutionPreset::new(0, 256, 144),
];

/// Presets for sources above 30 fps, descending by threshold.
pub const PRESETS_ABOVE_30FPS: [ResolutionPreset; 6] = [
    ResolutionPreset::new(2400, 1920, 1080),
    ResolutionPreset::new(1350, 1280, 720),
    ResolutionPreset::new(750, 854, 480),
    ResolutionPreset::new(450, 640, 360),
    ResolutionPreset::new(225, 426, 240),
    ResolutionPreset::new(0, 256, 144),
];

/// Preset table for a given frame rate
pub fn presets_for(frame_rate: u32) -> &'static [ResolutionPreset] {
    if frame_rate <= 30 {
        &PRESETS_UP_TO_30FPS
    } else {
        &PRESETS_ABOVE_30FPS
    }
}

/// Round to the nearest even number, never below 2
pub fn round_to_even(value: f64) -> u32 {
    let even = ((value / 2.0).round() * 2.0) as u32;
    even.max(2)
}

/// Pick the encoding resolution for a candidate video bitrate.
///
/// Returns `None` when the source is smaller than every preset; the caller
/// then keeps the source resolution.
pub fn select_resolution(
    candidate_bitrate_bps: u64,
    source_width: u32,
    source_height: u32,
    frame_rate: u32,
) -> Option<(u32, u32)> {
    let kbps = candidate_bitrate_bps / 1000;
    let source_pixels = source_width as u64 * source_height as u64;
    let portrait = source_width < source_height;
    let (long_edge, short_edge) = if portrait {
        (source_height, source_width)
    } else {
        (source_width, source_height)
    };

    let preset = presets_for(frame_rate)
        .iter()
        .find(|p| p.threshold_kbps as u64 <= kbps && p.pixels() <= source_pixels)?;

    let target_short = if preset.height <= short_edge {
        preset.height
    } else {
        (short_edge & !1).max(2)
    };
    let target_long = round_to_even(long_edge as f64 / (short_edge as f64 / target_short as f64))
        .min((long_edge & !1).max(2));

    if portrait {
        Some((target_short, target_long))
    } else {
        Some((target_long, target_short))
    }
}

/// Frame rate to encode at: the source rate, capped at `max_frame_rate` unless kept
pub fn target_frame_rate(source_frame_rate: u32, keep_framerate: bool, max_frame_rate: u32) -> u32 {
    if keep_framerate || source_frame_rate <= max_frame_rate {
        source_frame_rate
    } else {
        max_frame_rate
    }
}

//! The attempt loop that steers encoder bitrate toward a target file size.
//!
//! Each attempt encodes the whole input, measures the result and derives a
//! correction factor `target / output`. Overshoots get the factor pulled down
//! by a flat damping amount so the next attempt lands under the target rather
//! than oscillating around it.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use log::{debug, info};
use crate::config::ControllerSettings;
use crate::encoder::{AttemptParameters, Encoder};
use crate::error::{CompressError, EncodeError};
use crate::ffprobe::SourceProfile;
use crate::resolution::{select_resolution, target_frame_rate};

/// Desired output size and the accepted undershoot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodingTarget {
    pub target_size_bytes: u64,
    /// Accepted band above a factor of 1.0, e.g. 0.1 for 10%
    pub tolerance_fraction: f64,
}

impl EncodingTarget {
    pub fn new(target_size_bytes: u64, tolerance_fraction: f64) -> Result<Self, CompressError> {
        if target_size_bytes == 0 {
            return Err(CompressError::InvalidTarget("target size must be greater than zero".to_string()));
        }
        if !tolerance_fraction.is_finite() || tolerance_fraction < 0.0 {
            return Err(CompressError::InvalidTarget(format!(
                "tolerance must be a non-negative number, got {}",
                tolerance_fraction
            )));
        }
        Ok(Self {
            target_size_bytes,
            tolerance_fraction,
        })
    }

    /// Build from command line units: mebibytes and whole percent
    pub fn from_cli(target_mib: u64, tolerance_percent: u32) -> Result<Self, CompressError> {
        let bytes = target_mib
            .checked_mul(1024 * 1024)
            .ok_or_else(|| CompressError::InvalidTarget(format!("{} MiB is too large", target_mib)))?;
        Self::new(bytes, tolerance_percent as f64 / 100.0)
    }
}

/// Measured outcome of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptResult {
    pub output_size_bytes: u64,
    pub attempt_index: u32,
}

/// Correction factor carried between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceState {
    /// `target / output` after damping; 0.0 until the first attempt is measured
    pub factor: f64,
    pub attempt_index: u32,
}

impl Default for ConvergenceState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvergenceState {
    pub fn new() -> Self {
        Self {
            factor: 0.0,
            attempt_index: 0,
        }
    }

    /// At or under the target, and undershooting by no more than `tolerance`
    pub fn is_converged(&self, tolerance_fraction: f64) -> bool {
        self.factor >= 1.0 && self.factor <= 1.0 + tolerance_fraction
    }

    /// Multiplier for the next bitrate
    pub fn multiplier(&self) -> f64 {
        if self.factor == 0.0 {
            1.0
        } else {
            self.factor
        }
    }

    /// Fold a measured attempt into the state and return its percent of target
    pub fn absorb(&mut self, result: &AttemptResult, target_size_bytes: u64, overshoot_damping: f64) -> f64 {
        let percent = 100.0 * result.output_size_bytes as f64 / target_size_bytes as f64;
        self.factor = 100.0 / percent;
        if percent > 100.0 {
            self.factor -= overshoot_damping;
        }
        self.attempt_index = result.attempt_index;
        percent
    }
}

/// Caller switches that shape every attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressOptions {
    pub keep_framerate: bool,
    pub extra_quality: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub params: AttemptParameters,
    pub output_size_bytes: u64,
    pub percent_of_target: f64,
}

/// Summary of a converged run
#[derive(Debug, Clone)]
pub struct ConvergenceReport {
    pub output: PathBuf,
    pub final_size_bytes: u64,
    pub percent_of_target: f64,
    pub attempts: u32,
    pub elapsed: Duration,
    pub history: Vec<AttemptRecord>,
}

pub struct ConvergenceController<'a, E: Encoder + ?Sized> {
    settings: ControllerSettings,
    encoder: &'a E,
}

impl<'a, E: Encoder + ?Sized> ConvergenceController<'a, E> {
    pub fn new(settings: ControllerSettings, encoder: &'a E) -> Self {
        Self { settings, encoder }
    }

    /// First bitrate guess: the whole byte budget spread over the duration,
    /// minus audio when enough is left for video, minus the safety margin.
    pub fn initial_bitrate(&self, target: &EncodingTarget, source: &SourceProfile) -> u64 {
        let mut bitrate = (target.target_size_bytes as f64 * 8.0 / source.duration_seconds).round();

        if let Some(audio) = source.audio_bitrate_bps {
            let remaining = bitrate - audio as f64;
            if remaining >= self.settings.min_video_bitrate_after_audio_bps as f64 {
                bitrate = remaining;
            } else {
                debug!(
                    "Audio bitrate {} bps leaves too little for video, not subtracting it",
                    audio
                );
            }
        }

        (bitrate * self.settings.bitrate_safety_margin).round().max(0.0) as u64
    }

    /// Encode `input` into `output` until the size lands in the tolerance band.
    ///
    /// `output` is overwritten on every attempt; on error it holds whatever
    /// the last attempt left behind.
    pub async fn run(
        &self,
        input: &Path,
        output: &Path,
        source: &SourceProfile,
        target: &EncodingTarget,
        options: CompressOptions,
    ) -> Result<ConvergenceReport, CompressError> {
        let started = Instant::now();
        let frame_rate = target_frame_rate(source.frame_rate, options.keep_framerate, self.settings.max_frame_rate);
        if frame_rate != source.frame_rate {
            info!("Capping frame rate from {} to {} fps", source.frame_rate, frame_rate);
        }

        let mut bitrate = self.initial_bitrate(target, source);
        let mut state = ConvergenceState::new();
        let mut history = Vec::new();

        info!(
            "Targeting {} bytes (tolerance {:.0}%), initial video bitrate {} bps",
            target.target_size_bytes,
            target.tolerance_fraction * 100.0,
            bitrate
        );

        while !state.is_converged(target.tolerance_fraction) {
            let attempt = state.attempt_index + 1;
            if let Some(max) = self.settings.max_attempts {
                if attempt > max {
                    return Err(CompressError::AttemptsExhausted { attempts: max });
                }
            }

            bitrate = (bitrate as f64 * state.multiplier()).round().max(0.0) as u64;
            if bitrate < self.settings.bitrate_floor_bps as u64 {
                return Err(CompressError::BitrateFloorReached {
                    bitrate_bps: bitrate,
                    attempt,
                });
            }

            let (width, height) = select_resolution(bitrate, source.width, source.height, frame_rate)
                .unwrap_or((source.width, source.height));
            let params = AttemptParameters {
                video_bitrate_bps: u32::try_from(bitrate).unwrap_or(u32::MAX),
                width,
                height,
                frame_rate,
                extra_quality: options.extra_quality,
            };

            info!(
                "Attempt {}: {} kbps, {}x{} @ {} fps",
                attempt,
                bitrate / 1000,
                width,
                height,
                frame_rate
            );

            self.encoder.encode(input, output, &params, source).await?;

            let output_size_bytes = tokio::fs::metadata(output)
                .await
                .map_err(|e| CompressError::io(output, e))?
                .len();
            if output_size_bytes == 0 {
                return Err(EncodeError::EmptyOutput(output.to_path_buf()).into());
            }

            let result = AttemptResult {
                output_size_bytes,
                attempt_index: attempt,
            };
            let percent = state.absorb(&result, target.target_size_bytes, self.settings.overshoot_damping);

            info!(
                "Attempt {}: {} bytes, {:.2}% of target (next factor {:.4})",
                attempt, output_size_bytes, percent, state.factor
            );

            history.push(AttemptRecord {
                attempt,
                params,
                output_size_bytes,
                percent_of_target: percent,
            });
        }

        // the loop only exits after at least one measured attempt
        let (final_size_bytes, percent_of_target) = history
            .last()
            .map(|r| (r.output_size_bytes, r.percent_of_target))
            .unwrap_or_default();

        Ok(ConvergenceReport {
            output: output.to_path_buf(),
            final_size_bytes,
            percent_of_target,
            attempts: state.attempt_index,
            elapsed: started.elapsed(),
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{profile_1080p30, MockEncoder};
    use proptest::prelude::*;

    const TEN_MIB: u64 = 10 * 1024 * 1024;

    fn settings() -> ControllerSettings {
        ControllerSettings::default()
    }

    async fn run_with(
        encoder: &MockEncoder,
        settings: ControllerSettings,
        source: &SourceProfile,
        target: EncodingTarget,
        options: CompressOptions,
    ) -> Result<ConvergenceReport, CompressError> {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("out.mp4");
        ConvergenceController::new(settings, encoder)
            .run(&input, &output, source, &target, options)
            .await
    }

    #[test]
    fn test_target_validation() {
        assert!(EncodingTarget::new(0, 0.1).is_err());
        assert!(EncodingTarget::new(1, -0.1).is_err());
        assert!(EncodingTarget::new(1, f64::NAN).is_err());
        assert!(EncodingTarget::new(1, 0.0).is_ok());

        let target = EncodingTarget::from_cli(8, 10).unwrap();
        assert_eq!(target.target_size_bytes, 8 * 1024 * 1024);
        assert!((target.tolerance_fraction - 0.1).abs() < 1e-12);
        assert!(EncodingTarget::from_cli(u64::MAX, 10).is_err());
    }

    #[test]
    fn test_state_band() {
        let mut state = ConvergenceState::new();
        assert!(!state.is_converged(0.1));
        assert_eq!(state.multiplier(), 1.0);

        let percent = state.absorb(
            &AttemptResult { output_size_bytes: 95, attempt_index: 1 },
            100,
            0.05,
        );
        assert_eq!(percent, 95.0);
        assert!(state.is_converged(0.1));
        assert!(!state.is_converged(0.01));

        state.absorb(&AttemptResult { output_size_bytes: 200, attempt_index: 2 }, 100, 0.05);
        assert!((state.factor - 0.45).abs() < 1e-12);
        assert_eq!(state.attempt_index, 2);
    }

    #[test]
    fn test_exact_hit_is_converged() {
        let mut state = ConvergenceState::new();
        state.absorb(&AttemptResult { output_size_bytes: 100, attempt_index: 1 }, 100, 0.05);
        assert!(state.is_converged(0.0));
    }

    #[test]
    fn test_initial_bitrate() {
        let encoder = MockEncoder::sequence(vec![1]);
        let controller = ConvergenceController::new(settings(), &encoder);
        let target = EncodingTarget::new(TEN_MIB, 0.1).unwrap();

        let mut source = profile_1080p30(60.0);
        assert_eq!(controller.initial_bitrate(&target, &source), 1_384_120);

        source.audio_bitrate_bps = Some(128_000);
        assert_eq!(controller.initial_bitrate(&target, &source), 1_257_400);

        // subtracting this much audio would leave almost nothing for video
        source.audio_bitrate_bps = Some(1_398_000);
        assert_eq!(controller.initial_bitrate(&target, &source), 1_384_120);
    }

    #[tokio::test]
    async fn test_overshoot_damping_sequence() {
        // 150%, 140%, 105% then 95% of target
        let encoder = MockEncoder::sequence(vec![15_728_640, 14_680_064, 11_010_048, 9_961_472]);
        let target = EncodingTarget::new(TEN_MIB, 0.1).unwrap();

        let report = run_with(&encoder, settings(), &profile_1080p30(60.0), target, CompressOptions::default())
            .await
            .unwrap();

        assert_eq!(report.attempts, 4);
        assert_eq!(report.final_size_bytes, 9_961_472);
        assert!((report.percent_of_target - 95.0).abs() < 1e-9);

        let bitrates: Vec<u32> = encoder.calls().iter().map(|p| p.video_bitrate_bps).collect();
        assert_eq!(bitrates[0], 1_384_120);
        assert!(bitrates.windows(2).all(|w| w[1] < w[0]), "bitrates not decreasing: {:?}", bitrates);
        assert_eq!(report.history.len(), 4);
    }

    #[tokio::test]
    async fn test_damping_beats_plain_ratio() {
        let target = EncodingTarget::new(TEN_MIB, 0.1).unwrap();
        let source = profile_1080p30(60.0);

        let damped = MockEncoder::linear(60.0, 1.3, TEN_MIB / 50);
        let damped_report = run_with(&damped, settings(), &source, target, CompressOptions::default())
            .await
            .unwrap();

        let plain = MockEncoder::linear(60.0, 1.3, TEN_MIB / 50);
        let plain_settings = ControllerSettings {
            overshoot_damping: 0.0,
            ..settings()
        };
        let plain_report = run_with(&plain, plain_settings, &source, target, CompressOptions::default())
            .await
            .unwrap();

        assert!(damped_report.attempts < plain_report.attempts);
    }

    #[tokio::test]
    async fn test_bitrate_floor_aborts_before_encoding() {
        let encoder = MockEncoder::sequence(vec![1]);
        let target = EncodingTarget::new(100, 0.1).unwrap();

        let err = run_with(&encoder, settings(), &profile_1080p30(60.0), target, CompressOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CompressError::BitrateFloorReached { attempt: 1, .. }));
        assert!(encoder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_encoder_failure_propagates() {
        let encoder = MockEncoder::sequence(vec![2 * TEN_MIB]).failing_on(2);
        let target = EncodingTarget::new(TEN_MIB, 0.1).unwrap();

        let err = run_with(&encoder, settings(), &profile_1080p30(60.0), target, CompressOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CompressError::Encode(EncodeError::EncoderFailed { .. })));
        assert_eq!(encoder.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_output_is_an_error() {
        let encoder = MockEncoder::sequence(vec![0]);
        let target = EncodingTarget::new(TEN_MIB, 0.1).unwrap();

        let err = run_with(&encoder, settings(), &profile_1080p30(60.0), target, CompressOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CompressError::Encode(EncodeError::EmptyOutput(_))));
    }

    #[tokio::test]
    async fn test_attempt_budget_stops_oscillation() {
        // slightly over above 1 Mbps, well under below it: never settles in a 1% band
        let encoder = MockEncoder::with_model(|p| {
            if p.video_bitrate_bps >= 1_000_000 {
                TEN_MIB + 4096
            } else {
                TEN_MIB * 95 / 100
            }
        });
        let target = EncodingTarget::new(TEN_MIB, 0.01).unwrap();
        let limited = ControllerSettings {
            max_attempts: Some(12),
            ..settings()
        };

        let err = run_with(&encoder, limited, &profile_1080p30(60.0), target, CompressOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CompressError::AttemptsExhausted { attempts: 12 }));
        assert_eq!(encoder.calls().len(), 12);
    }

    #[tokio::test]
    async fn test_frame_rate_policy_applies_to_every_attempt() {
        let source = SourceProfile {
            frame_rate: 60,
            ..profile_1080p30(60.0)
        };
        let target = EncodingTarget::new(TEN_MIB, 0.1).unwrap();
        let sizes = vec![15_728_640, 9_961_472];

        let capped = MockEncoder::sequence(sizes.clone());
        run_with(&capped, settings(), &source, target, CompressOptions::default())
            .await
            .unwrap();
        assert!(capped.calls().iter().all(|p| p.frame_rate == 30));

        let kept = MockEncoder::sequence(sizes);
        let options = CompressOptions {
            keep_framerate: true,
            extra_quality: true,
        };
        run_with(&kept, settings(), &source, target, options).await.unwrap();
        assert!(kept.calls().iter().all(|p| p.frame_rate == 60 && p.extra_quality));
    }

    #[tokio::test]
    async fn test_resolution_tier_follows_encoded_frame_rate() {
        // ~1 Mbps sits above the 900 kbps 720p threshold at <=30 fps
        // but below the 1350 kbps one used above 30 fps
        let source = SourceProfile {
            frame_rate: 60,
            ..profile_1080p30(60.0)
        };
        let target = EncodingTarget::new(7_575_758, 0.1).unwrap();
        let converged = 7_575_758 * 95 / 100;

        let capped = MockEncoder::sequence(vec![converged]);
        run_with(&capped, settings(), &source, target, CompressOptions::default())
            .await
            .unwrap();
        let call = capped.calls()[0];
        assert!((900_000..1_350_000).contains(&call.video_bitrate_bps));
        assert_eq!((call.width, call.height, call.frame_rate), (1280, 720, 30));

        let kept = MockEncoder::sequence(vec![converged]);
        let options = CompressOptions {
            keep_framerate: true,
            ..Default::default()
        };
        run_with(&kept, settings(), &source, target, options).await.unwrap();
        let call = kept.calls()[0];
        assert_eq!((call.width, call.height, call.frame_rate), (854, 480, 60));
    }

    #[tokio::test]
    async fn test_tiny_source_keeps_its_resolution() {
        let source = SourceProfile {
            width: 160,
            height: 90,
            ..profile_1080p30(60.0)
        };
        let encoder = MockEncoder::sequence(vec![9_961_472]);
        let target = EncodingTarget::new(TEN_MIB, 0.1).unwrap();

        run_with(&encoder, settings(), &source, target, CompressOptions::default())
            .await
            .unwrap();
        let call = encoder.calls()[0];
        assert_eq!((call.width, call.height), (160, 90));
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_linear_encoder_converges(
            efficiency in 0.5f64..1.5,
            overhead_permille in 0u64..30,
            tolerance in 0.06f64..0.3,
            duration in 10.0f64..600.0,
            target_mib in 1u64..50,
        ) {
            let target_bytes = target_mib * 1024 * 1024;
            let encoder = MockEncoder::linear(duration, efficiency, target_bytes * overhead_permille / 1000);
            let target = EncodingTarget::new(target_bytes, tolerance).unwrap();

            let report = block_on(run_with(
                &encoder,
                settings(),
                &profile_1080p30(duration),
                target,
                CompressOptions::default(),
            ))
            .unwrap();

            prop_assert!(report.final_size_bytes <= target_bytes);
            let factor = target_bytes as f64 / report.final_size_bytes as f64;
            prop_assert!(factor <= 1.0 + tolerance + 1e-9);
            prop_assert!(report.attempts <= 6);
        }

        #[test]
        fn test_noisy_encoder_always_terminates(
            efficiency in 0.3f64..3.0,
            wobble in 0.0f64..0.4,
            tolerance in 0.0f64..0.2,
            max_attempts in 1u32..15,
        ) {
            let duration = 120.0;
            let encoder = MockEncoder::with_model(move |p| {
                let noise = 1.0 + wobble * (p.video_bitrate_bps as f64 / 7919.0).sin();
                (efficiency * noise * p.video_bitrate_bps as f64 * duration / 8.0) as u64 + 1
            });
            let target = EncodingTarget::new(TEN_MIB, tolerance).unwrap();
            let limited = ControllerSettings {
                max_attempts: Some(max_attempts),
                ..settings()
            };

            let result = block_on(run_with(
                &encoder,
                limited,
                &profile_1080p30(duration),
                target,
                CompressOptions::default(),
            ));

            prop_assert!(encoder.calls().len() <= max_attempts as usize);
            match result {
                Ok(report) => prop_assert!(report.final_size_bytes <= TEN_MIB),
                Err(CompressError::AttemptsExhausted { attempts }) => prop_assert_eq!(attempts, max_attempts),
                Err(CompressError::BitrateFloorReached { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }
}

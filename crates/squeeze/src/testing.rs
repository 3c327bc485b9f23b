//! Deterministic stand-ins for the external tools, used by unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use async_trait::async_trait;
use crate::encoder::{AttemptParameters, Encoder};
use crate::error::{EncodeError, Pass, ProbeError, RemuxError};
use crate::ffprobe::{Prober, SourceProfile};
use crate::streamable::Remuxer;

type SizeFn = Box<dyn Fn(&AttemptParameters) -> u64 + Send + Sync>;

enum SizeModel {
    /// Sizes handed out in order; the last one repeats
    Sequence(Vec<u64>),
    Function(SizeFn),
}

/// Encoder that writes a sparse file whose size comes from a model
pub struct MockEncoder {
    model: SizeModel,
    fail_on_call: Option<usize>,
    calls: Mutex<Vec<AttemptParameters>>,
}

impl MockEncoder {
    pub fn sequence(sizes: Vec<u64>) -> Self {
        Self {
            model: SizeModel::Sequence(sizes),
            fail_on_call: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(model: impl Fn(&AttemptParameters) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            model: SizeModel::Function(Box::new(model)),
            fail_on_call: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Output size proportional to the requested bitrate plus a fixed overhead
    pub fn linear(duration_seconds: f64, efficiency: f64, overhead_bytes: u64) -> Self {
        Self::with_model(move |p| {
            (efficiency * p.video_bitrate_bps as f64 * duration_seconds / 8.0) as u64 + overhead_bytes
        })
    }

    /// Fail with a non-zero exit on the given 1-based call
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn calls(&self) -> Vec<AttemptParameters> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Encoder for MockEncoder {
    async fn encode(
        &self,
        _input: &Path,
        output: &Path,
        params: &AttemptParameters,
        _source: &SourceProfile,
    ) -> Result<(), EncodeError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(*params);
            calls.len()
        };

        if self.fail_on_call == Some(call) {
            return Err(EncodeError::EncoderFailed {
                pass: Pass::Final,
                exit_code: 1,
                stderr: "mock failure".to_string(),
            });
        }

        let size = match &self.model {
            SizeModel::Sequence(sizes) => sizes[(call - 1).min(sizes.len() - 1)],
            SizeModel::Function(f) => f(params),
        };

        std::fs::File::create(output)?.set_len(size)?;
        Ok(())
    }
}

/// Prober returning a fixed profile, optionally failing
pub struct MockProber {
    pub profile: SourceProfile,
    pub fail: bool,
    pub audio_scratch: Mutex<Option<PathBuf>>,
}

impl MockProber {
    pub fn new(profile: SourceProfile) -> Self {
        Self {
            profile,
            fail: false,
            audio_scratch: Mutex::new(None),
        }
    }

    pub fn failing(profile: SourceProfile) -> Self {
        Self {
            fail: true,
            ..Self::new(profile)
        }
    }

    fn check(&self, path: &Path) -> Result<(), ProbeError> {
        if self.fail {
            return Err(ProbeError::NoVideoStream(path.to_path_buf()));
        }
        Ok(())
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        self.check(path)?;
        Ok(self.profile.duration_seconds)
    }

    async fn probe_frame_rate(&self, path: &Path) -> Result<u32, ProbeError> {
        self.check(path)?;
        Ok(self.profile.frame_rate)
    }

    async fn probe_resolution(&self, path: &Path) -> Result<(u32, u32), ProbeError> {
        self.check(path)?;
        Ok((self.profile.width, self.profile.height))
    }

    async fn probe_audio_bitrate(&self, _path: &Path, scratch: &Path) -> Option<u32> {
        // mimic the real prober leaving a scratch file behind
        let _ = std::fs::write(scratch, b"audio");
        *self.audio_scratch.lock().unwrap() = Some(scratch.to_path_buf());
        self.profile.audio_bitrate_bps
    }
}

/// Remuxer that copies the input, or fails
#[derive(Default)]
pub struct MockRemuxer {
    fail: bool,
    calls: AtomicUsize,
}

impl MockRemuxer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Remuxer for MockRemuxer {
    async fn make_streamable(&self, input: &Path, output: &Path) -> Result<(), RemuxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RemuxError::Failed {
                exit_code: 1,
                stderr: "mock failure".to_string(),
            });
        }
        std::fs::copy(input, output).map_err(|e| RemuxError::Failed {
            exit_code: -1,
            stderr: e.to_string(),
        })?;
        Ok(())
    }
}

pub fn profile_1080p30(duration_seconds: f64) -> SourceProfile {
    SourceProfile {
        duration_seconds,
        width: 1920,
        height: 1080,
        frame_rate: 30,
        audio_bitrate_bps: None,
    }
}

pub mod config;
pub mod error;
pub mod ffprobe;
pub mod ffmpeg;
pub mod encoder;
pub mod resolution;
pub mod controller;
pub mod streamable;
pub mod paths;
pub mod compress;

#[cfg(test)]
mod testing;

pub use config::{CompressConfig, ControllerSettings};
pub use error::{CompressError, EncodeError, ProbeError, RemuxError};
pub use controller::{CompressOptions, ConvergenceController, ConvergenceReport, EncodingTarget};
pub use compress::{compress, compress_with_ffmpeg, CompressOutcome, CompressReport, CompressRequest};

//! Frame ingestion sources.
//!
//! This module provides the camera side of the server:
//! - `FrameSource`: acquire one encoded frame, release it, reconfigure capture
//! - Synthetic test pattern (`stub://`)
//! - Directory of JPEG stills (`dir://`)
//! - Upstream ESP32 camera snapshots over HTTP (feature: source-http)
//! - USB/V4L2 MJPEG devices (feature: source-v4l2)
//!
//! Sources are sized for a single in-flight frame buffer. Callers MUST return every
//! acquired frame through `release` (use `FrameLease`) before acquiring the next one.
//! Acquisition MUST fail fast instead of blocking indefinitely.

mod directory;
#[cfg(feature = "source-http")]
pub mod http;
mod shared;
pub mod synthetic;
#[cfg(feature = "source-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::profile::CaptureProfile;

pub use directory::DirectorySource;
#[cfg(feature = "source-http")]
pub use http::HttpSnapshotSource;
pub use shared::SharedCamera;
pub use synthetic::SyntheticSource;
#[cfg(feature = "source-v4l2")]
pub use v4l2::V4l2Source;

/// A camera that hands out encoded frames one at a time.
pub trait FrameSource {
    /// Capture the next frame. Must fail fast rather than block indefinitely.
    fn acquire(&mut self) -> Result<Frame, AcquireError>;

    /// Return a frame obtained from `acquire`. Called exactly once per frame.
    fn release(&mut self, frame: Frame);

    /// Apply `profile` to all subsequent acquisitions.
    fn reconfigure(&mut self, profile: CaptureProfile) -> Result<()>;

    /// Profile currently applied.
    fn profile(&self) -> CaptureProfile;

    fn stats(&self) -> SourceStats {
        SourceStats::default()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn acquire(&mut self) -> Result<Frame, AcquireError> {
        (**self).acquire()
    }

    fn release(&mut self, frame: Frame) {
        (**self).release(frame)
    }

    fn reconfigure(&mut self, profile: CaptureProfile) -> Result<()> {
        (**self).reconfigure(profile)
    }

    fn profile(&self) -> CaptureProfile {
        (**self).profile()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Transient capture failure. Absorbed by the stream's degradation policy.
#[derive(Clone, Debug)]
pub struct AcquireError {
    pub message: String,
}

impl AcquireError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame acquisition failed: {}", self.message)
    }
}

impl std::error::Error for AcquireError {}

impl From<anyhow::Error> for AcquireError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub acquire_failures: u64,
    pub reconfigurations: u64,
    pub source: String,
}

/// Open the source named by `url` with `profile` applied.
///
/// Supported schemes: `stub://`, `dir://`, `http(s)://` (feature source-http),
/// `v4l2://` or a bare `/dev/video*` path (feature source-v4l2).
pub fn open_source(url: &str, profile: CaptureProfile) -> Result<Box<dyn FrameSource + Send>> {
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(url, profile)?));
    }
    if let Some(path) = url.strip_prefix("dir://") {
        return Ok(Box::new(DirectorySource::new(path, profile)?));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        #[cfg(feature = "source-http")]
        {
            return Ok(Box::new(HttpSnapshotSource::new(url, profile)?));
        }
        #[cfg(not(feature = "source-http"))]
        {
            return Err(anyhow!("http sources require the source-http feature"));
        }
    }
    if url.starts_with("v4l2://") || url.starts_with("/dev/video") {
        #[cfg(feature = "source-v4l2")]
        {
            let device = url.strip_prefix("v4l2://").unwrap_or(url);
            let mut source = V4l2Source::new(device, profile);
            source.connect()?;
            return Ok(Box::new(source));
        }
        #[cfg(not(feature = "source-v4l2"))]
        {
            return Err(anyhow!("v4l2 sources require the source-v4l2 feature"));
        }
    }
    Err(anyhow!(
        "unsupported source '{}'; expected stub://, dir://, http(s):// or v4l2://",
        url
    ))
}

/// True if `bytes` look like a complete JPEG image (SOI ... EOI).
pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes.starts_with(&[0xFF, 0xD8]) && bytes.ends_with(&[0xFF, 0xD9])
}

//! Synthetic frame source (`stub://`).
//!
//! Encodes a moving test pattern as JPEG at the current capture profile. Used for tests,
//! demos, and bring-up without a sensor attached.
//!
//! Fault injection, from the url query:
//! - `fail_first=K`: the first K acquisitions fail, then capture recovers. A run of at least
//!   the stream's failure threshold drives its degradation policy.
//! - `fail_every=N`: every Nth acquisition fails. These are isolated failures for N > 1, so
//!   they never build a consecutive run; `fail_every=1` fails every acquisition.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};
use url::Url;

use super::{AcquireError, FrameSource, SourceStats};
use crate::frame::Frame;
use crate::profile::CaptureProfile;

pub struct SyntheticSource {
    url: String,
    profile: CaptureProfile,
    fail_first: u64,
    fail_every: Option<u64>,
    attempts: u64,
    frame_count: u64,
    acquire_failures: u64,
    reconfigurations: u64,
    /// Encode buffer returned by `release`, reused by the next acquisition.
    spare: Option<Vec<u8>>,
}

impl SyntheticSource {
    pub fn new(url: &str, profile: CaptureProfile) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parse stub url {}", url))?;
        if parsed.scheme() != "stub" {
            return Err(anyhow!("synthetic source requires a stub:// url, got {}", url));
        }
        let mut fail_first = 0;
        let mut fail_every = None;
        for (key, value) in parsed.query_pairs() {
            if key == "fail_first" {
                fail_first = value
                    .parse()
                    .map_err(|_| anyhow!("fail_first must be a non-negative integer"))?;
            } else if key == "fail_every" {
                let n: u64 = value
                    .parse()
                    .map_err(|_| anyhow!("fail_every must be a positive integer"))?;
                if n == 0 {
                    return Err(anyhow!("fail_every must be a positive integer"));
                }
                fail_every = Some(n);
            }
        }
        log::info!(
            "SyntheticSource: {} at {} quality {}",
            url,
            profile.frame_size,
            profile.jpeg_quality
        );
        Ok(Self {
            url: url.to_string(),
            profile,
            fail_first,
            fail_every,
            attempts: 0,
            frame_count: 0,
            acquire_failures: 0,
            reconfigurations: 0,
            spare: None,
        })
    }

    fn encode_pattern(&mut self) -> Result<Vec<u8>> {
        let (width, height) = self.profile.dimensions();
        let phase = (self.frame_count % 256) as u32;
        let pattern = ImageBuffer::from_fn(width, height, |x, y| {
            // Diagonal gradient that drifts one step per frame.
            let r = ((x + phase) % 256) as u8;
            let g = ((y + phase) % 256) as u8;
            let b = (((x + y) / 2 + phase) % 256) as u8;
            Rgb([r, g, b])
        });

        let mut out = self.spare.take().unwrap_or_default();
        out.clear();
        {
            let mut encoder =
                JpegEncoder::new_with_quality(&mut out, self.profile.encoder_quality());
            encoder
                .encode_image(&pattern)
                .context("encode synthetic jpeg")?;
        }
        Ok(out)
    }
}

impl FrameSource for SyntheticSource {
    fn acquire(&mut self) -> Result<Frame, AcquireError> {
        self.attempts += 1;
        let injected = self.attempts <= self.fail_first
            || self.fail_every.is_some_and(|n| self.attempts % n == 0);
        if injected {
            self.acquire_failures += 1;
            return Err(AcquireError::new(format!(
                "injected failure on attempt {}",
                self.attempts
            )));
        }

        let bytes = self.encode_pattern().map_err(|err| {
            self.acquire_failures += 1;
            AcquireError::from(err)
        })?;
        self.frame_count += 1;
        let (width, height) = self.profile.dimensions();
        Ok(Frame::new(bytes, width, height, self.frame_count))
    }

    fn release(&mut self, frame: Frame) {
        self.spare = Some(frame.into_bytes());
    }

    fn reconfigure(&mut self, profile: CaptureProfile) -> Result<()> {
        self.reconfigurations += 1;
        self.profile = profile;
        log::info!("SyntheticSource: reconfigured to {}", profile.frame_size);
        Ok(())
    }

    fn profile(&self) -> CaptureProfile {
        self.profile
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            acquire_failures: self.acquire_failures,
            reconfigurations: self.reconfigurations,
            source: self.url.clone(),
        }
    }
}

//! Upstream ESP32 camera source.
//!
//! This module provides `HttpSnapshotSource` for pulling frames from an ESP32 camera web
//! server that exposes a single-JPEG snapshot endpoint (e.g. `/capture` or `/jpg`).
//!
//! The source is responsible for:
//! - Fetching exactly one JPEG per acquisition with a bounded timeout
//! - Rejecting empty or truncated bodies
//! - Forwarding resolution/quality changes to the camera's `/control` endpoint
//!
//! The source MUST NOT keep more than one fetched frame in memory.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use url::Url;

use super::{is_jpeg, AcquireError, FrameSource, SourceStats};
use crate::frame::Frame;
use crate::profile::CaptureProfile;

const MAX_JPEG_BYTES: u64 = 5 * 1024 * 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

pub struct HttpSnapshotSource {
    snapshot_url: Url,
    agent: ureq::Agent,
    profile: CaptureProfile,
    frame_count: u64,
    acquire_failures: u64,
    reconfigurations: u64,
}

impl HttpSnapshotSource {
    pub fn new(url: &str, profile: CaptureProfile) -> Result<Self> {
        let snapshot_url = Url::parse(url).context("parse snapshot url")?;
        match snapshot_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported snapshot scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(FETCH_TIMEOUT)
            .timeout(FETCH_TIMEOUT)
            .build();
        Ok(Self {
            snapshot_url,
            agent,
            profile,
            frame_count: 0,
            acquire_failures: 0,
            reconfigurations: 0,
        })
    }

    fn fetch(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(self.snapshot_url.as_str())
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.snapshot_url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        if !is_jpeg(&bytes) {
            return Err(anyhow!("snapshot is not a complete jpeg ({} bytes)", bytes.len()));
        }
        Ok(bytes)
    }

    fn control_url(&self, var: &str, val: u8) -> Result<Url> {
        let mut url = self
            .snapshot_url
            .join("/control")
            .context("build control url")?;
        url.query_pairs_mut()
            .append_pair("var", var)
            .append_pair("val", &val.to_string());
        Ok(url)
    }

    fn set_control(&self, var: &str, val: u8) -> Result<()> {
        let url = self.control_url(var, val)?;
        self.agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("set {}={} on upstream camera", var, val))?;
        Ok(())
    }
}

impl FrameSource for HttpSnapshotSource {
    fn acquire(&mut self) -> Result<Frame, AcquireError> {
        match self.fetch() {
            Ok(bytes) => {
                self.frame_count += 1;
                let (width, height) = self.profile.dimensions();
                Ok(Frame::new(bytes, width, height, self.frame_count))
            }
            Err(err) => {
                self.acquire_failures += 1;
                Err(err.into())
            }
        }
    }

    fn release(&mut self, frame: Frame) {
        drop(frame);
    }

    fn reconfigure(&mut self, profile: CaptureProfile) -> Result<()> {
        self.reconfigurations += 1;
        self.set_control("framesize", profile.frame_size.control_index())?;
        self.set_control("quality", profile.jpeg_quality)?;
        self.profile = profile;
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
            source: self.snapshot_url.to_string(),
        }
    }
}

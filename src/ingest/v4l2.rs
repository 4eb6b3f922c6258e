//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing MJPEG frames from a local V4L2 device
//! (e.g. /dev/video0). The device encodes JPEG in hardware, so frames are passed through
//! untouched.
//!
//! Reconfiguration closes the capture stream and reopens it at the new resolution.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{AcquireError, FrameSource, SourceStats};
use crate::frame::Frame;
use crate::profile::CaptureProfile;

/// Kernel-side capture buffers. Two is the minimum most drivers accept for streaming.
const CAPTURE_BUFFERS: u32 = 2;

pub struct V4l2Source {
    device: String,
    profile: CaptureProfile,
    state: Option<DeviceState>,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    acquire_failures: u64,
    reconfigurations: u64,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(device: &str, profile: CaptureProfile) -> Self {
        let (active_width, active_height) = profile.dimensions();
        Self {
            device: device.to_string(),
            profile,
            state: None,
            active_width,
            active_height,
            frame_count: 0,
            acquire_failures: 0,
            reconfigurations: 0,
        }
    }

    /// Open the device and start streaming at the current profile.
    pub fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.state = None;

        let device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        let (width, height) = self.profile.dimensions();
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(b"MJPG");

        let format = device
            .set_format(&format)
            .with_context(|| format!("set MJPG {}x{} on {}", width, height, self.device))?;
        if format.fourcc != v4l::FourCC::new(b"MJPG") {
            return Err(anyhow!(
                "{} does not support MJPG capture (got {})",
                self.device,
                format.fourcc
            ));
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} MJPG)",
            self.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<Vec<u8>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let bytes = state.with_mut(|fields| {
            fields.stream.next().map(|(buf, meta)| {
                let used = meta.bytesused as usize;
                if used == 0 || used > buf.len() {
                    buf.to_vec()
                } else {
                    buf[..used].to_vec()
                }
            })
        });
        let bytes = bytes.context("capture v4l2 frame")?;
        if bytes.is_empty() {
            return Err(anyhow!("v4l2 device returned an empty buffer"));
        }
        Ok(bytes)
    }
}

impl FrameSource for V4l2Source {
    fn acquire(&mut self) -> Result<Frame, AcquireError> {
        match self.capture() {
            Ok(bytes) => {
                self.frame_count += 1;
                Ok(Frame::new(
                    bytes,
                    self.active_width,
                    self.active_height,
                    self.frame_count,
                ))
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
        self.profile = profile;
        self.connect()
    }

    fn profile(&self) -> CaptureProfile {
        self.profile
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            acquire_failures: self.acquire_failures,
            reconfigurations: self.reconfigurations,
            source: self.device.clone(),
        }
    }
}

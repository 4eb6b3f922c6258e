//! Capture resolution and quality.

use anyhow::{anyhow, Result};
use std::str::FromStr;

/// Highest (worst) JPEG quality value the sensor accepts.
pub const MAX_JPEG_QUALITY: u8 = 63;

/// Sensor output resolutions, ordered smallest to largest.
///
/// `control_index` values follow the ESP32 camera driver's `framesize_t` table, which is
/// what an upstream camera's `/control?var=framesize` endpoint expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameSize {
    Qqvga,
    Qcif,
    Hqvga,
    Qvga,
    Cif,
    Hvga,
    Vga,
    Svga,
    Xga,
    Hd,
    Sxga,
    Uxga,
}

impl FrameSize {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qcif => (176, 144),
            FrameSize::Hqvga => (240, 176),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Hvga => (480, 320),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Hd => (1280, 720),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }

    pub fn control_index(self) -> u8 {
        match self {
            FrameSize::Qqvga => 1,
            FrameSize::Qcif => 2,
            FrameSize::Hqvga => 3,
            FrameSize::Qvga => 5,
            FrameSize::Cif => 6,
            FrameSize::Hvga => 7,
            FrameSize::Vga => 8,
            FrameSize::Svga => 9,
            FrameSize::Xga => 10,
            FrameSize::Hd => 11,
            FrameSize::Sxga => 12,
            FrameSize::Uxga => 13,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameSize::Qqvga => "qqvga",
            FrameSize::Qcif => "qcif",
            FrameSize::Hqvga => "hqvga",
            FrameSize::Qvga => "qvga",
            FrameSize::Cif => "cif",
            FrameSize::Hvga => "hvga",
            FrameSize::Vga => "vga",
            FrameSize::Svga => "svga",
            FrameSize::Xga => "xga",
            FrameSize::Hd => "hd",
            FrameSize::Sxga => "sxga",
            FrameSize::Uxga => "uxga",
        }
    }
}

impl FromStr for FrameSize {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let size = match value.trim().to_lowercase().as_str() {
            "qqvga" => FrameSize::Qqvga,
            "qcif" => FrameSize::Qcif,
            "hqvga" => FrameSize::Hqvga,
            "qvga" => FrameSize::Qvga,
            "cif" => FrameSize::Cif,
            "hvga" => FrameSize::Hvga,
            "vga" => FrameSize::Vga,
            "svga" => FrameSize::Svga,
            "xga" => FrameSize::Xga,
            "hd" => FrameSize::Hd,
            "sxga" => FrameSize::Sxga,
            "uxga" => FrameSize::Uxga,
            other => return Err(anyhow!("unknown frame size '{}'", other)),
        };
        Ok(size)
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{} ({}x{})", self.name(), w, h)
    }
}

/// Resolution and JPEG quality applied to every acquisition.
///
/// `jpeg_quality` uses the sensor's scale: 0..=63, lower is better.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureProfile {
    pub frame_size: FrameSize,
    pub jpeg_quality: u8,
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self {
            frame_size: FrameSize::Vga,
            jpeg_quality: 15,
        }
    }
}

impl CaptureProfile {
    pub fn new(frame_size: FrameSize, jpeg_quality: u8) -> Result<Self> {
        if jpeg_quality > MAX_JPEG_QUALITY {
            return Err(anyhow!(
                "jpeg quality must be between 0 and {}, got {}",
                MAX_JPEG_QUALITY,
                jpeg_quality
            ));
        }
        Ok(Self {
            frame_size,
            jpeg_quality,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.frame_size.dimensions()
    }

    /// Profile after falling back to `fallback`. Never larger than the current size.
    pub fn degraded(&self, fallback: FrameSize) -> Self {
        Self {
            frame_size: self.frame_size.min(fallback),
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// Quality on the 1..=100 (higher is better) scale used by software encoders.
    pub fn encoder_quality(&self) -> u8 {
        let q = u32::from(self.jpeg_quality.min(MAX_JPEG_QUALITY));
        let scaled = 100 - q * 100 / u32::from(MAX_JPEG_QUALITY);
        scaled.clamp(1, 100) as u8
    }
}

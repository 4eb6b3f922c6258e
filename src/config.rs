use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::profile::{CaptureProfile, FrameSize, MAX_JPEG_QUALITY};
use crate::stream::StreamPolicy;

const DEFAULT_ADDR: &str = "0.0.0.0:80";
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_FRAME_SIZE: FrameSize = FrameSize::Vga;
const DEFAULT_JPEG_QUALITY: u8 = 15;
const DEFAULT_FALLBACK_FRAME_SIZE: FrameSize = FrameSize::Qvga;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_FAILURE_BACKOFF_MS: u64 = 10;
const DEFAULT_FRAME_PACING_MS: u64 = 5;
const DEFAULT_TELEMETRY_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_OPEN_SOCKETS: usize = 2;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RECV_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RESTART_DELAY_MS: u64 = 200;

#[derive(Debug, Deserialize, Default)]
struct CamstreamConfigFile {
    addr: Option<String>,
    source: Option<SourceConfigFile>,
    stream: Option<StreamConfigFile>,
    http: Option<HttpConfigFile>,
    flash: Option<FlashConfigFile>,
    restart_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    frame_size: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    fallback_frame_size: Option<String>,
    failure_threshold: Option<u32>,
    failure_backoff_ms: Option<u64>,
    frame_pacing_ms: Option<u64>,
    telemetry_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    max_open_sockets: Option<usize>,
    send_timeout_ms: Option<u64>,
    recv_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct FlashConfigFile {
    gpio: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CamstreamConfig {
    pub addr: String,
    pub source: SourceSettings,
    pub stream: StreamPolicy,
    pub http: HttpSettings,
    /// GPIO line of the flash LED; `None` drives no pin.
    pub flash_gpio: Option<u32>,
    pub restart_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub frame_size: FrameSize,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_open_sockets: usize,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_open_sockets: DEFAULT_MAX_OPEN_SOCKETS,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            recv_timeout: Duration::from_millis(DEFAULT_RECV_TIMEOUT_MS),
        }
    }
}

impl CamstreamConfig {
    /// Config file named by `CAMSTREAM_CONFIG` (if any), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMSTREAM_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like [`load`](Self::load) with an explicit file path taking the place of
    /// `CAMSTREAM_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn capture_profile(&self) -> Result<CaptureProfile> {
        CaptureProfile::new(self.source.frame_size, self.source.jpeg_quality)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.addr
            .parse()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.addr, e))
    }

    fn from_file(file: CamstreamConfigFile) -> Result<Self> {
        let addr = file.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());

        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            frame_size: match source_file.frame_size {
                Some(name) => name.parse()?,
                None => DEFAULT_FRAME_SIZE,
            },
            jpeg_quality: source_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamPolicy {
            failure_threshold: stream_file
                .failure_threshold
                .unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            failure_backoff: Duration::from_millis(
                stream_file
                    .failure_backoff_ms
                    .unwrap_or(DEFAULT_FAILURE_BACKOFF_MS),
            ),
            frame_pacing: Duration::from_millis(
                stream_file
                    .frame_pacing_ms
                    .unwrap_or(DEFAULT_FRAME_PACING_MS),
            ),
            telemetry_interval: Duration::from_secs(
                stream_file
                    .telemetry_interval_secs
                    .unwrap_or(DEFAULT_TELEMETRY_INTERVAL_SECS),
            ),
            fallback_frame_size: match stream_file.fallback_frame_size {
                Some(name) => name.parse()?,
                None => DEFAULT_FALLBACK_FRAME_SIZE,
            },
        };

        let http_file = file.http.unwrap_or_default();
        let http = HttpSettings {
            max_open_sockets: http_file
                .max_open_sockets
                .unwrap_or(DEFAULT_MAX_OPEN_SOCKETS),
            send_timeout: Duration::from_millis(
                http_file.send_timeout_ms.unwrap_or(DEFAULT_SEND_TIMEOUT_MS),
            ),
            recv_timeout: Duration::from_millis(
                http_file.recv_timeout_ms.unwrap_or(DEFAULT_RECV_TIMEOUT_MS),
            ),
        };

        Ok(Self {
            addr,
            source,
            stream,
            http,
            flash_gpio: file.flash.and_then(|flash| flash.gpio),
            restart_delay: Duration::from_millis(
                file.restart_delay_ms.unwrap_or(DEFAULT_RESTART_DELAY_MS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("CAMSTREAM_ADDR") {
            if !addr.trim().is_empty() {
                self.addr = addr.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("CAMSTREAM_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url.trim().to_string();
            }
        }
        if let Ok(size) = std::env::var("CAMSTREAM_FRAME_SIZE") {
            if !size.trim().is_empty() {
                self.source.frame_size = size.trim().parse()?;
            }
        }
        if let Ok(quality) = std::env::var("CAMSTREAM_JPEG_QUALITY") {
            self.source.jpeg_quality = quality.trim().parse().map_err(|_| {
                anyhow!("CAMSTREAM_JPEG_QUALITY must be an integer between 0 and 63")
            })?;
        }
        if let Ok(size) = std::env::var("CAMSTREAM_FALLBACK_FRAME_SIZE") {
            if !size.trim().is_empty() {
                self.stream.fallback_frame_size = size.trim().parse()?;
            }
        }
        if let Ok(sockets) = std::env::var("CAMSTREAM_MAX_OPEN_SOCKETS") {
            self.http.max_open_sockets = sockets.trim().parse().map_err(|_| {
                anyhow!("CAMSTREAM_MAX_OPEN_SOCKETS must be a positive integer")
            })?;
        }
        if let Ok(gpio) = std::env::var("CAMSTREAM_FLASH_GPIO") {
            let gpio = gpio.trim();
            self.flash_gpio = if gpio.is_empty() || gpio == "none" {
                None
            } else {
                Some(
                    gpio.parse()
                        .map_err(|_| anyhow!("CAMSTREAM_FLASH_GPIO must be a GPIO number or 'none'"))?,
                )
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.jpeg_quality > MAX_JPEG_QUALITY {
            return Err(anyhow!(
                "jpeg_quality must be between 0 and {}",
                MAX_JPEG_QUALITY
            ));
        }
        if self.stream.failure_threshold == 0 {
            return Err(anyhow!("failure_threshold must be at least 1"));
        }
        if self.http.max_open_sockets == 0 {
            return Err(anyhow!("max_open_sockets must be at least 1"));
        }
        if self.http.send_timeout.is_zero() || self.http.recv_timeout.is_zero() {
            return Err(anyhow!("http send/recv timeouts must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CamstreamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

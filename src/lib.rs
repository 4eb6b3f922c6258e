//! camstream: single-camera MJPEG server
//!
//! Serves JPEG frames from one camera over HTTP, as single snapshots or as a continuous
//! `multipart/x-mixed-replace` stream, with flash and restart control endpoints.
//!
//! # Architecture
//!
//! The streaming path holds three properties by construction:
//!
//! 1. **Single session**: at most one stream is active; the [`StreamGate`] hands out one
//!    admission token and a second request is rejected without touching the camera.
//! 2. **One frame in flight**: a [`FrameLease`] borrows its source mutably, so a frame is
//!    always released before the next one can be acquired.
//! 3. **One-way degradation**: sustained acquisition failure lowers the capture resolution
//!    to the fallback and never raises it again.
//!
//! # Module Structure
//!
//! - `frame`: Frame and FrameLease
//! - `profile`: FrameSize and CaptureProfile
//! - `ingest`: Frame sources (synthetic, directory, HTTP snapshot, V4L2) and SharedCamera
//! - `sink`: ChunkedSink and the HTTP/1.1 chunked implementation
//! - `stream`: admission gate and the streaming session loop
//! - `telemetry`: free-memory probes
//! - `flash`: illumination LED state
//! - `server`: HTTP accept loop and routes
//! - `config`: JSON file plus environment configuration

pub mod config;
pub mod flash;
pub mod frame;
pub mod ingest;
pub mod profile;
pub mod server;
pub mod sink;
pub mod stream;
pub mod telemetry;

pub use config::{CamstreamConfig, HttpSettings, SourceSettings};
pub use flash::{Flash, FlashCommand, FlashPin, NullPin, SysfsGpioPin};
pub use frame::{Frame, FrameLease};
pub use ingest::{
    is_jpeg, open_source, AcquireError, DirectorySource, FrameSource, SharedCamera,
    SourceStats, SyntheticSource,
};
#[cfg(feature = "source-http")]
pub use ingest::HttpSnapshotSource;
#[cfg(feature = "source-v4l2")]
pub use ingest::V4l2Source;
pub use profile::{CaptureProfile, FrameSize, MAX_JPEG_QUALITY};
pub use server::{CameraServer, ControlEvent, ServerConfig, ServerHandle};
pub use sink::{ChunkedSink, HttpChunkedSink, TransportError};
pub use stream::{
    AdmissionToken, PartStage, SessionReport, StreamError, StreamGate, StreamPolicy,
    StreamSession, Termination,
};
pub use telemetry::{MemoryPool, MemoryProbe, SystemMemoryProbe};

//! Multipart MJPEG streaming session.
//!
//! One session at a time owns the camera. The session loop:
//! 1. Acquires a frame (failures are counted; every `failure_threshold` consecutive
//!    failures the capture profile falls back to a smaller frame size, never a larger one)
//! 2. Sends it as one multipart part (header, JPEG bytes, boundary)
//! 3. Releases the frame, whatever the send outcome
//! 4. Logs free memory every `telemetry_interval` of wall time
//! 5. Pauses for `frame_pacing` before the next frame
//!
//! A failed send means the client went away. It ends the session; there is no other
//! liveness probe.

mod gate;
mod health;
pub mod multipart;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::frame::FrameLease;
use crate::ingest::FrameSource;
use crate::profile::{CaptureProfile, FrameSize};
use crate::sink::{ChunkedSink, TransportError};
use crate::telemetry::{self, MemoryProbe};

pub use gate::{AdmissionToken, StreamGate};
use health::CaptureHealth;

/// Tunables for the session loop.
#[derive(Clone, Debug)]
pub struct StreamPolicy {
    /// Consecutive acquisition failures that trigger a fallback reconfiguration.
    pub failure_threshold: u32,
    /// Pause after each failed acquisition.
    pub failure_backoff: Duration,
    /// Pause after each sent frame. Leaves room for the network stack and other handlers.
    pub frame_pacing: Duration,
    pub telemetry_interval: Duration,
    /// Frame size used after sustained failure.
    pub fallback_frame_size: FrameSize,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_backoff: Duration::from_millis(10),
            frame_pacing: Duration::from_millis(5),
            telemetry_interval: Duration::from_secs(5),
            fallback_frame_size: FrameSize::Qvga,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamError {
    /// Another session holds the camera.
    Busy,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Busy => write!(f, "stream busy: another session is active"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Which write of a multipart part failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartStage {
    Header,
    Body,
    Boundary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// A write failed; the client is gone.
    Disconnected { stage: PartStage },
    /// The stop flag was raised.
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct SessionReport {
    pub frames_sent: u64,
    pub acquire_failures: u64,
    pub reconfigurations: u64,
    pub final_profile: CaptureProfile,
    pub termination: Termination,
}

/// An admitted streaming session.
pub struct StreamSession<'a, S: FrameSource + ?Sized, K: ChunkedSink + ?Sized> {
    admission: AdmissionToken<'a>,
    source: &'a mut S,
    sink: &'a mut K,
    policy: &'a StreamPolicy,
    probe: Option<&'a dyn MemoryProbe>,
    stop: Option<&'a AtomicBool>,
}

impl<'a, S: FrameSource + ?Sized, K: ChunkedSink + ?Sized> StreamSession<'a, S, K> {
    /// Admit a session and announce the multipart response on `sink`.
    ///
    /// On `Busy` nothing is touched: no frame is acquired and `sink` is left as it was.
    pub fn begin(
        gate: &'a StreamGate,
        source: &'a mut S,
        sink: &'a mut K,
        policy: &'a StreamPolicy,
    ) -> Result<Self, StreamError> {
        let admission = gate.try_admit()?;
        sink.set_content_type(multipart::CONTENT_TYPE);
        sink.set_header("Access-Control-Allow-Origin", "*");
        log::info!("stream session admitted");
        Ok(Self {
            admission,
            source,
            sink,
            policy,
            probe: None,
            stop: None,
        })
    }

    pub fn with_memory_probe(mut self, probe: &'a dyn MemoryProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// End the session at the next iteration once `stop` is set.
    pub fn with_stop_flag(mut self, stop: &'a AtomicBool) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Stream until the client disconnects or the stop flag is raised.
    pub fn run(self) -> SessionReport {
        let Self {
            admission,
            source,
            sink,
            policy,
            probe,
            stop,
        } = self;

        let mut profile = source.profile();
        let mut health = CaptureHealth::new(
            policy.failure_threshold,
            policy.telemetry_interval,
            Instant::now(),
        );
        let mut frames_sent = 0u64;
        let mut acquire_failures = 0u64;
        let mut reconfigurations = 0u64;

        let termination = loop {
            if stop.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                break Termination::Shutdown;
            }

            // The lease must be gone before the failure branch can reconfigure the source.
            let sent = match FrameLease::acquire(&mut *source) {
                Ok(lease) => Ok(send_part(&mut *sink, lease.as_bytes())),
                Err(err) => Err(err),
            };
            let sent = match sent {
                Ok(sent) => sent,
                Err(err) => {
                    acquire_failures += 1;
                    log::debug!("stream: {}", err);
                    if health.record_failure() {
                        let degraded = profile.degraded(policy.fallback_frame_size);
                        log::warn!(
                            "stream: {} consecutive acquisition failures, falling back to {}",
                            policy.failure_threshold,
                            degraded.frame_size
                        );
                        if let Err(err) = source.reconfigure(degraded) {
                            log::warn!("stream: reconfigure failed (ignored): {:#}", err);
                        }
                        profile = degraded;
                        reconfigurations += 1;
                    }
                    pause(policy.failure_backoff);
                    continue;
                }
            };
            health.record_success();

            if let Err((stage, err)) = sent {
                log::info!("stream: client disconnected during {:?}: {}", stage, err);
                break Termination::Disconnected { stage };
            }
            frames_sent += 1;

            if let Some(probe) = probe {
                if health.telemetry_due(Instant::now()) {
                    telemetry::log_memory(probe);
                }
            }

            pause(policy.frame_pacing);
        };

        drop(admission);
        log::info!(
            "stream session ended: frames={} acquire_failures={} reconfigurations={} reason={:?}",
            frames_sent,
            acquire_failures,
            reconfigurations,
            termination
        );
        SessionReport {
            frames_sent,
            acquire_failures,
            reconfigurations,
            final_profile: profile,
            termination,
        }
    }
}

fn send_part<K: ChunkedSink + ?Sized>(
    sink: &mut K,
    jpeg: &[u8],
) -> Result<(), (PartStage, TransportError)> {
    let header = multipart::part_header(jpeg.len());
    sink.send_chunk(header.as_bytes())
        .map_err(|err| (PartStage::Header, err))?;
    sink.send_chunk(jpeg).map_err(|err| (PartStage::Body, err))?;
    sink.send_chunk(multipart::PART_BOUNDARY)
        .map_err(|err| (PartStage::Boundary, err))?;
    Ok(())
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

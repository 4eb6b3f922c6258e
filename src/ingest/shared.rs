use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{AcquireError, FrameSource, SourceStats};
use crate::frame::Frame;
use crate::profile::CaptureProfile;

/// Cloneable handle to the one camera.
///
/// The mutex is held only for the duration of a single call, never across a network
/// write, so the stream handler and snapshot handler interleave at frame granularity.
#[derive(Clone)]
pub struct SharedCamera {
    inner: Arc<Mutex<Box<dyn FrameSource + Send>>>,
}

impl SharedCamera {
    pub fn new(source: Box<dyn FrameSource + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn FrameSource + Send>>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("camera lock poisoned"))
    }
}

impl FrameSource for SharedCamera {
    fn acquire(&mut self) -> Result<Frame, AcquireError> {
        self.lock()?.acquire()
    }

    fn release(&mut self, frame: Frame) {
        match self.lock() {
            Ok(mut source) => source.release(frame),
            Err(err) => log::error!("dropping frame {}: {}", frame.sequence, err),
        }
    }

    fn reconfigure(&mut self, profile: CaptureProfile) -> Result<()> {
        self.lock()?.reconfigure(profile)
    }

    fn profile(&self) -> CaptureProfile {
        self.lock()
            .map(|source| source.profile())
            .unwrap_or_default()
    }

    fn stats(&self) -> SourceStats {
        self.lock()
            .map(|source| source.stats())
            .unwrap_or_default()
    }
}

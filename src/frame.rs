//! Encoded frame ownership.
//!
//! - `Frame`: one JPEG image handed out by a `FrameSource`. Not `Clone`: a frame exists once.
//! - `FrameLease`: scoped guard that returns the frame to its source when dropped.
//!
//! Sources keep a single in-flight buffer, so the lease borrows the source mutably for its
//! whole lifetime. A second `acquire` cannot be issued until the previous lease is gone.

use std::ops::Deref;

use crate::ingest::{AcquireError, FrameSource};

/// One JPEG-encoded image captured from the sensor.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Per-source capture counter, starting at 1.
    pub sequence: u64,
}

// Explicitly NOT implementing Clone. Duplicating a frame would break the
// one-buffer-in-flight budget the sources are sized for.

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Hand the underlying buffer back, e.g. for reuse by the source that produced it.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// A frame on loan from its source.
///
/// Dropping the lease calls `FrameSource::release` exactly once, on every exit path
/// (early return, `?`, panic unwinding).
pub struct FrameLease<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
    frame: Option<Frame>,
}

impl<'a, S: FrameSource + ?Sized> FrameLease<'a, S> {
    /// Acquire one frame from `source`. Nothing is leased on failure.
    pub fn acquire(source: &'a mut S) -> Result<Self, AcquireError> {
        let frame = source.acquire()?;
        Ok(Self {
            source,
            frame: Some(frame),
        })
    }

    pub fn frame(&self) -> &Frame {
        // Only `Drop` takes the frame out.
        self.frame
            .as_ref()
            .unwrap_or_else(|| unreachable!("frame lease already released"))
    }
}

impl<S: FrameSource + ?Sized> Deref for FrameLease<'_, S> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame()
    }
}

impl<S: FrameSource + ?Sized> Drop for FrameLease<'_, S> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.source.release(frame);
        }
    }
}

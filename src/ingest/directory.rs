//! Directory frame source (`dir://`).
//!
//! Cycles through the JPEG stills of a local directory in name order. Each acquisition
//! reads one file from disk, so only one frame is ever held in memory.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{is_jpeg, AcquireError, FrameSource, SourceStats};
use crate::frame::Frame;
use crate::profile::CaptureProfile;

pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next_index: usize,
    profile: CaptureProfile,
    frame_count: u64,
    acquire_failures: u64,
    reconfigurations: u64,
}

impl DirectorySource {
    pub fn new(dir: impl AsRef<Path>, profile: CaptureProfile) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("read frame directory {}", dir.display()))?
        {
            let path = entry?.path();
            let is_jpeg_name = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
                .unwrap_or(false);
            if is_jpeg_name && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no .jpg files in {}", dir.display()));
        }
        files.sort();
        log::info!(
            "DirectorySource: {} frames in {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            dir,
            files,
            next_index: 0,
            profile,
            frame_count: 0,
            acquire_failures: 0,
            reconfigurations: 0,
        })
    }

    fn read_next(&mut self) -> Result<Vec<u8>> {
        let path = &self.files[self.next_index];
        self.next_index = (self.next_index + 1) % self.files.len();
        let bytes =
            std::fs::read(path).with_context(|| format!("read frame {}", path.display()))?;
        if !is_jpeg(&bytes) {
            return Err(anyhow!("{} is not a complete jpeg", path.display()));
        }
        Ok(bytes)
    }
}

impl FrameSource for DirectorySource {
    fn acquire(&mut self) -> Result<Frame, AcquireError> {
        match self.read_next() {
            Ok(bytes) => {
                self.frame_count += 1;
                // Stills are served as-is; the profile only describes the nominal size.
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
        self.profile = profile;
        log::info!(
            "DirectorySource: profile set to {} (stills are not rescaled)",
            profile.frame_size
        );
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
            source: format!("dir://{}", self.dir.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TINY_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x02, 0xFF, 0xD9];

    #[test]
    fn cycles_files_in_name_order() -> Result<()> {
        let dir = tempdir()?;
        let mut truncated = TINY_JPEG.to_vec();
        truncated.push(0x01);
        std::fs::write(dir.path().join("b.jpg"), truncated)?;
        std::fs::write(dir.path().join("a.jpg"), TINY_JPEG)?;
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;
        // b.jpg is listed by name but fails when read.
        let mut source = DirectorySource::new(dir.path(), CaptureProfile::default())?;

        let first = source.acquire()?;
        assert_eq!(first.as_bytes(), TINY_JPEG);
        source.release(first);

        assert!(source.acquire().is_err());

        let third = source.acquire()?;
        assert_eq!(third.as_bytes(), TINY_JPEG);
        assert_eq!(third.sequence, 2);
        source.release(third);

        assert_eq!(source.stats().acquire_failures, 1);
        Ok(())
    }

    #[test]
    fn empty_directory_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        assert!(DirectorySource::new(dir.path(), CaptureProfile::default()).is_err());
        Ok(())
    }
}

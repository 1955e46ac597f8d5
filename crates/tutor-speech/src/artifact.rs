//! Scoped temporary audio files.
//!
//! An [`AudioArtifact`] owns its file on disk: the file is removed when the
//! artifact is dropped, whichever way the caller exits.

use std::path::Path;

use tempfile::TempPath;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use tutor_core::error::TutorError;

/// A synthesized clip stored in a temporary file.
#[derive(Debug)]
pub struct AudioArtifact {
    path: TempPath,
}

impl AudioArtifact {
    /// Reserve an empty `tts_<uuid>.wav` file in the system temp directory.
    pub fn allocate() -> Result<Self, TutorError> {
        let file = tempfile::Builder::new()
            .prefix(&format!("tts_{}", Uuid::new_v4().simple()))
            .suffix(".wav")
            .rand_bytes(0)
            .tempfile()?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    /// Write `bytes` into a fresh artifact.
    pub async fn from_bytes(bytes: &[u8]) -> Result<Self, TutorError> {
        let artifact = Self::allocate()?;
        tokio::fs::write(artifact.path(), bytes).await?;
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the clip in bytes.
    pub async fn len(&self) -> Result<u64, TutorError> {
        Ok(tokio::fs::metadata(self.path()).await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, TutorError> {
        Ok(self.len().await? == 0)
    }

    pub async fn read_all(&self) -> Result<Vec<u8>, TutorError> {
        Ok(tokio::fs::read(self.path()).await?)
    }

    /// Open the clip for reading in frames of `frame_size` bytes.
    pub async fn frames(&self, frame_size: usize) -> Result<FrameReader, TutorError> {
        let file = tokio::fs::File::open(self.path()).await?;
        Ok(FrameReader {
            file,
            frame_size: frame_size.max(1),
            done: false,
        })
    }

    /// Delete the file now and report any error.
    pub fn close(self) -> Result<(), TutorError> {
        self.path.close()?;
        Ok(())
    }
}

/// Reads a file as consecutive fixed-size frames; only the last may be short.
#[derive(Debug)]
pub struct FrameReader {
    file: tokio::fs::File,
    frame_size: usize,
    done: bool,
}

impl FrameReader {
    /// Next frame in file order, or `None` at end of file.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TutorError> {
        if self.done {
            return Ok(None);
        }
        let mut frame = vec![0u8; self.frame_size];
        let mut filled = 0;
        while filled < self.frame_size {
            let n = self.file.read(&mut frame[filled..]).await?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        frame.truncate(filled);
        Ok(Some(frame))
    }
}

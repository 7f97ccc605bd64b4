//! Job-scoped scratch directories.
//!
//! A [`Workspace`] is created next to a job's declared output file. Its root
//! carries the output stem plus a random suffix, so two live jobs never share
//! a tree even when their outputs share a name. It is removed when dropped,
//! on every exit path, and only ever removes the tree it created.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::ObscuraError;

/// Scratch directory tree owned by one video job.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    directory: Option<TempDir>,
}

impl Workspace {
    /// Create the workspace for a job writing to `output`.
    ///
    /// The tree lives at `<output dir>/.work_<output stem>_<random>/`.
    ///
    /// # Errors
    ///
    /// Returns [`ObscuraError::IoError`] if the directories cannot be created.
    pub fn for_output(output: &Path) -> Result<Self, ObscuraError> {
        let parent = output
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let stem = output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());

        let directory = tempfile::Builder::new()
            .prefix(&format!(".work_{stem}_"))
            .tempdir_in(parent)?;
        let workspace = Self {
            root: directory.path().to_path_buf(),
            directory: Some(directory),
        };
        fs::create_dir(workspace.frames_dir())?;
        fs::create_dir(workspace.processed_dir())?;
        log::debug!("Created workspace {}", workspace.root.display());
        Ok(workspace)
    }

    /// Root of the tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Raw frames written by decomposition.
    pub fn frames_dir(&self) -> PathBuf {
        self.root.join("frames")
    }

    /// Perturbed frames written by the batch scheduler.
    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed_frames")
    }

    /// Stream-copied audio track. Matroska accepts any source audio codec.
    pub fn audio_path(&self) -> PathBuf {
        self.root.join("audio.mka")
    }

    /// Recomposed video without audio.
    pub fn silent_video_path(&self) -> PathBuf {
        self.root.join("silent.mp4")
    }

    /// Final muxed video before it is moved into place.
    pub fn merged_video_path(&self) -> PathBuf {
        self.root.join("merged.mp4")
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let Some(directory) = self.directory.take() else {
            return;
        };
        match directory.close() {
            Ok(()) => log::debug!("Removed workspace {}", self.root.display()),
            Err(error) => log::warn!("Failed to remove workspace {}: {error}", self.root.display()),
        }
    }
}

//! Numbered frame-image sequences.
//!
//! A [`FrameSequence`] names frame files `<prefix><index>.<extension>` with
//! a six-digit zero-padded index starting at 1, e.g. `frame_000001.jpg`.
//! Fixed-width padding makes lexicographic and numeric order coincide, and
//! the encoder's input pattern requires the numbering to be gap-free.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ObscuraError;

/// Width of the zero-padded frame index.
pub const FRAME_INDEX_WIDTH: usize = 6;

/// Naming scheme for a frame sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequence {
    prefix: String,
    extension: String,
}

impl Default for FrameSequence {
    fn default() -> Self {
        Self::new("frame_", "jpg")
    }
}

impl FrameSequence {
    /// Create a scheme with the given file prefix and extension (without the dot).
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    /// Common file-name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Image file extension.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// File name of the frame at `index` (1-based).
    pub fn file_name(&self, index: u64) -> String {
        format!(
            "{}{index:0width$}.{}",
            self.prefix,
            self.extension,
            width = FRAME_INDEX_WIDTH
        )
    }

    /// The printf-style pattern understood by the codec tool.
    pub fn pattern(&self) -> String {
        format!("{}%0{FRAME_INDEX_WIDTH}d.{}", self.prefix, self.extension)
    }

    /// Extract the index from a file name belonging to this sequence.
    pub fn parse_index(&self, file_name: &str) -> Option<u64> {
        let digits = file_name
            .strip_prefix(&self.prefix)?
            .strip_suffix(&self.extension)?
            .strip_suffix('.')?;
        if digits.len() < FRAME_INDEX_WIDTH || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// List the files in `directory` that match the sequence, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`ObscuraError::IoError`] if the directory cannot be read.
    pub fn list(&self, directory: &Path) -> Result<Vec<PathBuf>, ObscuraError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let matches = name
                .to_str()
                .is_some_and(|name| self.parse_index(name).is_some());
            if matches && entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Check that sorted `files` are numbered 1, 2, 3, … without gaps.
    ///
    /// # Errors
    ///
    /// Returns [`ObscuraError::FrameSequenceGap`] at the first mismatch.
    pub fn verify_contiguous(&self, files: &[PathBuf]) -> Result<(), ObscuraError> {
        for (position, path) in files.iter().enumerate() {
            let expected = position as u64 + 1;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.parse_index(&name) != Some(expected) {
                return Err(ObscuraError::FrameSequenceGap {
                    expected,
                    found: name,
                });
            }
        }
        Ok(())
    }
}

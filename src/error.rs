//! Error types for the `obscura` crate.
//!
//! This module defines [`ObscuraError`], the unified error type returned by
//! all fallible operations in the crate. Errors carry rich context to aid
//! debugging, including file paths, tool exit codes, and the tail of the
//! codec tool's diagnostic output.

use std::{io::Error as IoError, path::PathBuf};

use image::ImageError;
use thiserror::Error;

use crate::progress::Stage;
use crate::store::JobId;

/// The unified error type for all `obscura` operations.
///
/// Every public method that can fail returns `Result<T, ObscuraError>`.
/// Variants carry enough context to diagnose the problem without needing
/// additional logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ObscuraError {
    /// A perturbation or service parameter is outside its valid range.
    ///
    /// Raised before any work begins.
    #[error("Invalid configuration for `{parameter}`: {reason}")]
    InvalidConfiguration {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The external codec tool could not be started.
    #[error("Codec tool {tool} is unavailable: {reason}")]
    ToolUnavailable {
        /// Executable that was invoked.
        tool: PathBuf,
        /// Underlying spawn failure.
        reason: String,
    },

    /// The external codec tool exited unsuccessfully.
    #[error("{tool} failed during {stage} (exit status {status:?}): {detail}")]
    ToolFailed {
        /// Executable that was invoked.
        tool: PathBuf,
        /// Pipeline stage the invocation belonged to.
        stage: Stage,
        /// Exit code, if the process exited normally.
        status: Option<i32>,
        /// Last lines of the tool's diagnostic output.
        detail: String,
    },

    /// The probe output could not be interpreted.
    #[error("Failed to probe {path}: {reason}")]
    ProbeFailed {
        /// File that was probed.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The probed file has no video stream.
    #[error("No video stream found in {0}")]
    NoVideoStream(PathBuf),

    /// A frame directory contained no files matching the sequence pattern.
    #[error("No frame files found in {directory}")]
    NoFrames {
        /// Directory that was scanned.
        directory: PathBuf,
    },

    /// A frame sequence is not contiguously numbered from 1.
    #[error("Frame sequence has a gap: expected index {expected}, found {found}")]
    FrameSequenceGap {
        /// The index that should have been present.
        expected: u64,
        /// The file name found in its place.
        found: String,
    },

    /// One or more items of a batch failed while the rest succeeded.
    #[error("{failed} of {total} items failed to process (first: {})", .items.first().map(String::as_str).unwrap_or("<none>"))]
    PartialBatchFailure {
        /// Number of failed items.
        failed: usize,
        /// Number of submitted items.
        total: usize,
        /// `"<item>: <error>"` for every failed item.
        items: Vec<String>,
    },

    /// A video job stage failed and the job was aborted.
    #[error("{stage} failed: {source}")]
    StageFailed {
        /// The stage that failed.
        stage: Stage,
        /// The stage-local cause.
        #[source]
        source: Box<ObscuraError>,
    },

    /// The perturbation worker pool could not be built.
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),

    /// A job's worker thread panicked.
    #[error("Worker for job {0} panicked")]
    JobPanicked(JobId),

    /// No record exists for the given job identifier.
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while decoding or encoding a frame.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

impl ObscuraError {
    /// Wrap `self` as the cause of a failed pipeline stage.
    ///
    /// Errors that are already stage failures are returned unchanged.
    pub(crate) fn in_stage(self, stage: Stage) -> Self {
        match self {
            stage_failure @ ObscuraError::StageFailed { .. } => stage_failure,
            other => ObscuraError::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Returns `true` for errors raised by parameter validation.
    pub fn is_configuration_error(&self) -> bool {
        match self {
            ObscuraError::InvalidConfiguration { .. } => true,
            ObscuraError::StageFailed { source, .. } => source.is_configuration_error(),
            _ => false,
        }
    }
}

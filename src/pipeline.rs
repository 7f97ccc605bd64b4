//! Video job orchestration.
//!
//! [`VideoPipeline`] sequences one video job:
//!
//! 1. decompose the source into numbered frames,
//! 2. perturb every frame on the batch scheduler,
//! 3. extract the audio track (best effort),
//! 4. recompose the perturbed frames into a silent video,
//! 5. merge the audio back in, or move the silent video into place,
//! 6. remove the job workspace.
//!
//! Any failing stage aborts the rest. The workspace is removed on every
//! exit path, and the declared output path only ever receives a finished
//! file by rename, so a failed job never leaves a partial output behind.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use obscura::{FfmpegCli, NoOpProgress, PerturbationConfig, VideoPipeline};
//!
//! let pipeline = VideoPipeline::new(Arc::new(FfmpegCli::new())).with_worker_count(4);
//! let outcome = pipeline.run(
//!     Path::new("input.mp4"),
//!     Path::new("out/processed.mp4"),
//!     &PerturbationConfig::sparse(0.01),
//!     &NoOpProgress,
//! );
//! if let Some(error) = &outcome.error {
//!     eprintln!("job failed: {error}");
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::batch;
use crate::codec::FrameCodec;
use crate::configuration::PerturbationConfig;
use crate::error::ObscuraError;
use crate::progress::{ProgressCallback, ProgressUpdate, Stage};
use crate::workspace::Workspace;

/// Facts about a successfully processed video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Source (and output) frame rate.
    pub frame_rate: f64,
    /// Number of frames perturbed and encoded.
    pub frame_count: u64,
    /// Whether the output carries the source audio track.
    pub has_audio: bool,
}

/// Terminal result of one video job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct JobOutcome {
    /// Whether the job completed.
    pub success: bool,
    /// The declared output path.
    pub output_path: PathBuf,
    /// Present on success. Serialized as `{}` on failure.
    #[serde(default, with = "metadata_or_empty")]
    pub metadata: Option<VideoMetadata>,
    /// Human-readable reason on failure. Never empty.
    pub error: Option<String>,
}

mod metadata_or_empty {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::VideoMetadata;

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Empty {}

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Metadata(VideoMetadata),
        Empty(Empty),
    }

    pub fn serialize<S: Serializer>(value: &Option<VideoMetadata>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(metadata) => metadata.serialize(serializer),
            None => Empty {}.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<VideoMetadata>, D::Error> {
        Ok(match Option::<Wire>::deserialize(deserializer)? {
            Some(Wire::Metadata(metadata)) => Some(metadata),
            Some(Wire::Empty(_)) | None => None,
        })
    }
}

/// Orchestrates decompose → perturb → audio → recompose → merge.
#[derive(Clone)]
pub struct VideoPipeline {
    codec: Arc<dyn FrameCodec>,
    worker_count: usize,
}

impl VideoPipeline {
    /// Create a pipeline over `codec` with one frame worker per spare core.
    pub fn new(codec: Arc<dyn FrameCodec>) -> Self {
        Self {
            codec,
            worker_count: crate::settings::default_frame_workers(),
        }
    }

    /// Set the number of parallel frame workers. Clamped to at least 1.
    #[must_use]
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    /// Number of parallel frame workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run a job and fold its result into a [`JobOutcome`].
    pub fn run(
        &self,
        input: &Path,
        output: &Path,
        config: &PerturbationConfig,
        progress: &dyn ProgressCallback,
    ) -> JobOutcome {
        match self.execute(input, output, config, progress) {
            Ok(metadata) => JobOutcome {
                success: true,
                output_path: output.to_path_buf(),
                metadata: Some(metadata),
                error: None,
            },
            Err(error) => {
                log::error!("Video job for {} failed: {error}", output.display());
                JobOutcome {
                    success: false,
                    output_path: output.to_path_buf(),
                    metadata: None,
                    error: Some(error.to_string()),
                }
            }
        }
    }

    /// Run a job, returning the output metadata or the failing stage.
    ///
    /// # Errors
    ///
    /// Returns [`ObscuraError::InvalidConfiguration`] before any I/O for an
    /// invalid `config`, and [`ObscuraError::StageFailed`] naming the stage
    /// that aborted the job otherwise.
    pub fn execute(
        &self,
        input: &Path,
        output: &Path,
        config: &PerturbationConfig,
        progress: &dyn ProgressCallback,
    ) -> Result<VideoMetadata, ObscuraError> {
        config.validate()?;
        let workspace =
            Workspace::for_output(output).map_err(|error| error.in_stage(Stage::Decompose))?;

        let decomposition = self
            .codec
            .decompose(input, &workspace.frames_dir(), progress)
            .map_err(|error| error.in_stage(Stage::Decompose))?;

        let report = batch::process_directory(
            &workspace.frames_dir(),
            &workspace.processed_dir(),
            config,
            progress,
            self.worker_count,
        )
        .and_then(batch::BatchReport::into_result)
        .map_err(|error| error.in_stage(Stage::PerturbFrames))?;
        log::debug!("Perturbed {} frames", report.succeeded());

        progress.on_progress(&ProgressUpdate::new(Stage::ExtractAudio, 0, 1));
        let audio = workspace.audio_path();
        let has_audio = self.codec.extract_audio(input, &audio);
        progress.on_progress(&ProgressUpdate::new(Stage::ExtractAudio, 1, 1));

        progress.on_progress(&ProgressUpdate::new(Stage::Recompose, 0, 1));
        let silent = workspace.silent_video_path();
        self.codec
            .recompose(&workspace.processed_dir(), &silent, decomposition.frame_rate)
            .map_err(|error| error.in_stage(Stage::Recompose))?;
        progress.on_progress(&ProgressUpdate::new(Stage::Recompose, 1, 1));

        let finished = if has_audio {
            progress.on_progress(&ProgressUpdate::new(Stage::MergeAudio, 0, 1));
            let merged = workspace.merged_video_path();
            self.codec
                .merge_audio_video(&silent, &audio, &merged)
                .map_err(|error| error.in_stage(Stage::MergeAudio))?;
            progress.on_progress(&ProgressUpdate::new(Stage::MergeAudio, 1, 1));
            merged
        } else {
            silent
        };

        move_into_place(&finished, output).map_err(|error| {
            let stage = if has_audio { Stage::MergeAudio } else { Stage::Recompose };
            error.in_stage(stage)
        })?;
        drop(workspace);

        let frame_count = if decomposition.extracted_frames > 0 {
            decomposition.extracted_frames
        } else {
            decomposition.frame_count
        };
        log::info!(
            "Wrote {} ({frame_count} frames, audio: {has_audio})",
            output.display()
        );

        Ok(VideoMetadata {
            frame_rate: decomposition.frame_rate,
            frame_count,
            has_audio,
        })
    }
}

/// Rename `finished` onto `output`, falling back to copy across devices.
fn move_into_place(finished: &Path, output: &Path) -> Result<(), ObscuraError> {
    if fs::rename(finished, output).is_ok() {
        return Ok(());
    }
    let staged = output.with_extension("partial");
    let copied = fs::copy(finished, &staged).and_then(|_| fs::rename(&staged, output));
    if let Err(error) = copied {
        let _ = fs::remove_file(&staged);
        return Err(error.into());
    }
    Ok(())
}

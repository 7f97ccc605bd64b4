//! # obscura
//!
//! Imperceptible pixel perturbation for images and videos.
//!
//! `obscura` nudges a small, random subset of pixel values so that an image
//! or every frame of a video changes numerically while looking the same.
//! Videos are split into frames with an external `ffmpeg`, perturbed in
//! parallel, re-encoded, and re-muxed with their original audio.
//!
//! ## Quick Start
//!
//! ### Perturb an Image
//!
//! ```no_run
//! use obscura::{PerturbationConfig, perturb};
//!
//! let image = image::open("photo.png").unwrap();
//! let perturbed = perturb(&image, &PerturbationConfig::sparse(0.01)).unwrap();
//! perturbed.save("photo_perturbed.png").unwrap();
//! ```
//!
//! ### Perturb a Video
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use obscura::{FfmpegCli, NoOpProgress, PerturbationConfig, VideoPipeline};
//!
//! let pipeline = VideoPipeline::new(Arc::new(FfmpegCli::new()));
//! let outcome = pipeline.run(
//!     Path::new("input.mp4"),
//!     Path::new("output.mp4"),
//!     &PerturbationConfig::block(16, 0.1, 0.1),
//!     &NoOpProgress,
//! );
//! assert!(outcome.success);
//! ```
//!
//! ### Run Jobs in the Background
//!
//! ```no_run
//! use obscura::{JobRunner, JobStatus, ServiceSettings, VideoRequest};
//!
//! let runner = JobRunner::new(ServiceSettings::from_env().unwrap());
//! let handle = runner
//!     .submit_video(VideoRequest::new("input.mp4", "output.mp4"))
//!     .unwrap();
//!
//! // Poll the store from anywhere while the job runs.
//! let record = runner.store().get(handle.id()).unwrap();
//! println!("{}: {}%", record.status, record.progress.percent);
//!
//! let record = handle.join().unwrap();
//! assert_eq!(record.status, JobStatus::Completed);
//! ```
//!
//! ## Features
//!
//! - **Two strategies**: sparse single-channel nudges of ±3, or ±20
//!   shifts of random pixels inside randomly chosen square blocks
//! - **Reproducible runs**: optional seed, salted per frame file name
//! - **Visual debug**: paint the touched pixels or blocks in red on top of
//!   the real perturbation
//! - **Parallel frames**: a bounded worker pool that reports per-frame
//!   failures instead of aborting
//! - **Job orchestration**: guaranteed workspace cleanup, no partial output
//!   on failure, staged progress reporting
//! - **Admission control**: separate blocking gates for video jobs and
//!   single images
//! - **Pluggable codec**: everything goes through the [`FrameCodec`] trait
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | `watch_job` progress streams and `perturb_image_async` via Tokio |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! Video processing needs the `ffmpeg` and `ffprobe` executables, either on
//! `PATH` or configured through [`ServiceSettings`].

pub mod batch;
pub mod codec;
pub mod configuration;
pub mod error;
pub mod gate;
pub mod perturb;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod sequence;
pub mod service;
pub mod settings;
pub mod still;
pub mod store;
#[cfg(feature = "async")]
pub mod stream;
pub mod workspace;

pub use batch::{BatchReport, ItemOutcome, process_directory};
pub use codec::{Decomposition, EncodeSettings, FfmpegCli, FrameCodec};
pub use configuration::{PerturbationConfig, Strategy};
pub use error::ObscuraError;
pub use gate::{AdmissionGate, GatePermit};
pub use perturb::{perturb, perturb_with_rng};
pub use pipeline::{JobOutcome, VideoMetadata, VideoPipeline};
pub use probe::VideoProbe;
pub use progress::{ChannelProgress, NoOpProgress, ProgressCallback, ProgressUpdate, Stage};
pub use sequence::FrameSequence;
pub use service::{JobHandle, JobRunner, VideoRequest};
pub use settings::ServiceSettings;
pub use still::{EncodedImage, perturb_encoded, perturb_file};
pub use store::{JobId, JobProgress, JobRecord, JobStatus, JobStore};
#[cfg(feature = "async")]
pub use stream::{ImageFuture, JobProgressStream, perturb_image_async, watch_job};
pub use workspace::Workspace;

//! Background job execution.
//!
//! [`JobRunner`] is the entry point a request-handling layer talks to. A
//! video submission returns a [`JobHandle`] immediately; the job itself
//! waits for a video admission slot on its own thread, then runs the
//! [`VideoPipeline`] to a terminal state whether or not anyone is watching.
//!
//! Progress flows from the pipeline into a channel drained by one
//! aggregator thread per job, which is the only writer of that job's
//! [`JobRecord`] progress.
//!
//! # Example
//!
//! ```no_run
//! use obscura::{JobRunner, PerturbationConfig, ServiceSettings, VideoRequest};
//!
//! let runner = JobRunner::new(ServiceSettings::from_env()?);
//! let handle = runner.submit_video(
//!     VideoRequest::new("uploads/clip.mp4", "processed/clip.mp4")
//!         .with_config(PerturbationConfig::block(16, 0.1, 0.1)),
//! )?;
//! println!("submitted job {}", handle.id());
//!
//! let record = handle.join();
//! println!("{:?}", record.map(|record| record.status));
//! # Ok::<(), obscura::ObscuraError>(())
//! ```

use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::batch::panic_message;
use crate::codec::{FfmpegCli, FrameCodec};
use crate::configuration::PerturbationConfig;
use crate::error::ObscuraError;
use crate::gate::AdmissionGate;
use crate::pipeline::VideoPipeline;
use crate::progress::{ChannelProgress, ProgressUpdate};
use crate::settings::ServiceSettings;
use crate::still::{self, EncodedImage};
use crate::store::{JobId, JobRecord, JobStore};

/// A video job to submit.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    input: PathBuf,
    output: PathBuf,
    config: PerturbationConfig,
    source_name: Option<String>,
    remove_input: bool,
}

impl VideoRequest {
    /// Perturb `input` into `output` with the default configuration.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            config: PerturbationConfig::default(),
            source_name: None,
            remove_input: false,
        }
    }

    /// Set the perturbation configuration.
    #[must_use]
    pub fn with_config(mut self, config: PerturbationConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the display name stored on the job record.
    ///
    /// Defaults to the input's file name.
    #[must_use]
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    /// Delete the input file once the job reaches a terminal state.
    #[must_use]
    pub fn remove_input_when_done(mut self, remove: bool) -> Self {
        self.remove_input = remove;
        self
    }

    fn display_name(&self) -> String {
        self.source_name.clone().unwrap_or_else(|| {
            self.input
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

/// Handle to a submitted video job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    store: JobStore,
    thread: JoinHandle<()>,
}

impl JobHandle {
    /// Identifier of the job.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Returns `true` once the job thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the job to reach a terminal state and return its record.
    ///
    /// Returns `None` if the record was removed from the store meanwhile.
    pub fn join(self) -> Option<JobRecord> {
        if self.thread.join().is_err() {
            log::error!("Job thread for {} exited abnormally", self.id);
        }
        self.store.get(self.id)
    }
}

/// Runs video jobs in the background and images in the foreground, each
/// under its own admission gate.
#[derive(Clone)]
pub struct JobRunner {
    store: JobStore,
    pipeline: VideoPipeline,
    video_gate: AdmissionGate,
    image_gate: AdmissionGate,
}

impl JobRunner {
    /// Build a runner that drives the `ffmpeg` executables named in `settings`.
    pub fn new(settings: ServiceSettings) -> Self {
        let codec = FfmpegCli::new()
            .with_ffmpeg(settings.ffmpeg.clone())
            .with_ffprobe(settings.ffprobe.clone());
        Self::with_codec(settings, Arc::new(codec))
    }

    /// Build a runner over an arbitrary codec backend.
    pub fn with_codec(settings: ServiceSettings, codec: Arc<dyn FrameCodec>) -> Self {
        log::info!(
            "Job runner: {} video slots, {} image slots, {} frame workers",
            settings.video_slots,
            settings.image_slots,
            settings.frame_workers
        );
        Self {
            store: JobStore::new(),
            pipeline: VideoPipeline::new(codec).with_worker_count(settings.frame_workers),
            video_gate: AdmissionGate::new(settings.video_slots),
            image_gate: AdmissionGate::new(settings.image_slots),
        }
    }

    /// Use an existing store instead of a fresh one.
    #[must_use]
    pub fn with_store(mut self, store: JobStore) -> Self {
        self.store = store;
        self
    }

    /// The store jobs are recorded in.
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Gate bounding concurrent video jobs.
    pub fn video_gate(&self) -> &AdmissionGate {
        &self.video_gate
    }

    /// Gate bounding concurrent single-image requests.
    pub fn image_gate(&self) -> &AdmissionGate {
        &self.image_gate
    }

    /// Accept a video job and start it in the background.
    ///
    /// The job is recorded as `pending` before this returns. It stays
    /// pending until a video slot frees up.
    ///
    /// # Errors
    ///
    /// Returns [`ObscuraError::InvalidConfiguration`] without recording a job
    /// if the request's configuration is invalid, and
    /// [`ObscuraError::IoError`] if the job thread cannot be started.
    pub fn submit_video(&self, request: VideoRequest) -> Result<JobHandle, ObscuraError> {
        request.config.validate()?;

        let id = JobId::new();
        self.store
            .insert(JobRecord::pending(id, request.display_name(), request.output.clone()));
        log::info!("Accepted job {id} for {}", request.input.display());

        let store = self.store.clone();
        let pipeline = self.pipeline.clone();
        let gate = self.video_gate.clone();
        let spawned = thread::Builder::new()
            .name(format!("obscura-job-{id}"))
            .spawn(move || run_job(id, &request, &store, &pipeline, &gate));

        match spawned {
            Ok(thread) => Ok(JobHandle {
                id,
                store: self.store.clone(),
                thread,
            }),
            Err(error) => {
                self.store.fail(id, format!("failed to start job: {error}"));
                Err(error.into())
            }
        }
    }

    /// Perturb an in-memory image under the image gate.
    ///
    /// Blocks while all image slots are taken.
    ///
    /// # Errors
    ///
    /// See [`still::perturb_encoded`].
    pub fn perturb_image(
        &self,
        bytes: &[u8],
        file_name: &str,
        config: &PerturbationConfig,
    ) -> Result<EncodedImage, ObscuraError> {
        let _permit = self.image_gate.acquire();
        still::perturb_encoded(bytes, file_name, config)
    }
}

fn run_job(id: JobId, request: &VideoRequest, store: &JobStore, pipeline: &VideoPipeline, gate: &AdmissionGate) {
    let permit = gate.acquire();
    if !store.mark_processing(id) {
        log::warn!("Job {id} was no longer pending when its slot opened");
        return;
    }
    log::info!("Started job {id}");

    let (sender, receiver) = mpsc::channel::<ProgressUpdate>();
    let aggregator = {
        let store = store.clone();
        thread::spawn(move || {
            for update in receiver {
                store.record_progress(id, &update);
            }
        })
    };

    let progress = ChannelProgress::new(sender);
    let result = catch_unwind(AssertUnwindSafe(|| {
        pipeline.run(&request.input, &request.output, &request.config, &progress)
    }));
    drop(progress);
    if aggregator.join().is_err() {
        log::warn!("Progress aggregator for job {id} panicked");
    }

    match result {
        Ok(outcome) => match (outcome.metadata, outcome.error) {
            (Some(metadata), None) if outcome.success => {
                store.complete(id, metadata);
                log::info!("Job {id} completed");
            }
            (_, error) => {
                store.fail(id, error.unwrap_or_default());
                log::info!("Job {id} failed");
            }
        },
        Err(payload) => {
            let message = format!("{}: {}", ObscuraError::JobPanicked(id), panic_message(payload.as_ref()));
            log::error!("{message}");
            store.fail(id, message);
        }
    }
    drop(permit);

    if request.remove_input {
        remove_input(&request.input);
    }
}

fn remove_input(input: &Path) {
    if let Err(error) = fs::remove_file(input) {
        log::warn!("Failed to remove input {}: {error}", input.display());
    }
}

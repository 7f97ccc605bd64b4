//! Async job observation.
//!
//! [`watch_job`] turns a [`JobStore`] record into a [`JobProgressStream`]
//! of snapshots, one per polling interval, ending with the first terminal
//! snapshot. This is the shape a server-sent-events endpoint needs.
//!
//! [`perturb_image_async`] runs single-image perturbation on Tokio's
//! blocking pool under the runner's image gate.
//!
//! Both require a running Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use tokio_stream::StreamExt;
//!
//! use obscura::{JobRunner, ServiceSettings, VideoRequest, watch_job};
//!
//! # async fn example() -> Result<(), obscura::ObscuraError> {
//! let runner = JobRunner::new(ServiceSettings::default());
//! let handle = runner.submit_video(VideoRequest::new("clip.mp4", "out/clip.mp4"))?;
//!
//! let mut updates = watch_job(runner.store().clone(), handle.id(), Duration::from_millis(500));
//! while let Some(snapshot) = updates.next().await {
//!     let record = snapshot?;
//!     println!("{} {}%", record.status, record.progress.percent);
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::Stream;

use crate::configuration::PerturbationConfig;
use crate::error::ObscuraError;
use crate::service::JobRunner;
use crate::still::EncodedImage;
use crate::store::{JobId, JobRecord, JobStore};

const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// Snapshots of one job, ending after the first terminal snapshot.
///
/// Yields a single [`ObscuraError::JobNotFound`] if the job is unknown or
/// is removed from the store while being watched.
pub struct JobProgressStream {
    receiver: Receiver<Result<JobRecord, ObscuraError>>,
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

impl Stream for JobProgressStream {
    type Item = Result<JobRecord, ObscuraError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Watch `id` in `store`, sampling its record every `interval`.
///
/// The first snapshot is taken immediately. A zero `interval` is raised to
/// one millisecond.
pub fn watch_job(store: JobStore, id: JobId, interval: Duration) -> JobProgressStream {
    let (sender, receiver) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let period = interval.max(Duration::from_millis(1));

    let handle = tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(record) = store.get(id) else {
                let _ = sender.send(Err(ObscuraError::JobNotFound(id))).await;
                return;
            };
            let terminal = record.status.is_terminal();
            if sender.send(Ok(record)).await.is_err() || terminal {
                return;
            }
        }
    });

    JobProgressStream { receiver, handle }
}

/// Future resolving to a perturbed, re-encoded image.
pub struct ImageFuture {
    handle: JoinHandle<Result<EncodedImage, ObscuraError>>,
}

impl Future for ImageFuture {
    type Output = Result<EncodedImage, ObscuraError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|result| {
            result.unwrap_or_else(|error| {
                Err(ObscuraError::ThreadPool(format!("image task did not finish: {error}")))
            })
        })
    }
}

/// Run [`JobRunner::perturb_image`] on the blocking pool.
pub fn perturb_image_async(
    runner: &JobRunner,
    bytes: Vec<u8>,
    file_name: String,
    config: PerturbationConfig,
) -> ImageFuture {
    let runner = runner.clone();
    let handle = tokio::task::spawn_blocking(move || runner.perturb_image(&bytes, &file_name, &config));
    ImageFuture { handle }
}

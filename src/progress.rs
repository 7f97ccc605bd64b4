//! Progress reporting.
//!
//! Every stage of the perturbation pipeline reports through one contract:
//! a [`ProgressCallback`] receiving [`ProgressUpdate`] snapshots of
//! `(current, total, stage)`.
//!
//! Callbacks are invoked synchronously from whichever thread observes the
//! progress, so they must be cheap. When updates need to cross into another
//! thread (for example to update a [`JobStore`](crate::JobStore)), use
//! [`ChannelProgress`] and drain the receiving end from a single
//! aggregator.
//!
//! # Example
//!
//! ```
//! use obscura::{ProgressCallback, ProgressUpdate, Stage};
//!
//! let print = |update: &ProgressUpdate| {
//!     println!("[{}] {}/{} ({}%)", update.stage, update.current, update.total, update.percent());
//! };
//!
//! print.on_progress(&ProgressUpdate::new(Stage::PerturbFrames, 3, 12));
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

/// A step of the video pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Stage {
    /// Splitting the source video into numbered frame images.
    Decompose,
    /// Perturbing every frame image.
    PerturbFrames,
    /// Copying the audio track out of the source video.
    ExtractAudio,
    /// Encoding the perturbed frames into a silent video.
    Recompose,
    /// Muxing the silent video with the extracted audio.
    MergeAudio,
}

impl Stage {
    /// Human-readable label reported alongside progress counts.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Decompose => "decompose",
            Stage::PerturbFrames => "perturb frames",
            Stage::ExtractAudio => "extract audio",
            Stage::Recompose => "recompose",
            Stage::MergeAudio => "merge audio",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.label())
    }
}

/// A snapshot of pipeline progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// The stage reporting progress.
    pub stage: Stage,
    /// Items completed so far within the stage.
    pub current: u64,
    /// Items expected within the stage. Zero when unknown.
    pub total: u64,
}

impl ProgressUpdate {
    /// Create a new snapshot.
    pub fn new(stage: Stage, current: u64, total: u64) -> Self {
        Self {
            stage,
            current,
            total,
        }
    }

    /// Integer completion percentage, or 0 when `total` is unknown.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.current.min(self.total) * 100) / self.total) as u8
    }
}

/// Trait for receiving progress updates.
///
/// Implementations must be [`Send`] and [`Sync`] because updates may be
/// delivered from codec reader threads or batch aggregators.
///
/// Progress callbacks are **infallible**: they observe but cannot halt the
/// operation.
pub trait ProgressCallback: Send + Sync {
    /// Called each time a stage makes progress.
    fn on_progress(&self, update: &ProgressUpdate);
}

impl<F> ProgressCallback for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// A no-op implementation that discards all progress notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

/// Forwards every update into an [`mpsc`](std::sync::mpsc) channel.
///
/// The receiving end is expected to be drained by exactly one aggregator.
/// Sends never block; if the receiver is gone, updates are dropped.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: Sender<ProgressUpdate>,
}

impl ChannelProgress {
    /// Wrap the sending half of a channel.
    pub fn new(sender: Sender<ProgressUpdate>) -> Self {
        Self { sender }
    }
}

impl ProgressCallback for ChannelProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        let _ = self.sender.send(*update);
    }
}

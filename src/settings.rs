//! Service-level settings.
//!
//! [`ServiceSettings`] sizes the two admission gates and the frame worker
//! pool, and locates the codec executables. Defaults scale with the number
//! of CPUs; [`ServiceSettings::from_env`] overlays `OBSCURA_*` variables.

use std::env;
use std::path::PathBuf;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::error::ObscuraError;

/// Environment variable naming the `ffmpeg` executable.
pub const ENV_FFMPEG: &str = "OBSCURA_FFMPEG";
/// Environment variable naming the `ffprobe` executable.
pub const ENV_FFPROBE: &str = "OBSCURA_FFPROBE";
/// Environment variable overriding the video admission slots.
pub const ENV_VIDEO_SLOTS: &str = "OBSCURA_VIDEO_SLOTS";
/// Environment variable overriding the image admission slots.
pub const ENV_IMAGE_SLOTS: &str = "OBSCURA_IMAGE_SLOTS";
/// Environment variable overriding the frame worker count.
pub const ENV_FRAME_WORKERS: &str = "OBSCURA_FRAME_WORKERS";

/// Sizing and tool locations for a [`JobRunner`](crate::JobRunner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// `ffmpeg` executable.
    pub ffmpeg: PathBuf,
    /// `ffprobe` executable.
    pub ffprobe: PathBuf,
    /// Video jobs allowed to run at once.
    pub video_slots: usize,
    /// Single-image requests allowed to run at once.
    pub image_slots: usize,
    /// Parallel frame workers within one video job.
    pub frame_workers: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::for_cpus(cpu_count())
    }
}

impl ServiceSettings {
    /// Defaults sized for a machine with `cpus` cores.
    pub fn for_cpus(cpus: usize) -> Self {
        let cpus = cpus.max(1);
        let video_slots = match cpus {
            0..=4 => 1,
            5..=8 => 2,
            _ => (cpus / 4).min(3),
        };
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            video_slots,
            image_slots: cpus.clamp(4, 12),
            frame_workers: cpus.saturating_sub(2).max(1),
        }
    }

    /// Defaults overlaid with any `OBSCURA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ObscuraError::InvalidConfiguration`] if a slot or worker
    /// variable is not a positive integer.
    pub fn from_env() -> Result<Self, ObscuraError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ObscuraError> {
        let mut settings = Self::default();
        if let Some(path) = lookup(ENV_FFMPEG) {
            settings.ffmpeg = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_FFPROBE) {
            settings.ffprobe = PathBuf::from(path);
        }
        if let Some(value) = lookup(ENV_VIDEO_SLOTS) {
            settings.video_slots = parse_count("video_slots", &value)?;
        }
        if let Some(value) = lookup(ENV_IMAGE_SLOTS) {
            settings.image_slots = parse_count("image_slots", &value)?;
        }
        if let Some(value) = lookup(ENV_FRAME_WORKERS) {
            settings.frame_workers = parse_count("frame_workers", &value)?;
        }
        log::debug!("Service settings: {settings:?}");
        Ok(settings)
    }
}

/// Frame workers for this machine: every core but two, at least one.
pub(crate) fn default_frame_workers() -> usize {
    cpu_count().saturating_sub(2).max(1)
}

fn cpu_count() -> usize {
    thread::available_parallelism().map(usize::from).unwrap_or(1)
}

fn parse_count(parameter: &'static str, value: &str) -> Result<usize, ObscuraError> {
    match value.trim().parse::<usize>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(ObscuraError::InvalidConfiguration {
            parameter,
            reason: format!("expected a positive integer, got {value:?}"),
        }),
    }
}

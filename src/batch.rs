//! Batch perturbation scheduler.
//!
//! [`process_directory`] perturbs every eligible image in a directory on a
//! dedicated [`rayon`] pool of `worker_count` threads. Workers share no
//! mutable state: each opens, perturbs and saves its own file, then sends a
//! per-item [`ItemOutcome`] over a channel. The calling thread is the single
//! aggregator; it counts completions, fires the progress callback once per
//! completion, and assembles the [`BatchReport`].
//!
//! A failing item (including a panicking one) is recorded and never stops
//! its siblings.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use obscura::{NoOpProgress, PerturbationConfig, batch};
//!
//! let report = batch::process_directory(
//!     Path::new("frames"),
//!     Path::new("processed"),
//!     &PerturbationConfig::sparse(0.01),
//!     &NoOpProgress,
//!     4,
//! )?;
//! println!("{} of {} frames perturbed", report.succeeded(), report.total);
//! # Ok::<(), obscura::ObscuraError>(())
//! ```

use std::any::Any;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use rayon::ThreadPoolBuilder;

use crate::configuration::PerturbationConfig;
use crate::error::ObscuraError;
use crate::progress::{ProgressCallback, ProgressUpdate, Stage};
use crate::still::perturb_file;

/// File extensions picked up by [`process_directory`] (case-insensitive).
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// Outcome of perturbing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    /// File name of the item within the input directory.
    pub item: String,
    /// Why the item failed, or `None` on success.
    pub error: Option<String>,
}

impl ItemOutcome {
    /// Returns `true` if the item was perturbed and saved.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated result of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct BatchReport {
    /// Number of eligible files submitted.
    pub total: usize,
    /// One outcome per finished item, in completion order.
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    /// Number of items that have finished, successfully or not.
    pub fn completed(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of items that succeeded.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_success()).count()
    }

    /// Items that failed.
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    /// Returns `true` when every submitted item succeeded.
    pub fn is_success(&self) -> bool {
        self.completed() == self.total && self.failures().next().is_none()
    }

    /// Convert into a `Result`, turning any failed item into
    /// [`ObscuraError::PartialBatchFailure`].
    pub fn into_result(self) -> Result<Self, ObscuraError> {
        if self.is_success() {
            return Ok(self);
        }
        let items: Vec<String> = self
            .failures()
            .map(|outcome| {
                format!(
                    "{}: {}",
                    outcome.item,
                    outcome.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        Err(ObscuraError::PartialBatchFailure {
            failed: items.len(),
            total: self.total,
            items,
        })
    }
}

/// Perturb every eligible image in `input_dir` into `output_dir`.
///
/// Files keep their names. `progress` receives
/// `(completed, total, "perturb frames")` exactly once per finished item.
/// A directory without eligible files is a no-op.
///
/// # Errors
///
/// Only batch-level problems are errors: an invalid `config`, an unreadable
/// input directory, an output directory that cannot be created, or a pool
/// that cannot be started. Per-item failures are reported in the
/// [`BatchReport`].
pub fn process_directory(
    input_dir: &Path,
    output_dir: &Path,
    config: &PerturbationConfig,
    progress: &dyn ProgressCallback,
    worker_count: usize,
) -> Result<BatchReport, ObscuraError> {
    config.validate()?;
    fs::create_dir_all(output_dir)?;

    let files = eligible_files(input_dir)?;
    let total = files.len();
    if total == 0 {
        log::debug!("No images to perturb in {}", input_dir.display());
        return Ok(BatchReport::default());
    }

    let workers = worker_count.max(1);
    log::info!(
        "Perturbing {total} images from {} with {workers} workers",
        input_dir.display()
    );

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("obscura-perturb-{index}"))
        .build()
        .map_err(|error| ObscuraError::ThreadPool(error.to_string()))?;

    let (sender, receiver) = mpsc::channel::<ItemOutcome>();
    for name in files {
        let sender = sender.clone();
        let input = input_dir.join(&name);
        let output = output_dir.join(&name);
        let config = *config;
        pool.spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| perturb_file(&input, &output, &config)));
            let error = match result {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(error.to_string()),
                Err(payload) => Some(format!("worker panicked: {}", panic_message(payload.as_ref()))),
            };
            let _ = sender.send(ItemOutcome { item: name, error });
        });
    }
    drop(sender);

    let mut report = BatchReport {
        total,
        outcomes: Vec::with_capacity(total),
    };
    for outcome in receiver {
        if let Some(error) = &outcome.error {
            log::warn!("Failed to perturb {}: {error}", outcome.item);
        }
        report.outcomes.push(outcome);
        progress.on_progress(&ProgressUpdate::new(
            Stage::PerturbFrames,
            report.completed() as u64,
            total as u64,
        ));
    }

    log::info!("Perturbed {} of {total} images", report.succeeded());
    Ok(report)
}

/// File names in `directory` with an [`IMAGE_EXTENSIONS`] extension, sorted.
pub fn eligible_files(directory: &Path) -> Result<Vec<String>, ObscuraError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let path: PathBuf = entry.path();
        let eligible = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(extension))
            });
        if !eligible || !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(item: &str, error: Option<&str>) -> ItemOutcome {
        ItemOutcome {
            item: item.to_string(),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn report_counts_failures() {
        let report = BatchReport {
            total: 3,
            outcomes: vec![
                outcome("a.jpg", None),
                outcome("b.jpg", Some("corrupt")),
                outcome("c.jpg", None),
            ],
        };
        assert_eq!(report.completed(), 3);
        assert_eq!(report.succeeded(), 2);
        assert!(!report.is_success());

        match report.into_result() {
            Err(ObscuraError::PartialBatchFailure { failed, total, items }) => {
                assert_eq!((failed, total), (1, 3));
                assert_eq!(items, vec!["b.jpg: corrupt".to_string()]);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[test]
    fn empty_report_is_success() {
        assert!(BatchReport::default().into_result().is_ok());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}

//! Job progress store.
//!
//! [`JobStore`] maps job identifiers to [`JobRecord`]s. It is a cheap,
//! cloneable handle over shared state: the job runner holds one clone and
//! writes through it, callers hold others and read snapshots. Every write
//! replaces fields under a single write lock, so a reader observes a record
//! either before or after an update, never halfway through one.
//!
//! Records never expire. Removing finished jobs is up to the owner of the
//! store, via [`JobStore::remove`].
//!
//! Status transitions are guarded: `pending → processing → completed|error`,
//! with `pending → error` allowed for jobs that fail before they start.
//! Once a record is terminal, further writes are ignored.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::VideoMetadata;
use crate::progress::ProgressUpdate;

/// Opaque identifier of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value).map(Self)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, waiting for an admission slot.
    Pending,
    /// Running.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Error,
}

impl JobStatus {
    /// Returns `true` for `completed` and `error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Lowercase name, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest progress reported by a job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobProgress {
    /// Units done within the current stage.
    pub current: u64,
    /// Units in the current stage.
    pub total: u64,
    /// Label of the current stage, empty before the first report.
    pub stage: String,
    /// `current / total` as a whole percentage.
    pub percent: u8,
}

impl From<&ProgressUpdate> for JobProgress {
    fn from(update: &ProgressUpdate) -> Self {
        Self {
            current: update.current,
            total: update.total,
            stage: update.stage.label().to_string(),
            percent: update.percent(),
        }
    }
}

/// Snapshot of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identifier.
    pub id: JobId,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Latest progress.
    pub progress: JobProgress,
    /// Declared output path.
    pub output_path: PathBuf,
    /// Name of the submitted source, for display.
    pub source_name: String,
    /// Failure detail, set only in the `error` state. Never empty.
    pub error: Option<String>,
    /// Output facts, set only in the `completed` state.
    pub metadata: Option<VideoMetadata>,
}

impl JobRecord {
    /// A fresh `pending` record.
    pub fn pending(id: JobId, source_name: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            output_path: output_path.into(),
            source_name: source_name.into(),
            error: None,
            metadata: None,
        }
    }
}

/// Thread-safe map of job records.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    records: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl JobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: JobRecord) {
        self.write().insert(record.id, record);
    }

    /// Snapshot of a record.
    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.read().get(&id).cloned()
    }

    /// Remove a record, returning its last snapshot.
    pub fn remove(&self, id: JobId) -> Option<JobRecord> {
        self.write().remove(&id)
    }

    /// Identifiers of all stored jobs, in no particular order.
    pub fn ids(&self) -> Vec<JobId> {
        self.read().keys().copied().collect()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if no jobs are stored.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Number of jobs currently in `status`.
    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.read().values().filter(|record| record.status == status).count()
    }

    /// Move a `pending` job to `processing`.
    ///
    /// Returns `false` if the job is unknown or not pending.
    pub fn mark_processing(&self, id: JobId) -> bool {
        self.update(id, |record| {
            if record.status != JobStatus::Pending {
                return false;
            }
            record.status = JobStatus::Processing;
            true
        })
    }

    /// Record a progress report for a `processing` job.
    ///
    /// Returns `false` if the job is unknown or not processing.
    pub fn record_progress(&self, id: JobId, update: &ProgressUpdate) -> bool {
        self.update(id, |record| {
            if record.status != JobStatus::Processing {
                return false;
            }
            record.progress = JobProgress::from(update);
            true
        })
    }

    /// Move a `processing` job to `completed`.
    ///
    /// Returns `false` if the job is unknown or not processing.
    pub fn complete(&self, id: JobId, metadata: VideoMetadata) -> bool {
        self.update(id, |record| {
            if record.status != JobStatus::Processing {
                return false;
            }
            record.status = JobStatus::Completed;
            record.metadata = Some(metadata);
            record.error = None;
            if record.progress.total > 0 {
                record.progress.current = record.progress.total;
            }
            record.progress.percent = 100;
            true
        })
    }

    /// Move a non-terminal job to `error`.
    ///
    /// An empty `message` is stored as `"unknown error"`. Returns `false` if
    /// the job is unknown or already terminal.
    pub fn fail(&self, id: JobId, message: impl Into<String>) -> bool {
        let message = message.into();
        self.update(id, |record| {
            if record.status.is_terminal() {
                return false;
            }
            record.status = JobStatus::Error;
            record.metadata = None;
            record.error = Some(if message.trim().is_empty() {
                "unknown error".to_string()
            } else {
                message
            });
            true
        })
    }

    /// Stage label of the latest progress report, if any.
    pub fn current_stage(&self, id: JobId) -> Option<String> {
        self.read()
            .get(&id)
            .map(|record| record.progress.stage.clone())
            .filter(|stage| !stage.is_empty())
    }

    fn update(&self, id: JobId, apply: impl FnOnce(&mut JobRecord) -> bool) -> bool {
        let mut records = self.write();
        match records.get_mut(&id) {
            Some(record) => {
                let applied = apply(record);
                if !applied {
                    log::debug!("Ignored update for job {id} in state {}", record.status);
                }
                applied
            }
            None => false,
        }
    }

    // A panicking writer never leaves a record half-written, so a poisoned
    // lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Long-running encryption jobs: a typed job store and a progress channel.
//!
//! The worker owns a [`ProgressReporter`]; the caller keeps the matching
//! [`ProgressReceiver`], reads progress from it and can cancel the worker.
//! A [`JobStore`] records the lifecycle create → update → complete/fail → evict.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::{Error, Result};

pub type JobId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum JobState {
    Running,
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    pub completed: usize,
    pub total: usize,
    /// Last item reported (e.g. the column just encrypted).
    pub current_item: Option<String>,
}

pub trait JobStore: Send + Sync {
    fn create(&self, total: usize) -> JobId;
    fn update(&self, id: JobId, completed: usize, item: &str) -> Result<()>;
    fn complete(&self, id: JobId) -> Result<()>;
    fn fail(&self, id: JobId, reason: &str) -> Result<()>;
    fn status(&self, id: JobId) -> Result<JobStatus>;
    /// Remove a job and return its final status.
    fn evict(&self, id: JobId) -> Result<JobStatus>;
}

/// In-memory store behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    next_id: AtomicU64,
    jobs: Mutex<HashMap<JobId, JobStatus>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobStatus>> {
        // A panic while holding the lock cannot leave a half-written status.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_job<T>(&self, id: JobId, f: impl FnOnce(&mut JobStatus) -> T) -> Result<T> {
        let mut jobs = self.jobs();
        let job = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        Ok(f(job))
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, total: usize) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.jobs().insert(
            id,
            JobStatus {
                id,
                state: JobState::Running,
                completed: 0,
                total,
                current_item: None,
            },
        );
        id
    }

    fn update(&self, id: JobId, completed: usize, item: &str) -> Result<()> {
        self.with_job(id, |job| {
            job.completed = completed.min(job.total);
            job.current_item = Some(item.to_string());
        })
    }

    fn complete(&self, id: JobId) -> Result<()> {
        self.with_job(id, |job| {
            job.completed = job.total;
            job.state = JobState::Completed;
        })
    }

    fn fail(&self, id: JobId, reason: &str) -> Result<()> {
        self.with_job(id, |job| job.state = JobState::Failed(reason.to_string()))
    }

    fn status(&self, id: JobId) -> Result<JobStatus> {
        self.with_job(id, |job| job.clone())
    }

    fn evict(&self, id: JobId) -> Result<JobStatus> {
        self.jobs().remove(&id).ok_or(Error::JobNotFound(id))
    }
}

/// One progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub job_id: JobId,
    pub completed: usize,
    pub total: usize,
    pub item: String,
}

/// Worker side of a progress channel.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    sender: Sender<Progress>,
    cancelled: Arc<AtomicBool>,
}

/// Caller side of a progress channel.
#[derive(Debug)]
pub struct ProgressReceiver {
    job_id: JobId,
    receiver: Receiver<Progress>,
    cancelled: Arc<AtomicBool>,
}

pub fn progress_channel(job_id: JobId) -> (ProgressReporter, ProgressReceiver) {
    let (sender, receiver) = mpsc::channel();
    let cancelled = Arc::new(AtomicBool::new(false));
    (
        ProgressReporter {
            job_id,
            sender,
            cancelled: Arc::clone(&cancelled),
        },
        ProgressReceiver {
            job_id,
            receiver,
            cancelled,
        },
    )
}

impl ProgressReporter {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Report progress. A dropped receiver is not an error for the worker.
    pub fn report(&self, completed: usize, total: usize, item: &str) {
        let _ = self.sender.send(Progress {
            job_id: self.job_id,
            completed,
            total,
            item: item.to_string(),
        });
    }
}

impl ProgressReceiver {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Ask the worker to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Block for the next event; `None` once the worker is gone.
    pub fn recv(&self) -> Option<Progress> {
        self.receiver.recv().ok()
    }

    /// Events already sent, without blocking.
    pub fn pending(&self) -> Vec<Progress> {
        self.receiver.try_iter().collect()
    }

    /// Apply every pending event to a job store; returns how many were applied.
    pub fn apply_to(&self, store: &dyn JobStore) -> Result<usize> {
        let events = self.pending();
        for event in &events {
            store.update(event.job_id, event.completed, &event.item)?;
        }
        Ok(events.len())
    }
}

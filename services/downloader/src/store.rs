//! In-memory job store: the only place job records live.
//!
//! LEARNING: Nothing outside this module touches the map. Every read returns a
//! clone (a snapshot) and every write goes through `update`, which runs the
//! caller's closure while holding the write lock. That makes each closure one
//! atomic step: readers see the record before it or after it, never halfway.
//!
//! LEARNING: parking_lot's `RwLock` has no poisoning. If a closure panics
//! while holding the lock, the guard still unlocks on unwind and the map
//! stays usable for every other job.
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::JobError;
use crate::models::Job;

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Entry>,
    next_seq: u64,
}

struct Entry {
    seq: u64,
    job: Job,
}

#[derive(Default)]
pub struct JobStore {
    inner: RwLock<Inner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh `Queued` job and returns its id.
    pub fn create(&self) -> Uuid {
        let mut inner = self.inner.write();
        let mut id = Uuid::new_v4();
        while inner.jobs.contains_key(&id) {
            id = Uuid::new_v4();
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(id, Entry { seq, job: Job::new(id) });
        id
    }

    pub fn get(&self, id: Uuid) -> Result<Job, JobError> {
        let inner = self.inner.read();
        inner
            .jobs
            .get(&id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Snapshot of every job, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let inner = self.inner.read();
        let mut entries: Vec<&Entry> = inner.jobs.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.job.clone()).collect()
    }

    /// Applies `mutate` to the job under the write lock and returns its result.
    pub fn update<F, R>(&self, id: Uuid, mutate: F) -> Result<R, JobError>
    where
        F: FnOnce(&mut Job) -> R,
    {
        let mut inner = self.inner.write();
        let entry = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        Ok(mutate(&mut entry.job))
    }

    /// Removes the job and hands back its last state.
    pub fn delete(&self, id: Uuid) -> Result<Job, JobError> {
        let mut inner = self.inner.write();
        inner
            .jobs
            .remove(&id)
            .map(|entry| entry.job)
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Jobs that are queued or downloading.
    pub fn active_count(&self) -> usize {
        self.inner
            .read()
            .jobs
            .values()
            .filter(|entry| entry.job.status.is_active())
            .count()
    }
}

//! Pluggable job persistence (§4.14) — kept swappable so a real deployment
//! can back it with a database without this crate depending on one directly.

use dashmap::DashMap;

use super::ScheduledJob;

pub trait JobStore: Send + Sync {
    fn get(&self, id: &str) -> Option<ScheduledJob>;
    fn put(&self, job: ScheduledJob);
    fn remove(&self, id: &str) -> Option<ScheduledJob>;
    fn all(&self) -> Vec<ScheduledJob>;
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, ScheduledJob>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, id: &str) -> Option<ScheduledJob> {
        self.jobs.get(id).map(|j| j.clone())
    }

    fn put(&self, job: ScheduledJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    fn remove(&self, id: &str) -> Option<ScheduledJob> {
        self.jobs.remove(id).map(|(_, j)| j)
    }

    fn all(&self) -> Vec<ScheduledJob> {
        self.jobs.iter().map(|j| j.clone()).collect()
    }
}

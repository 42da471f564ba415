//! Scheduler (§4.14) — persisted cron/interval/one-shot jobs, built-in
//! recurring operations, and an execution history listener.
//!
//! Cron parsing and next-fire-time computation is grounded on the `cron`
//! crate; the job store is an in-memory `DashMap` with an optional pluggable
//! `JobStore` persistence trait, matching the adapter-interface pattern used
//! for the FreeCAD kernel and upload handlers (§9).

pub mod jobs;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use thiserror::Error;

use crate::error::ErrorKind;

pub use jobs::{JobStore, MemoryJobStore};

#[derive(Debug, Clone, Error, Serialize)]
pub enum SchedulerError {
    #[error("invalid cron expression `{0}`")]
    InvalidCron(String),
    #[error("job `{0}` not found")]
    JobNotFound(String),
    #[error("job `{0}` already exists")]
    JobAlreadyExists(String),
    #[error("max concurrent instances reached for job `{0}`")]
    MaxInstancesReached(String),
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidCron(_) => "invalid_cron",
            SchedulerError::JobNotFound(_) => "job_not_found",
            SchedulerError::JobAlreadyExists(_) => "job_already_exists",
            SchedulerError::MaxInstancesReached(_) => "resource_exhausted",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::MaxInstancesReached(_) => ErrorKind::Resource,
            _ => ErrorKind::UserInput,
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Clone, Serialize)]
pub enum Trigger {
    Cron(String),
    Interval { every_secs: u64 },
    OneShot(DateTime<Utc>),
}

impl Trigger {
    fn next_fire_after(&self, after: DateTime<Utc>) -> SchedulerResult<Option<DateTime<Utc>>> {
        match self {
            Trigger::Cron(expr) => {
                let schedule = Schedule::from_str(expr).map_err(|_| SchedulerError::InvalidCron(expr.clone()))?;
                Ok(schedule.after(&after).next())
            }
            Trigger::Interval { every_secs } => Ok(Some(after + chrono::Duration::seconds(*every_secs as i64))),
            Trigger::OneShot(at) => Ok((*at > after).then_some(*at)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobConfig {
    pub max_concurrent_instances: u32,
    pub misfire_grace: chrono::Duration,
    pub coalesce_on_catchup: bool,
    pub replace_existing: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrent_instances: 1,
            misfire_grace: chrono::Duration::minutes(5),
            coalesce_on_catchup: true,
            replace_existing: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub id: String,
    pub trigger: Trigger,
    pub config: JobConfig,
    pub next_fire: Option<DateTime<Utc>>,
    pub running_instances: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Misfired,
}

/// Dispatches and records built-in + user-registered jobs. The actual work a
/// job performs is injected as a boxed async closure at registration time;
/// the scheduler only owns triggers, concurrency, and history.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    history: parking_lot::Mutex<Vec<ExecutionRecord>>,
    max_history: usize,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            history: parking_lot::Mutex::new(Vec::new()),
            max_history: 1000,
        }
    }

    pub fn register(&self, id: &str, trigger: Trigger, config: JobConfig) -> SchedulerResult<()> {
        if self.store.get(id).is_some() && !config.replace_existing {
            return Err(SchedulerError::JobAlreadyExists(id.to_string()));
        }
        let next_fire = trigger.next_fire_after(Utc::now())?;
        self.store.put(ScheduledJob {
            id: id.to_string(),
            trigger,
            config,
            next_fire,
            running_instances: 0,
        });
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> SchedulerResult<()> {
        self.store.remove(id).ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        Ok(())
    }

    /// Marks `id` as started if under `max_concurrent_instances`; the caller
    /// is responsible for invoking `finish` exactly once afterward.
    pub fn try_start(&self, id: &str) -> SchedulerResult<()> {
        let mut job = self.store.get(id).ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        if job.running_instances >= job.config.max_concurrent_instances {
            return Err(SchedulerError::MaxInstancesReached(id.to_string()));
        }
        job.running_instances += 1;
        self.store.put(job);
        Ok(())
    }

    pub fn finish(&self, id: &str, status: ExecutionStatus, message: Option<String>, started_at: DateTime<Utc>) {
        if let Some(mut job) = self.store.get(id) {
            job.running_instances = job.running_instances.saturating_sub(1);
            if let Ok(Some(next)) = job.trigger.next_fire_after(Utc::now()) {
                job.next_fire = Some(next);
            }
            self.store.put(job);
        }
        let mut history = self.history.lock();
        history.push(ExecutionRecord {
            job_id: id.to_string(),
            started_at,
            ended_at: Utc::now(),
            status,
            message,
        });
        if history.len() > self.max_history {
            let overflow = history.len() - self.max_history;
            history.drain(0..overflow);
        }
    }

    pub fn history_for(&self, id: &str) -> Vec<ExecutionRecord> {
        self.history.lock().iter().filter(|r| r.job_id == id).cloned().collect()
    }

    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        self.store.all().into_iter().filter(|j| j.next_fire.map(|t| t <= now).unwrap_or(false)).collect()
    }
}

/// Registers the built-in recurring operations (§4.14): nightly model
/// optimization, hourly temp cleanup, daily report, backup/cache-refresh
/// stubs. Actual execution is wired by the caller; this only seeds triggers.
pub fn register_builtin_jobs(scheduler: &Scheduler) -> SchedulerResult<()> {
    scheduler.register(
        "nightly_model_optimization",
        Trigger::Cron("0 0 2 * * *".to_string()),
        JobConfig::default(),
    )?;
    scheduler.register(
        "hourly_temp_cleanup",
        Trigger::Cron("0 0 * * * *".to_string()),
        JobConfig::default(),
    )?;
    scheduler.register(
        "daily_execution_report",
        Trigger::Cron("0 0 6 * * *".to_string()),
        JobConfig::default(),
    )?;
    scheduler.register(
        "backup_refresh",
        Trigger::Interval { every_secs: 6 * 3600 },
        JobConfig::default(),
    )?;
    scheduler.register(
        "cache_refresh",
        Trigger::Interval { every_secs: 3600 },
        JobConfig::default(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_find_due_job() {
        let scheduler = Scheduler::new(Arc::new(MemoryJobStore::new()));
        scheduler
            .register("job1", Trigger::Interval { every_secs: 0 }, JobConfig::default())
            .unwrap();
        let due = scheduler.due_jobs(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn max_concurrent_instances_enforced() {
        let scheduler = Scheduler::new(Arc::new(MemoryJobStore::new()));
        scheduler
            .register(
                "job1",
                Trigger::Interval { every_secs: 60 },
                JobConfig { max_concurrent_instances: 1, ..Default::default() },
            )
            .unwrap();
        scheduler.try_start("job1").unwrap();
        let err = scheduler.try_start("job1").unwrap_err();
        assert_eq!(err.code(), "resource_exhausted");
    }

    #[test]
    fn builtin_jobs_register_without_conflict() {
        let scheduler = Scheduler::new(Arc::new(MemoryJobStore::new()));
        register_builtin_jobs(&scheduler).unwrap();
        assert!(scheduler.store.get("nightly_model_optimization").is_some());
    }

    #[test]
    fn invalid_cron_expression_rejected() {
        let scheduler = Scheduler::new(Arc::new(MemoryJobStore::new()));
        let err = scheduler
            .register("bad", Trigger::Cron("not a cron".to_string()), JobConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "invalid_cron");
    }
}

//! Background ingest job.
//!
//! One [`IngestJobManager`] per process owns the single [`IngestJob`] record.
//! `start` launches a detached run and returns immediately; `status` hands
//! out a snapshot at any time. `run_now` waits for the report instead. Only
//! one run is active at once: a second request while running is refused
//! without touching the live job. Every run executes on its own task, so it
//! always reaches Completed or Failed even if the caller goes away.
//!
//! ```text
//!   Idle ──start──▶ Running ──ok──▶ Completed ──start──▶ Running …
//!                      └────err───▶ Failed    ──start──▶ Running …
//! ```

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task::JoinHandle;

use crate::ingest::{IngestReport, Ingestor};
use crate::progress::{IngestEvent, IngestProgressReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Snapshot of the ingest job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJob {
    pub state: JobState,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: Vec<String>,
    pub report: Option<IngestReport>,
    pub error: Option<String>,
}

impl Default for IngestJob {
    fn default() -> Self {
        Self {
            state: JobState::Idle,
            running: false,
            started_at: None,
            finished_at: None,
            progress: Vec::new(),
            report: None,
            error: None,
        }
    }
}

/// Returned by [`IngestJobManager::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// A run was requested while another was active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyRunning;

impl std::fmt::Display for AlreadyRunning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ingest already running")
    }
}

impl std::error::Error for AlreadyRunning {}

#[derive(Clone)]
pub struct IngestJobManager {
    ingestor: Ingestor,
    job: Arc<RwLock<IngestJob>>,
}

impl IngestJobManager {
    pub fn new(ingestor: Ingestor) -> Self {
        Self {
            ingestor,
            job: Arc::new(RwLock::new(IngestJob::default())),
        }
    }

    /// Point-in-time copy of the job record. Never waits on the running job.
    pub fn status(&self) -> IngestJob {
        read(&self.job).clone()
    }

    /// Launch a background run unless one is already active.
    pub fn start(&self) -> StartOutcome {
        if !self.try_begin() {
            return StartOutcome::AlreadyRunning;
        }
        // Detached; the outcome is recorded in the job record.
        drop(self.spawn_run());
        StartOutcome::Started
    }

    /// Run ingest and wait for the report, under the same single-run guard.
    ///
    /// The run itself is a spawned task, so dropping this future (a client
    /// hanging up on `POST /ingest`) does not leave the job stuck in Running.
    pub async fn run_now(&self) -> Result<IngestReport> {
        if !self.try_begin() {
            return Err(AlreadyRunning.into());
        }
        match self.spawn_run().await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("ingest supervisor aborted: {}", e)),
        }
    }

    /// Spawn the worker plus a supervisor that records a panicking worker as
    /// Failed. Must be called after a successful `try_begin`.
    fn spawn_run(&self) -> JoinHandle<Result<IngestReport>> {
        let worker_self = self.clone();
        let worker = tokio::spawn(async move { worker_self.execute().await });

        let supervisor = self.clone();
        tokio::spawn(async move {
            match worker.await {
                Ok(result) => result,
                Err(e) => supervisor.finish(Err(anyhow!("ingest task aborted: {}", e))),
            }
        })
    }

    /// Check-and-set Running under one write lock.
    fn try_begin(&self) -> bool {
        let mut job = write(&self.job);
        if job.running {
            return false;
        }
        *job = IngestJob {
            state: JobState::Running,
            running: true,
            started_at: Some(Utc::now()),
            ..IngestJob::default()
        };
        tracing::info!("ingest job started");
        true
    }

    async fn execute(&self) -> Result<IngestReport> {
        let log = JobLog {
            job: self.job.clone(),
        };
        let result = self.ingestor.ingest_all(&log).await;
        self.finish(result)
    }

    fn finish(&self, result: Result<IngestReport>) -> Result<IngestReport> {
        let mut job = write(&self.job);
        if !job.running {
            return result;
        }
        job.running = false;
        job.finished_at = Some(Utc::now());
        match &result {
            Ok(report) => {
                job.state = JobState::Completed;
                job.report = Some(report.clone());
                tracing::info!(devices = report.len(), "ingest job completed");
            }
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!(error = %message, "ingest job failed");
                job.state = JobState::Failed;
                job.error = Some(message);
            }
        }
        result
    }
}

/// Appends progress lines to the job record.
struct JobLog {
    job: Arc<RwLock<IngestJob>>,
}

impl IngestProgressReporter for JobLog {
    fn report(&self, event: IngestEvent) {
        let line = event.message();
        tracing::info!("{}", line.trim_start());
        write(&self.job).progress.push(line);
    }
}

// A panic while holding the lock cannot leave the record half-updated in a
// way readers care about, so poisoning is ignored.
fn read(lock: &RwLock<IngestJob>) -> RwLockReadGuard<'_, IngestJob> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write(lock: &RwLock<IngestJob>) -> RwLockWriteGuard<'_, IngestJob> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_snapshot_serializes_nulls() {
        let json = serde_json::to_value(IngestJob::default()).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["running"], false);
        assert!(json["startedAt"].is_null());
        assert!(json["report"].is_null());
        assert!(json["error"].is_null());
        assert_eq!(json["progress"], serde_json::json!([]));
    }
}

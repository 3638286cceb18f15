//! Cron jobs for active monitors

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use super::config::MonitorStatus;
use super::pipeline::AlertPipeline;
use super::schedule::{CronSchedule, ScheduleError};
use super::Monitor;

/// Owns the monitor id to job mapping
pub struct MonitorScheduler {
    scheduler: JobScheduler,
    pipeline: Arc<AlertPipeline>,
    /// Job table; held for the whole add/remove so the two never interleave
    jobs: Mutex<HashMap<u64, Uuid>>,
}

impl MonitorScheduler {
    pub async fn new(pipeline: Arc<AlertPipeline>) -> Result<Self, ScheduleError> {
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;
        Ok(Self {
            scheduler,
            pipeline,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Begin firing registered jobs.
    pub async fn start(&self) -> Result<(), ScheduleError> {
        self.scheduler.start().await.map_err(scheduler_error)?;
        tracing::info!("Monitor scheduler started");
        Ok(())
    }

    /// Schedule every active monitor in the store. Monitors that fail to
    /// schedule are logged and skipped; returns the number scheduled.
    pub async fn load_active(&self) -> Result<usize, ScheduleError> {
        let monitors = self
            .pipeline
            .store()
            .list_monitors(Some(MonitorStatus::Active))
            .map_err(|e| ScheduleError::Scheduler(e.to_string()))?;

        let mut scheduled = 0;
        for monitor in &monitors {
            match self.add_job(monitor).await {
                Ok(()) => scheduled += 1,
                Err(e) => tracing::error!(monitor_id = monitor.id, error = %e, "Failed to schedule monitor"),
            }
        }

        tracing::info!("Scheduled {} of {} active monitors", scheduled, monitors.len());
        Ok(scheduled)
    }

    /// Replace any job for this monitor. Inactive monitors end up unscheduled.
    pub async fn add_job(&self, monitor: &Monitor) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.lock().await;

        if let Some(existing) = jobs.remove(&monitor.id) {
            self.scheduler.remove(&existing).await.map_err(scheduler_error)?;
        }

        if !monitor.is_active() {
            tracing::debug!(monitor_id = monitor.id, "Monitor not active, left unscheduled");
            return Ok(());
        }

        let job = self.build_job(monitor.id, &monitor.cron_expression)?;
        let job_id = self.scheduler.add(job).await.map_err(scheduler_error)?;
        jobs.insert(monitor.id, job_id);

        tracing::info!(
            monitor_id = monitor.id,
            cron = %monitor.cron_expression,
            "Monitor scheduled"
        );
        Ok(())
    }

    /// Cancel the job for `id`, if any.
    pub async fn remove_job(&self, id: u64) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job_id) = jobs.remove(&id) {
            self.scheduler.remove(&job_id).await.map_err(scheduler_error)?;
            tracing::info!(monitor_id = id, "Monitor unscheduled");
        }
        Ok(())
    }

    /// Check that `expr` builds a job without scheduling anything.
    pub fn validate(&self, expr: &str) -> Result<(), ScheduleError> {
        self.build_job(0, expr).map(|_| ())
    }

    /// Next fire time for a scheduled monitor.
    pub async fn next_fire(&self, id: u64) -> Option<DateTime<Utc>> {
        let job_id = *self.jobs.lock().await.get(&id)?;
        let mut scheduler = self.scheduler.clone();
        match scheduler.next_tick_for_job(job_id).await {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(monitor_id = id, error = %e, "Failed to read next fire time");
                None
            }
        }
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_scheduled(&self, id: u64) -> bool {
        self.jobs.lock().await.contains_key(&id)
    }

    /// Stop firing jobs.
    pub async fn shutdown(&self) -> Result<(), ScheduleError> {
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await.map_err(scheduler_error)?;
        tracing::info!("Monitor scheduler stopped");
        Ok(())
    }

    fn build_job(&self, id: u64, expr: &str) -> Result<Job, ScheduleError> {
        let pipeline = self.pipeline.clone();

        // Fired runs re-read the record so edits made since scheduling apply
        let run = move |_uuid: Uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                pipeline.run_by_id(id).await;
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        };

        // Cron fields are read in server-local time
        let job = match CronSchedule::parse(expr)? {
            CronSchedule::Cron(normalized) => Job::new_async_tz(normalized.as_str(), chrono::Local, run),
            CronSchedule::Every(interval) => Job::new_repeated_async(interval, run),
        };

        job.map_err(|e| ScheduleError::Invalid {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
    }
}

fn scheduler_error(e: tokio_cron_scheduler::JobSchedulerError) -> ScheduleError {
    ScheduleError::Scheduler(e.to_string())
}

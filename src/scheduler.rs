//! Periodic scheduler adapter: runs jobs on a cron-style schedule with a
//! re-entrancy guard (skip the tick, don't queue it, if the previous
//! invocation of the same job hasn't finished).
//!
//! Wraps `tokio-cron-scheduler`, treating the periodic-scheduler capability
//! as an injected external collaborator rather than a hand-rolled timer loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{error, warn};

use crate::error::BalancerError;

pub type JobCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One scheduled job. Carries a re-entrancy guard so overlapping ticks are
/// skipped rather than queued.
#[derive(Clone)]
pub struct Job {
    spec: String,
    callback: JobCallback,
    guard: Arc<AsyncMutex<()>>,
}

impl Job {
    pub fn new<F, Fut>(spec: impl Into<String>, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            spec: spec.into(),
            callback: Arc::new(move || Box::pin(callback())),
            guard: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn spec(&self) -> &str {
        &self.spec
    }

    async fn run(&self) {
        let Ok(_permit) = self.guard.try_lock() else {
            warn!(spec = %self.spec, "tick skipped, previous invocation still running");
            return;
        };
        (self.callback)().await;
    }
}

/// Adapter around the injected cron-style scheduler.
pub struct Scheduler {
    inner: Option<JobScheduler>,
}

impl Scheduler {
    pub async fn start(jobs: Vec<Job>) -> Result<Self, BalancerError> {
        if jobs.is_empty() {
            return Ok(Self { inner: None });
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| BalancerError::Configuration(e.to_string()))?;

        for job in jobs {
            let spec = job.spec.clone();
            let cron_job = CronJob::new_async(spec.as_str(), move |_uuid, _sched| {
                let job = job.clone();
                Box::pin(async move {
                    job.run().await;
                })
            })
            .map_err(|e| BalancerError::Configuration(e.to_string()))?;

            scheduler
                .add(cron_job)
                .await
                .map_err(|e| BalancerError::Configuration(e.to_string()))?;
        }

        scheduler
            .start()
            .await
            .map_err(|e| BalancerError::Configuration(e.to_string()))?;

        Ok(Self {
            inner: Some(scheduler),
        })
    }

    /// Requests termination and blocks until in-flight invocations finish.
    pub async fn stop(&mut self) {
        if let Some(mut scheduler) = self.inner.take() {
            if let Err(e) = scheduler.shutdown().await {
                error!(error = %e, "scheduler shutdown error");
            }
        }
    }
}

/// Default cron spec when the operator leaves `doctor.spec` empty: every
/// minute, at second 0.
pub const DEFAULT_CRON_SPEC: &str = "0 */1 * * * *";

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn reentrancy_guard_skips_overlapping_tick() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_for_job = Arc::clone(&calls);

        let job = Job::new("unused", move || {
            let calls = Arc::clone(&calls_for_job);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let job_a = job.clone();
        let job_b = job.clone();

        let (_, _) = tokio::join!(
            async move { job_a.run().await },
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                job_b.run().await
            }
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_cron_spec_is_every_minute() {
        assert_eq!(DEFAULT_CRON_SPEC, "0 */1 * * * *");
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic job scheduling.
//!
//! [`JobScheduler`] is the boundary the logger registers its flush job with. [`TokioScheduler`]
//! implements it on the ambient tokio runtime: every job runs on its own task driven by a
//! `tokio::time::interval`, and is stopped through a per-job [`CancellationToken`].
//!
//! A job that needs the network and comes due while offline is not dropped: it stays pending
//! and runs once as soon as connectivity is seen again, checked every
//! [`CONNECTIVITY_RECHECK_INTERVAL`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Default period of the flush job.
pub const DEFAULT_JOB_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// How often a pending job polls the [`NetworkMonitor`].
pub const CONNECTIVITY_RECHECK_INTERVAL: Duration = Duration::from_secs(30);

pub type JobCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("a job tagged {0} is already scheduled")]
    DuplicateJob(String),
    #[error("no tokio runtime available to run scheduled jobs")]
    NoRuntime,
    #[error("job {0} has a zero interval")]
    InvalidInterval(String),
}

/// A callback fired once per interval, after the first full interval has elapsed.
#[derive(Clone)]
pub struct PeriodicJob {
    pub tag: String,
    pub interval: Duration,
    /// Hold ticks back while the [`NetworkMonitor`] reports no connectivity.
    pub require_network: bool,
    pub callback: JobCallback,
}

impl PeriodicJob {
    pub fn new(
        tag: impl Into<String>,
        interval: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            tag: tag.into(),
            interval,
            require_network: false,
            callback: Arc::new(callback),
        }
    }

    #[must_use]
    pub fn require_network(mut self, required: bool) -> Self {
        self.require_network = required;
        self
    }
}

impl std::fmt::Debug for PeriodicJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicJob")
            .field("tag", &self.tag)
            .field("interval", &self.interval)
            .field("require_network", &self.require_network)
            .finish()
    }
}

pub trait JobScheduler: Send + Sync {
    fn add_job(&self, job: PeriodicJob) -> Result<(), SchedulerError>;
    /// Stops the job with the given tag. Returns `false` when no such job was scheduled.
    fn remove_job(&self, tag: &str) -> bool;
}

pub trait NetworkMonitor: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Monitor for hosts without a connectivity signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConnected;

impl NetworkMonitor for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }
}

pub struct TokioScheduler {
    network: Arc<dyn NetworkMonitor>,
    recheck: Duration,
    jobs: Mutex<HashMap<String, CancellationToken>>,
}

impl TokioScheduler {
    pub fn new(network: Arc<dyn NetworkMonitor>) -> Self {
        Self {
            network,
            recheck: CONNECTIVITY_RECHECK_INTERVAL,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides how often jobs held back by missing connectivity poll the network monitor.
    /// A zero duration keeps the default.
    #[must_use]
    pub fn with_connectivity_recheck(mut self, recheck: Duration) -> Self {
        if !recheck.is_zero() {
            self.recheck = recheck;
        }
        self
    }

    pub fn has_job(&self, tag: &str) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(tag)
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new(Arc::new(AlwaysConnected))
    }
}

impl JobScheduler for TokioScheduler {
    fn add_job(&self, job: PeriodicJob) -> Result<(), SchedulerError> {
        if job.interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(job.tag));
        }
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.tag) {
            return Err(SchedulerError::DuplicateJob(job.tag));
        }
        let cancel_token = CancellationToken::new();
        jobs.insert(job.tag.clone(), cancel_token.clone());
        drop(jobs);

        debug!("Scheduling {} every {:?}", job.tag, job.interval);
        let network = Arc::clone(&self.network);
        runtime.spawn(run_job(job, network, self.recheck, cancel_token));
        Ok(())
    }

    fn remove_job(&self, tag: &str) -> bool {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag);
        match removed {
            Some(cancel_token) => {
                cancel_token.cancel();
                debug!("Cancelled job {tag}");
                true
            }
            None => false,
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        let jobs = self.jobs.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, cancel_token) in jobs.drain() {
            cancel_token.cancel();
        }
    }
}

async fn run_job(
    job: PeriodicJob,
    network: Arc<dyn NetworkMonitor>,
    recheck_every: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval(job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // discard first tick, which is instantaneous

    let mut recheck = interval(recheck_every);
    recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Ticks missed while offline collapse into a single run.
    let mut pending = false;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Job {} stopped", job.tag);
                break;
            }
            _ = ticker.tick() => {
                if job.require_network && !network.is_connected() {
                    if !pending {
                        debug!("Deferring {} until connectivity returns", job.tag);
                        pending = true;
                        recheck.reset();
                    }
                    continue;
                }
                pending = false;
                run_callback(&job);
            }
            _ = recheck.tick(), if pending => {
                if network.is_connected() {
                    debug!("Connectivity is back, running deferred {}", job.tag);
                    pending = false;
                    run_callback(&job);
                }
            }
        }
    }
}

fn run_callback(job: &PeriodicJob) {
    if catch_unwind(AssertUnwindSafe(|| (job.callback)())).is_err() {
        error!("Job {} panicked", job.tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::sleep;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn counting_job(tag: &str, counter: &Arc<AtomicUsize>) -> PeriodicJob {
        let counter = Arc::clone(counter);
        PeriodicJob::new(tag, HOUR, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[derive(Default)]
    struct Toggle(AtomicBool);

    impl NetworkMonitor for Toggle {
        fn is_connected(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_fires_once_per_interval_after_the_first() {
        let scheduler = TokioScheduler::default();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.add_job(counting_job("job", &counter)).unwrap();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        sleep(HOUR).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        sleep(HOUR).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_ticks_run_once_when_connectivity_returns() {
        let network = Arc::new(Toggle::default());
        let scheduler = TokioScheduler::new(network.clone());
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .add_job(counting_job("job", &counter).require_network(true))
            .unwrap();

        sleep(HOUR * 2 + Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Both missed ticks collapse into one run shortly after going online.
        network.0.store(true, Ordering::SeqCst);
        sleep(CONNECTIVITY_RECHECK_INTERVAL * 2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The regular schedule is unchanged.
        sleep(HOUR - CONNECTIVITY_RECHECK_INTERVAL * 2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_job_missed_offline_runs_before_next_period() {
        let network = Arc::new(Toggle::default());
        let scheduler = TokioScheduler::new(network.clone());
        let counter = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&counter);
        scheduler
            .add_job(
                PeriodicJob::new("job", DEFAULT_JOB_INTERVAL, move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .require_network(true),
            )
            .unwrap();

        sleep(DEFAULT_JOB_INTERVAL + Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        network.0.store(true, Ordering::SeqCst);
        sleep(HOUR).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_job_keeps_waiting_while_offline() {
        let network = Arc::new(Toggle::default());
        let scheduler = TokioScheduler::new(network.clone())
            .with_connectivity_recheck(Duration::from_secs(5));
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .add_job(counting_job("job", &counter).require_network(true))
            .unwrap();

        sleep(HOUR + Duration::from_secs(10 * 60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        network.0.store(true, Ordering::SeqCst);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(scheduler.remove_job("job"));
        network.0.store(false, Ordering::SeqCst);
        sleep(HOUR * 2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_job_stops_firing() {
        let scheduler = TokioScheduler::default();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.add_job(counting_job("job", &counter)).unwrap();
        assert!(scheduler.has_job("job"));

        sleep(HOUR + Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(scheduler.remove_job("job"));
        assert!(!scheduler.remove_job("job"));
        sleep(HOUR * 3).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The tag is free again.
        scheduler.add_job(counting_job("job", &counter)).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_keeps_job_alive() {
        let scheduler = TokioScheduler::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&counter);
        scheduler
            .add_job(PeriodicJob::new("job", HOUR, move || {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first tick fails");
                }
            }))
            .unwrap();

        sleep(HOUR * 2 + Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_jobs_are_rejected() {
        let scheduler = TokioScheduler::default();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.add_job(counting_job("job", &counter)).unwrap();

        assert!(matches!(
            scheduler.add_job(counting_job("job", &counter)),
            Err(SchedulerError::DuplicateJob(tag)) if tag == "job"
        ));
        assert!(matches!(
            scheduler.add_job(PeriodicJob::new("zero", Duration::ZERO, || {})),
            Err(SchedulerError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_no_runtime_is_reported() {
        let scheduler = TokioScheduler::default();
        assert!(matches!(
            scheduler.add_job(PeriodicJob::new("job", HOUR, || {})),
            Err(SchedulerError::NoRuntime)
        ));
    }
}

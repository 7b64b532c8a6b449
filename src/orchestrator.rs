//! Drives a batch of extraction jobs through the worker pool and hands
//! ordered results back to the caller.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use uuid::Uuid;

use crate::batch::{
    Attempt, DocumentRef, ExtractionMode, FailureKind, Job, JobLifecycle, Outcome, RetryDecision,
    RetryPolicy,
};
use crate::collector::ResultCollector;
use crate::error::PapermetaError;
use crate::governor::RateGovernor;
use crate::llm::{ExtractError, ExtractionBackend};
use crate::stats::{StatsSnapshot, StatsTracker};

/// Core knobs for one batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Worker pool size; also the in-flight call ceiling.
    pub max_concurrency: usize,
    /// Nominal calls allowed per rolling window.
    pub max_requests_per_window: u32,
    pub window: Duration,
    /// Overall deadline; unresolved jobs past it are marked timed out.
    pub batch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 20,
            max_requests_per_window: 1200,
            window: Duration::from_secs(60),
            batch_timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
        }
    }
}

impl BatchConfig {
    /// Reject configurations that could never make progress. Surfaced
    /// synchronously from `submit_batch`, before any job starts.
    pub fn validate(&self) -> Result<(), PapermetaError> {
        if self.max_concurrency == 0 {
            return Err(PapermetaError::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.max_requests_per_window == 0 {
            return Err(PapermetaError::Config(
                "max_requests_per_window must be at least 1".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(PapermetaError::Config("window must be non-zero".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(PapermetaError::Config(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.batch_timeout.is_zero() {
            return Err(PapermetaError::Config(
                "batch_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Shared state of one running batch. Workers pull jobs through the
/// atomic cursor, so dispatch follows submission order.
struct WorkerContext<B: ExtractionBackend> {
    jobs: Vec<Job>,
    cursor: AtomicUsize,
    backend: Arc<B>,
    governor: Arc<RateGovernor>,
    collector: Arc<ResultCollector>,
    stats: Arc<StatsTracker>,
    policy: RetryPolicy,
}

/// Submits batches against a backend and returns handles for awaiting
/// them. The governor is shared by every batch of one orchestrator, so
/// concurrent batches stay inside a single concurrency and rate budget;
/// each batch owns its own collector and stats.
pub struct BatchOrchestrator<B: ExtractionBackend> {
    backend: Arc<B>,
    config: BatchConfig,
    governor: Arc<RateGovernor>,
}

impl<B: ExtractionBackend> BatchOrchestrator<B> {
    /// Rejects configurations that could never make progress before any
    /// batch can be submitted.
    pub fn new(backend: B, config: BatchConfig) -> Result<Self, PapermetaError> {
        config.validate()?;
        let governor = Arc::new(RateGovernor::rolling(
            config.max_concurrency,
            config.max_requests_per_window,
            config.window,
        )?);
        Ok(Self {
            backend: Arc::new(backend),
            config,
            governor,
        })
    }

    /// Spawn the worker pool and return a handle immediately; processing
    /// proceeds in the background.
    pub fn submit_batch(
        &self,
        inputs: Vec<(DocumentRef, ExtractionMode)>,
    ) -> Result<BatchHandle, PapermetaError> {
        self.config.validate()?;

        let total = inputs.len();
        let collector = Arc::new(ResultCollector::new(total));
        let stats = Arc::new(StatsTracker::new());
        stats.record_submitted(total);

        let jobs = inputs
            .into_iter()
            .enumerate()
            .map(|(index, (document, mode))| Job {
                index,
                document,
                mode,
            })
            .collect();

        let ctx = Arc::new(WorkerContext {
            jobs,
            cursor: AtomicUsize::new(0),
            backend: Arc::clone(&self.backend),
            governor: Arc::clone(&self.governor),
            collector: Arc::clone(&collector),
            stats: Arc::clone(&stats),
            policy: self.config.retry.clone(),
        });

        let workers = self.config.max_concurrency.min(total.max(1));
        for _ in 0..workers {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(worker_loop(ctx));
        }

        Ok(BatchHandle {
            id: Uuid::new_v4(),
            total,
            collector,
            stats,
            timeout: self.config.batch_timeout,
        })
    }
}

/// Caller-side view of one submitted batch.
pub struct BatchHandle {
    pub id: Uuid,
    total: usize,
    collector: Arc<ResultCollector>,
    stats: Arc<StatsTracker>,
    timeout: Duration,
}

impl BatchHandle {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.collector.is_complete()
    }

    /// Block until every job resolved or the batch deadline fired, then
    /// return exactly `total` outcomes in original submission order.
    /// Jobs still unresolved at the deadline are reported as timed out;
    /// their eventual real outcome is discarded.
    pub async fn get_results(&self) -> Vec<Outcome> {
        let completed = self.collector.await_all(self.timeout).await;
        if !completed {
            for synthetic in self.collector.fill_unresolved() {
                self.stats.record_outcome(&synthetic);
            }
        }
        self.collector.ordered_results()
    }

    /// Point-in-time statistics; callable at any moment, including
    /// mid-batch.
    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchHandle")
            .field("id", &self.id)
            .field("total", &self.total)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn worker_loop<B: ExtractionBackend>(ctx: Arc<WorkerContext<B>>) {
    loop {
        // Once every slot is resolved (including by deadline synthetics)
        // any remaining work is unobservable; stop claiming jobs.
        if ctx.collector.is_complete() {
            break;
        }
        let i = ctx.cursor.fetch_add(1, Ordering::Relaxed);
        let Some(job) = ctx.jobs.get(i) else {
            break;
        };
        let Some(outcome) = run_job(&ctx, job).await else {
            break;
        };
        // Stats count delivered outcomes only; a slot already resolved by
        // the deadline synthetics swallows this one.
        if ctx.collector.record(job.index, outcome.clone()) {
            ctx.stats.record_outcome(&outcome);
        }
    }
}

/// Execute one job's bounded attempt loop to a terminal outcome. Returns
/// `None` when the batch resolved mid-job and the job was abandoned.
async fn run_job<B: ExtractionBackend>(ctx: &WorkerContext<B>, job: &Job) -> Option<Outcome> {
    let mut lifecycle = JobLifecycle::new(ctx.policy.clone(), job.index as u64);
    loop {
        if ctx.collector.is_complete() {
            return None;
        }
        let number = lifecycle.begin_attempt();

        let slot = ctx.governor.acquire().await;
        if ctx.collector.is_complete() {
            return None;
        }
        ctx.stats.attempt_started();
        let started_at = Utc::now();
        let result = ctx.backend.extract(job).await;
        drop(slot);

        ctx.stats.record_attempt(&Attempt {
            job_index: job.index,
            number,
            started_at,
            finished_at: Utc::now(),
            kind: result.as_ref().err().map(|e| e.failure_kind()),
        });

        match result {
            Ok(fields) => {
                lifecycle.succeed();
                ctx.governor.note_success();
                return Some(Outcome::Success { fields });
            }
            Err(err) => {
                let kind = err.failure_kind();
                if kind == FailureKind::RateLimited {
                    ctx.governor.throttle();
                }
                match lifecycle.fail(kind) {
                    RetryDecision::Retry(delay) => {
                        // A service-provided retry-after wins over the
                        // exponential schedule when it is longer.
                        let wait = match &err {
                            ExtractError::RateLimited { retry_after_ms } => {
                                delay.max(Duration::from_millis(*retry_after_ms))
                            }
                            _ => delay,
                        };
                        sleep(wait).await;
                    }
                    RetryDecision::GiveUp => {
                        return Some(Outcome::Failure {
                            kind,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
    }
}

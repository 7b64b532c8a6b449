//! Batch-wide counters, updated by workers and readable at any moment
//! without blocking them.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::batch::{Attempt, FailureKind, Outcome};

/// Shared by every worker of one batch. All increments are atomic; the
/// snapshot is a point-in-time read, never a lock over writers.
///
/// Every counter freezes when the final outcome lands: workers abandoned
/// by a batch deadline may still finish an in-flight call afterwards, and
/// nothing they do past that point is observable in snapshots, so
/// snapshots taken after completion are identical.
pub struct StatsTracker {
    submitted: AtomicU64,
    in_flight: AtomicU64,
    succeeded: AtomicU64,
    failed_transient: AtomicU64,
    failed_rate_limited: AtomicU64,
    failed_malformed: AtomicU64,
    failed_service: AtomicU64,
    retried: AtomicU64,
    started: Instant,
    frozen_elapsed: OnceLock<Duration>,
}

/// Terminal failure counts by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub transient_network: u64,
    pub rate_limited: u64,
    pub malformed_response: u64,
    pub service_error: u64,
}

impl FailureCounts {
    pub fn total(&self) -> u64 {
        self.transient_network + self.rate_limited + self.malformed_response + self.service_error
    }
}

/// Point-in-time view of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub in_flight: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub failed_by_kind: FailureCounts,
    pub retried: u64,
    pub elapsed_ms: u64,
    /// Succeeded jobs per second of wall time.
    pub throughput: f64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed_transient: AtomicU64::new(0),
            failed_rate_limited: AtomicU64::new(0),
            failed_malformed: AtomicU64::new(0),
            failed_service: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            started: Instant::now(),
            frozen_elapsed: OnceLock::new(),
        }
    }

    pub fn record_submitted(&self, count: usize) {
        self.submitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn is_frozen(&self) -> bool {
        self.frozen_elapsed.get().is_some()
    }

    /// A worker is about to invoke the extraction client.
    pub fn attempt_started(&self) {
        if self.is_frozen() {
            return;
        }
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// An attempt finished (either way). Attempts beyond a job's first
    /// count as retries.
    pub fn record_attempt(&self, attempt: &Attempt) {
        if self.is_frozen() {
            return;
        }
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if attempt.number > 1 {
            self.retried.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A job reached its terminal outcome. Freezes elapsed time once every
    /// submitted job is accounted for.
    pub fn record_outcome(&self, outcome: &Outcome) {
        match outcome.failure_kind() {
            None => self.succeeded.fetch_add(1, Ordering::Relaxed),
            Some(FailureKind::TransientNetwork) => {
                self.failed_transient.fetch_add(1, Ordering::Relaxed)
            }
            Some(FailureKind::RateLimited) => {
                self.failed_rate_limited.fetch_add(1, Ordering::Relaxed)
            }
            Some(FailureKind::MalformedResponse) => {
                self.failed_malformed.fetch_add(1, Ordering::Relaxed)
            }
            Some(FailureKind::ServiceError) => {
                self.failed_service.fetch_add(1, Ordering::Relaxed)
            }
        };

        let terminal = self.succeeded.load(Ordering::Relaxed) + self.failure_counts().total();
        if terminal >= self.submitted.load(Ordering::Relaxed) {
            let _ = self.frozen_elapsed.set(self.started.elapsed());
        }
    }

    fn failure_counts(&self) -> FailureCounts {
        FailureCounts {
            transient_network: self.failed_transient.load(Ordering::Relaxed),
            rate_limited: self.failed_rate_limited.load(Ordering::Relaxed),
            malformed_response: self.failed_malformed.load(Ordering::Relaxed),
            service_error: self.failed_service.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self
            .frozen_elapsed
            .get()
            .copied()
            .unwrap_or_else(|| self.started.elapsed());
        // An attempt abandoned mid-flight by the deadline never reports
        // back; a resolved batch has nothing observable in flight.
        let in_flight = if self.is_frozen() {
            0
        } else {
            self.in_flight.load(Ordering::Relaxed)
        };
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed_by_kind = self.failure_counts();
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            succeeded as f64 / secs
        } else {
            0.0
        };

        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            in_flight,
            succeeded,
            failed: failed_by_kind.total(),
            failed_by_kind,
            retried: self.retried.load(Ordering::Relaxed),
            elapsed_ms: elapsed.as_millis() as u64,
            throughput,
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::FieldSet;
    use chrono::Utc;

    fn attempt(number: u32, kind: Option<FailureKind>) -> Attempt {
        let now = Utc::now();
        Attempt {
            job_index: 0,
            number,
            started_at: now,
            finished_at: now,
            kind,
        }
    }

    fn success() -> Outcome {
        Outcome::Success { fields: FieldSet::new() }
    }

    fn failure(kind: FailureKind) -> Outcome {
        Outcome::Failure {
            kind,
            message: "boom".into(),
        }
    }

    #[test]
    fn counts_outcomes_by_kind() {
        let stats = StatsTracker::new();
        stats.record_submitted(4);
        stats.record_outcome(&success());
        stats.record_outcome(&failure(FailureKind::RateLimited));
        stats.record_outcome(&failure(FailureKind::TransientNetwork));
        stats.record_outcome(&failure(FailureKind::ServiceError));

        let snap = stats.snapshot();
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.failed, 3);
        assert_eq!(snap.failed_by_kind.rate_limited, 1);
        assert_eq!(snap.failed_by_kind.transient_network, 1);
        assert_eq!(snap.failed_by_kind.service_error, 1);
        assert_eq!(snap.failed_by_kind.malformed_response, 0);
    }

    #[test]
    fn retried_counts_attempts_beyond_the_first() {
        let stats = StatsTracker::new();
        stats.record_submitted(1);

        stats.attempt_started();
        stats.record_attempt(&attempt(1, Some(FailureKind::TransientNetwork)));
        stats.attempt_started();
        stats.record_attempt(&attempt(2, Some(FailureKind::TransientNetwork)));
        stats.attempt_started();
        stats.record_attempt(&attempt(3, None));

        let snap = stats.snapshot();
        assert_eq!(snap.retried, 2);
        assert_eq!(snap.in_flight, 0);
    }

    #[test]
    fn in_flight_tracks_open_attempts() {
        let stats = StatsTracker::new();
        stats.attempt_started();
        stats.attempt_started();
        assert_eq!(stats.snapshot().in_flight, 2);
        stats.record_attempt(&attempt(1, None));
        assert_eq!(stats.snapshot().in_flight, 1);
    }

    #[test]
    fn snapshot_is_stable_after_completion() {
        let stats = StatsTracker::new();
        stats.record_submitted(2);
        stats.record_outcome(&success());
        stats.record_outcome(&failure(FailureKind::MalformedResponse));

        let first = stats.snapshot();
        std::thread::sleep(Duration::from_millis(15));
        let second = stats.snapshot();
        assert_eq!(first, second);
        assert_eq!(first.elapsed_ms, second.elapsed_ms);
    }

    #[test]
    fn elapsed_keeps_ticking_before_completion() {
        let stats = StatsTracker::new();
        stats.record_submitted(2);
        stats.record_outcome(&success());

        let first = stats.snapshot();
        std::thread::sleep(Duration::from_millis(15));
        let second = stats.snapshot();
        assert!(second.elapsed_ms >= first.elapsed_ms + 10);
    }

    #[test]
    fn counters_freeze_once_batch_resolves() {
        let stats = StatsTracker::new();
        stats.record_submitted(1);
        stats.attempt_started();
        stats.record_outcome(&failure(FailureKind::ServiceError));

        let frozen = stats.snapshot();
        assert_eq!(frozen.in_flight, 0);

        // A worker abandoned by the deadline reporting back late.
        stats.attempt_started();
        stats.record_attempt(&attempt(2, Some(FailureKind::TransientNetwork)));

        let later = stats.snapshot();
        assert_eq!(frozen, later);
        assert_eq!(later.retried, 0);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let stats = StatsTracker::new();
        stats.record_submitted(1);
        stats.record_outcome(&success());
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"succeeded\":1"));
        assert!(json.contains("\"failed_by_kind\""));
    }
}

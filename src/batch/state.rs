use std::fmt;

use super::job::{FailureKind, RetryDecision, RetryPolicy};

/// The per-job lifecycle:
///
/// `Queued → InFlight → {Succeeded | Retrying → InFlight | GaveUp}`
///
/// `Succeeded` and `GaveUp` are terminal. The attempt counter bounds the
/// loop explicitly; there is no recursion and no unbounded retry chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Queued,
    InFlight,
    Retrying,
    Succeeded,
    GaveUp,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::GaveUp)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "QUEUED"),
            JobPhase::InFlight => write!(f, "IN_FLIGHT"),
            JobPhase::Retrying => write!(f, "RETRYING"),
            JobPhase::Succeeded => write!(f, "SUCCEEDED"),
            JobPhase::GaveUp => write!(f, "GAVE_UP"),
        }
    }
}

/// Drives one job through its phases, consulting the retry policy on each
/// failure. Owned by the worker executing the job; never shared.
#[derive(Debug)]
pub struct JobLifecycle {
    phase: JobPhase,
    attempt: u32,
    policy: RetryPolicy,
    salt: u64,
}

impl JobLifecycle {
    pub fn new(policy: RetryPolicy, salt: u64) -> Self {
        Self {
            phase: JobPhase::Queued,
            attempt: 0,
            policy,
            salt,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    /// 1-based number of the attempt currently or most recently in flight.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Enter `InFlight` for the next attempt and return its number.
    ///
    /// Panics if called from a terminal phase; workers only call this from
    /// `Queued` or `Retrying`.
    pub fn begin_attempt(&mut self) -> u32 {
        debug_assert!(
            matches!(self.phase, JobPhase::Queued | JobPhase::Retrying),
            "begin_attempt from {:?}",
            self.phase
        );
        self.attempt += 1;
        self.phase = JobPhase::InFlight;
        self.attempt
    }

    /// The in-flight attempt succeeded; the job is terminal.
    pub fn succeed(&mut self) {
        self.phase = JobPhase::Succeeded;
    }

    /// The in-flight attempt failed. Returns the policy's decision and
    /// moves to `Retrying` or `GaveUp` accordingly.
    pub fn fail(&mut self, kind: FailureKind) -> RetryDecision {
        let decision = self.policy.decide(self.attempt, kind, self.salt);
        self.phase = match decision {
            RetryDecision::Retry(_) => JobPhase::Retrying,
            RetryDecision::GiveUp => JobPhase::GaveUp,
        };
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn lifecycle(max_attempts: u32) -> JobLifecycle {
        JobLifecycle::new(
            RetryPolicy {
                max_attempts,
                base_backoff: Duration::from_millis(10),
                jitter: Duration::ZERO,
            },
            7,
        )
    }

    #[test]
    fn happy_path_single_attempt() {
        let mut lc = lifecycle(3);
        assert_eq!(lc.phase(), JobPhase::Queued);

        assert_eq!(lc.begin_attempt(), 1);
        assert_eq!(lc.phase(), JobPhase::InFlight);

        lc.succeed();
        assert_eq!(lc.phase(), JobPhase::Succeeded);
        assert!(lc.phase().is_terminal());
    }

    #[test]
    fn transient_failures_walk_retrying_until_give_up() {
        let mut lc = lifecycle(3);

        lc.begin_attempt();
        assert!(matches!(
            lc.fail(FailureKind::TransientNetwork),
            RetryDecision::Retry(_)
        ));
        assert_eq!(lc.phase(), JobPhase::Retrying);

        lc.begin_attempt();
        assert!(matches!(
            lc.fail(FailureKind::TransientNetwork),
            RetryDecision::Retry(_)
        ));

        assert_eq!(lc.begin_attempt(), 3);
        assert_eq!(lc.fail(FailureKind::TransientNetwork), RetryDecision::GiveUp);
        assert_eq!(lc.phase(), JobPhase::GaveUp);
        assert!(lc.phase().is_terminal());
    }

    #[test]
    fn service_error_terminal_on_first_attempt() {
        let mut lc = lifecycle(3);
        lc.begin_attempt();
        assert_eq!(lc.fail(FailureKind::ServiceError), RetryDecision::GiveUp);
        assert_eq!(lc.phase(), JobPhase::GaveUp);
        assert_eq!(lc.attempt(), 1);
    }

    #[test]
    fn retry_then_succeed() {
        let mut lc = lifecycle(3);
        lc.begin_attempt();
        lc.fail(FailureKind::RateLimited);
        assert_eq!(lc.begin_attempt(), 2);
        lc.succeed();
        assert_eq!(lc.phase(), JobPhase::Succeeded);
        assert_eq!(lc.attempt(), 2);
    }

    #[test]
    fn phase_display() {
        assert_eq!(JobPhase::Queued.to_string(), "QUEUED");
        assert_eq!(JobPhase::InFlight.to_string(), "IN_FLIGHT");
        assert_eq!(JobPhase::Retrying.to_string(), "RETRYING");
        assert_eq!(JobPhase::Succeeded.to_string(), "SUCCEEDED");
        assert_eq!(JobPhase::GaveUp.to_string(), "GAVE_UP");
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extracted fields for one document. Values are `None` when the service
/// could not determine the field.
pub type FieldSet = BTreeMap<String, Option<String>>;

/// The record layouts a batch can be extracted into, one per downstream
/// submission workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Springer Nature submission sheet.
    Sn,
    /// IEEE order sheet.
    Ieee,
    /// Funding/acknowledgment collection sheet.
    Funding,
    /// Author-profile sheet with split given/family names.
    Ap,
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionMode::Sn => write!(f, "sn"),
            ExtractionMode::Ieee => write!(f, "ieee"),
            ExtractionMode::Funding => write!(f, "funding"),
            ExtractionMode::Ap => write!(f, "ap"),
        }
    }
}

/// Opaque handle to one document: the uploaded file's stem plus its
/// pre-extracted first-page text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub filename: String,
    pub text: String,
}

/// One extraction unit. Immutable once the batch is submitted; `index` is
/// unique within the batch and equals the caller's submission position.
#[derive(Debug, Clone)]
pub struct Job {
    pub index: usize,
    pub document: DocumentRef,
    pub mode: ExtractionMode,
}

/// Classification of a failed extraction call.
///
/// This is the single input the retry policy consumes, so the mapping from
/// raw errors to kinds lives in exactly one place (`llm::error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connectivity or timeout failure; the call may never have reached
    /// the service.
    TransientNetwork,
    /// The service explicitly reported saturation (HTTP 429).
    RateLimited,
    /// The service answered but the reply failed shape validation.
    MalformedResponse,
    /// Any other service-reported error (auth, quota, 5xx). Never retried.
    ServiceError,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::ServiceError)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::TransientNetwork => write!(f, "transient network failure"),
            FailureKind::RateLimited => write!(f, "rate limited"),
            FailureKind::MalformedResponse => write!(f, "malformed response"),
            FailureKind::ServiceError => write!(f, "service error"),
        }
    }
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { fields: FieldSet },
    Failure { kind: FailureKind, message: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// One invocation of the extraction client for a job. Never mutated after
/// completion; retained only for statistics.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub job_index: usize,
    /// 1-based attempt number.
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `None` when the attempt succeeded.
    pub kind: Option<FailureKind>,
}

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Maps (attempt number, failure kind) to a retry decision.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed per job, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_backoff: Duration,
    /// Upper bound for the jittered offset added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1000),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Decide whether a job that just failed its `attempt`-th call should
    /// be retried. `salt` deterministically varies the jitter per job so
    /// that jobs failing in the same rate-limit event do not retry in
    /// lockstep.
    pub fn decide(&self, attempt: u32, kind: FailureKind, salt: u64) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::GiveUp;
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.backoff_for(attempt, salt))
    }

    /// delay = base_backoff * 2^(attempt - 1) + jitter(salt, attempt)
    pub fn backoff_for(&self, attempt: u32, salt: u64) -> Duration {
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(exp) + self.jitter_for(attempt, salt)
    }

    fn jitter_for(&self, attempt: u32, salt: u64) -> Duration {
        let bound_ms = self.jitter.as_millis() as u64;
        if bound_ms == 0 {
            return Duration::ZERO;
        }
        // splitmix-style mix; no shared RNG state across workers.
        let mut x = salt
            .wrapping_add(u64::from(attempt))
            .wrapping_mul(0x9E37_79B9_7F4A_7C15);
        x ^= x >> 29;
        x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
        x ^= x >> 32;
        Duration::from_millis(x % (bound_ms + 1))
    }
}

pub mod job;
pub mod state;

pub use job::{
    Attempt, DocumentRef, ExtractionMode, FailureKind, FieldSet, Job, Outcome, RetryDecision,
    RetryPolicy,
};
pub use state::{JobLifecycle, JobPhase};

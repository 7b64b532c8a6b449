pub mod client;
pub mod error;
pub mod types;

use std::future::Future;

pub use client::ExtractionClient;
pub use error::ExtractError;
pub use types::{Affiliation, Author, ChatMessage, ChatRequest, ChatResponse, PaperMeta};

use crate::batch::{FieldSet, Job};

/// One extraction call against the external service (or a test double).
///
/// Implementations perform exactly one request per call; retrying is the
/// caller's concern. Futures must be `Send` so the worker pool can run
/// them from spawned tasks.
pub trait ExtractionBackend: Send + Sync + 'static {
    fn extract(&self, job: &Job) -> impl Future<Output = Result<FieldSet, ExtractError>> + Send;
}

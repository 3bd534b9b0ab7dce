//! HTTP surface of the pipeline.
//!
//! - `booklets`: booklet generation, download and replacement stamp labels.
//! - `scans`: scan upload, background ingestion, job status and review.

pub mod booklets;
pub mod scans;

use crate::error::{PipelineError, Result};
use actix_web::web;

/// Runs database or image work on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    web::block(work)
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))?
}

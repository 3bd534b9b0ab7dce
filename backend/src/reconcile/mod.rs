//! # Reconciliation
//!
//! Attributes decoded pages to participations and questions, creates the
//! OCR-sourced responses, and carries the human follow-up on the report:
//! manual page assignment, conflict resolution and sign-off.

mod engine;
pub mod review;

pub use engine::{reconcile, PageImageSource, Reconciliation, StoredPages};
pub(crate) use engine::Attributor;

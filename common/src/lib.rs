//! Shared models for the paper assessment pipeline.
//!
//! Everything in here is plain serde data that crosses the HTTP boundary or is
//! stored as JSON inside the database. No I/O happens in this crate.

pub mod jobs;
pub mod model;
pub mod requests;

//! Paper assessment backend: printable booklets with per-page identifiers,
//! scan ingestion and reconciliation of scanned pages into responses.

pub mod booklet;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod job_controller;
pub mod reconcile;
pub mod scan;
pub mod services;
pub mod symbol;

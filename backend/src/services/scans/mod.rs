//! Scan routes.
//!
//! An upload is stored first (`/upload`) and ingested later as a background
//! job (`/{upload_id}/ingest`, polled through `/status/{job_id}`). Reviewers
//! then read the report (`/{upload_id}`), settle unresolved pages and
//! conflicts, and sign the upload off.

use actix_web::web::{get, post, scope};
use actix_web::Scope;

mod get;
mod get_status;
mod ingest;
mod review;
mod upload;

const API_PATH: &str = "/api/scans";

pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("/upload", post().to(upload::process))
        .route("/status/{job_id}", get().to(get_status::process))
        .route("/{upload_id}", get().to(get::process))
        .route("/{upload_id}/ingest", post().to(ingest::process))
        .route(
            "/{upload_id}/pages/{page_index}/resolve",
            post().to(review::resolve),
        )
        .route(
            "/{upload_id}/pages/{page_index}/conflict",
            post().to(review::conflict),
        )
        .route("/{upload_id}/review", post().to(review::sign_off))
        .route("/{upload_id}/release", post().to(review::release))
}

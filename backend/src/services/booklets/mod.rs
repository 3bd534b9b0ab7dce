//! Booklet routes.
//!
//! - `POST /api/booklets/{journey_id}`: plans and renders the journey's booklet
//!   PDF, returning `{path, pages, participants}`.
//! - `GET /api/booklets/{journey_id}/pdf`: the last rendered PDF.
//! - `GET /api/booklets/{journey_id}/users/{user_id}/pages/{page}/stamp.png`:
//!   the stamp of one printed page as a PNG, for relabelling a damaged sheet.

use actix_web::web::{get, post, scope};
use actix_web::Scope;

mod download;
mod generate;
mod stamp;

const API_PATH: &str = "/api/booklets";

pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("/{journey_id}", post().to(generate::process))
        .route("/{journey_id}/pdf", get().to(download::process))
        .route(
            "/{journey_id}/users/{user_id}/pages/{page}/stamp.png",
            get().to(stamp::process),
        )
}

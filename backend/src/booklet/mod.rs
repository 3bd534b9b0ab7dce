//! # Booklet composition
//!
//! One printable PDF per journey holding a booklet for every assigned
//! participant. Every physical page carries its own identifier stamp (QR
//! symbol, short code, four fiducials) drawn by the page decorator before any
//! content lands on the page.
//!
//! ## Sub-modules:
//! - `pagination`: the page-to-question rule shared with reconciliation.
//! - `plan`: page codes and symbols for every page, without any PDF work.
//! - `compose`: genpdf layout of the planned pages.
//! - `decorator`: per-page stamping.

mod compose;
mod decorator;
pub mod pagination;
mod plan;

pub use compose::{booklet_path, compose_booklet, render_booklet, BookletOutput};
pub use pagination::{BookletLayout, PageSlot};
pub use plan::{plan_booklet, BookletPlan, PageStamp, ParticipantBooklet};

use crate::db::page_codes::find_by_key;
use crate::db::Database;
use crate::error::{PipelineError, RenderError, Result};
use crate::services::blocking;
use crate::symbol::stamp_page;
use actix_web::{web, HttpResponse, Responder, ResponseError};
use common::model::identifier::{IdentifierPayload, PageKey};
use image::ImageFormat;
use std::io::Cursor;
use uuid::Uuid;

const LABEL_DPI: u32 = 150;

pub(crate) async fn process(
    path: web::Path<(Uuid, Uuid, u16)>,
    db: web::Data<Database>,
) -> impl Responder {
    let (journey_id, user_id, page_number) = path.into_inner();
    let db = db.get_ref().clone();
    match blocking(move || stamp_png(&db, journey_id, user_id, page_number)).await {
        Ok(png) => HttpResponse::Ok().content_type("image/png").body(png),
        Err(e) => e.error_response(),
    }
}

/// Only pages that were actually printed get a label.
fn stamp_png(db: &Database, journey_id: Uuid, user_id: Uuid, page_number: u16) -> Result<Vec<u8>> {
    let payload = IdentifierPayload::new(journey_id, user_id, page_number)
        .ok_or_else(|| PipelineError::BadRequest("page numbers start at 1".into()))?;
    let conn = db.open()?;
    let key = PageKey {
        journey_id,
        user_id,
        page_number,
    };
    if find_by_key(&conn, &key)?.is_none() {
        return Err(PipelineError::NotFound(format!(
            "page {} of user {} was never printed for journey {}",
            page_number, user_id, journey_id
        )));
    }

    let image = stamp_page(&payload, LABEL_DPI)?;
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| RenderError::Image(e.to_string()))?;
    Ok(png.into_inner())
}

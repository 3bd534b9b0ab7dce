use crate::db::{scan_uploads, Database};
use crate::services::blocking;
use actix_web::{web, HttpResponse, Responder, ResponseError};
use uuid::Uuid;

pub(crate) async fn process(upload_id: web::Path<Uuid>, db: web::Data<Database>) -> impl Responder {
    let upload_id = upload_id.into_inner();
    let db = db.get_ref().clone();
    match blocking(move || scan_uploads::get(&db.open()?, upload_id)).await {
        Ok(upload) => HttpResponse::Ok().json(upload),
        Err(e) => e.error_response(),
    }
}

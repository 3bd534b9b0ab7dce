use crate::booklet::compose_booklet;
use crate::config::AppConfig;
use crate::db::{audit, Database};
use crate::services::blocking;
use actix_web::{web, HttpResponse, Responder, ResponseError};
use serde_json::json;
use uuid::Uuid;

pub(crate) async fn process(
    journey_id: web::Path<Uuid>,
    db: web::Data<Database>,
    config: web::Data<AppConfig>,
) -> impl Responder {
    let journey_id = journey_id.into_inner();
    let (db, storage) = (db.get_ref().clone(), config.storage.clone());
    let audit_db = db.clone();
    match blocking(move || compose_booklet(&db, journey_id, &storage)).await {
        Ok(output) => {
            audit::record(
                &audit_db,
                "booklet.generated",
                journey_id,
                json!({ "pages": output.pages, "participants": output.participants }),
            );
            HttpResponse::Ok().json(output)
        }
        Err(e) => e.error_response(),
    }
}

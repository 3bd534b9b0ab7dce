use crate::booklet::booklet_path;
use crate::config::AppConfig;
use crate::error::PipelineError;
use actix_files::NamedFile;
use actix_web::web;
use uuid::Uuid;

pub(crate) async fn process(
    journey_id: web::Path<Uuid>,
    config: web::Data<AppConfig>,
) -> Result<NamedFile, PipelineError> {
    let journey_id = journey_id.into_inner();
    let path = booklet_path(&config.storage.booklet_dir, journey_id);
    if !path.is_file() {
        return Err(PipelineError::NotFound(format!(
            "no booklet has been generated for journey {}",
            journey_id
        )));
    }
    Ok(NamedFile::open(path)?)
}

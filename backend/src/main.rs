use actix_web::{middleware, web, App, HttpServer};
use backend::config::AppConfig;
use backend::db::Database;
use backend::extract::{self, TextExtractor};
use backend::job_controller::state::{start_job_updater, JobsState};
use backend::services;
use env_logger::Env;
use log::info;
use std::io;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = AppConfig::load().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    env_logger::init_from_env(Env::default().default_filter_or(config.log_level.as_str()));

    let db = Database::new(&config.storage.database_path);
    db.initialize()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    std::fs::create_dir_all(&config.storage.upload_dir)?;
    std::fs::create_dir_all(&config.storage.booklet_dir)?;

    let extractor: Arc<dyn TextExtractor> = Arc::from(extract::from_config(&config.extractor));

    // Initialize job controller state
    let (jobs_state, rx) = JobsState::with_ttl(config.scan.job_ttl());
    tokio::spawn(start_job_updater(jobs_state.clone(), rx));

    let bind = (config.server.host.clone(), config.server.port);
    let json_limit = config.server.json_limit;
    info!("Server running at http://{}:{}", bind.0, bind.1);

    let config = web::Data::new(config);
    let db = web::Data::new(db);
    let extractor = web::Data::from(extractor);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(web::JsonConfig::default().limit(json_limit))
            .app_data(config.clone())
            .app_data(db.clone())
            .app_data(extractor.clone())
            .app_data(web::Data::new(jobs_state.clone()))
            .service(services::booklets::configure_routes())
            .service(services::scans::configure_routes())
    })
    .bind(bind)?
    .run()
    .await
}

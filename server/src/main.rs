mod error;
mod model;
mod preprocess;
mod routes;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use model::Model;
use routes::{SERVICE_NAME, Uploads, configure_routes};
use std::env;
use std::path::PathBuf;

const UPLOAD_DIR: &str = "uploads/ml_temp";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let models_dir = PathBuf::from(env::var("MODEL_DIR").unwrap_or_else(|_| "models".to_string()));
    let candidates = [
        models_dir.join("kidney_stone_hybrid"),
        models_dir.join("kidney_stone_cnn"),
    ];
    let model = Model::load(&candidates);
    match model.model_type() {
        Some(name) => log::info!("Service ready with: {}", name),
        None => log::error!("No model loaded; serving degraded until restart"),
    }

    let uploads = Uploads::new(UPLOAD_DIR)?;
    let model = web::Data::new(model);
    let uploads = web::Data::new(uploads);

    let port = env::var("ML_SERVICE_PORT")
        .or_else(|_| env::var("PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(5000);
    let bind_address = format!("0.0.0.0:{}", port);
    log::info!("Starting {} on {}", SERVICE_NAME, bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(model.clone())
            .app_data(uploads.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}

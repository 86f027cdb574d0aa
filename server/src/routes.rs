use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use shared::{HealthResponse, PredictResponse, ServiceInfo};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::model::Model;

pub const SERVICE_NAME: &str = "RayScan Kidney Stone Detection ML Service";
pub const SERVICE_VERSION: &str = "2.0.0";

const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Directory the upload spool files live in. Spools are `NamedTempFile`s, so
/// they are removed when the request scope ends, on every exit path.
#[derive(Clone)]
pub struct Uploads {
    dir: PathBuf,
}

impl Uploads {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn spool(&self) -> std::io::Result<NamedTempFile> {
        NamedTempFile::new_in(&self.dir)
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/predict").route(web::post().to(predict)));
}

async fn index(model: web::Data<Model>) -> HttpResponse {
    let mut endpoints = BTreeMap::new();
    endpoints.insert("/health".to_string(), "GET - Health check".to_string());
    endpoints.insert(
        "/predict".to_string(),
        "POST - Predict kidney stone from ultrasound image".to_string(),
    );

    HttpResponse::Ok().json(ServiceInfo {
        service: SERVICE_NAME.to_string(),
        version: SERVICE_VERSION.to_string(),
        model_type: model.model_type(),
        enhanced_preprocessing: model.enhanced_preprocessing(),
        model: model.artifact_name(),
        endpoints,
    })
}

async fn health(model: web::Data<Model>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: model.is_loaded(),
        model_type: model.model_type(),
        enhanced_preprocessing: model.enhanced_preprocessing(),
        service: SERVICE_NAME.to_string(),
    })
}

async fn predict(
    model: web::Data<Model>,
    uploads: web::Data<Uploads>,
    mut payload: Multipart,
) -> Result<HttpResponse, ServiceError> {
    let request_id = Uuid::new_v4();

    let upload = read_image_field(&mut payload, &uploads).await?;
    info!("[{}] Processing image: {}", request_id, upload.filename);

    let image_bytes = std::fs::read(upload.spool.path())?;
    let result = model.predict(&image_bytes).map_err(|e| {
        error!("[{}] Prediction error: {}", request_id, e);
        ServiceError::Inference(e)
    })?;

    info!(
        "[{}] Prediction: {} (Confidence: {}%)",
        request_id, result.prediction, result.confidence
    );

    Ok(HttpResponse::Ok().json(PredictResponse {
        success: true,
        data: result,
    }))
}

struct ImageUpload {
    filename: String,
    spool: NamedTempFile,
}

/// Finds the `image` multipart field and spools its bytes to a temp file.
/// Validation order: field present, filename non-empty, extension allowed.
async fn read_image_field(
    payload: &mut Multipart,
    uploads: &Uploads,
) -> Result<ImageUpload, ServiceError> {
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        ServiceError::Validation(format!("Failed to read multipart field: {}", e))
    })? {
        if field.name() != Some("image") {
            // Drain unrelated fields so the stream can continue.
            while field.next().await.is_some() {}
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();
        if filename.is_empty() {
            return Err(ServiceError::Validation("No file selected".to_string()));
        }
        if !allowed_file(&filename) {
            return Err(ServiceError::Validation(
                "Invalid file type. Only PNG, JPG, JPEG allowed".to_string(),
            ));
        }

        let mut spool = uploads.spool()?;
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| {
                ServiceError::Validation(format!("Failed to read image data: {}", e))
            })?;
            spool.write_all(&data)?;
        }
        spool.flush()?;

        return Ok(ImageUpload { filename, spool });
    }

    Err(ServiceError::Validation(
        "No image file provided".to_string(),
    ))
}

fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

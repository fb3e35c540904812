use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use actix_web::{
    HttpResponse, get, post,
    http::header::ContentDisposition,
    web::{Data, Path, ServiceConfig},
};

use super::dto::SubmitResponse;
use super::models::{AdjustParams, AudioFormat, DEFAULT_SPEED, DEFAULT_VOLUME};
use super::service::{JobService, ServiceError, StagedUpload, SubmitOutcome};

/// Multipart body of an upload
#[derive(Debug, MultipartForm)]
pub struct UploadForm {
    pub file: TempFile,
    pub speed: Option<Text<f64>>,
    pub volume: Option<Text<f64>>,
}

#[post("/process")]
async fn process_upload(
    service: Data<JobService>,
    MultipartForm(form): MultipartForm<UploadForm>,
) -> Result<HttpResponse, ServiceError> {
    let params = AdjustParams {
        speed: form.speed.map(|s| s.0).unwrap_or(DEFAULT_SPEED),
        volume: form.volume.map(|v| v.0).unwrap_or(DEFAULT_VOLUME),
    };

    let upload = StagedUpload {
        path: form.file.file.path(),
        file_name: form.file.file_name.clone().unwrap_or_default(),
        size: form.file.size,
        params,
    };

    let response = match service.submit(upload).await? {
        SubmitOutcome::Queued { job_id } => HttpResponse::Accepted().json(SubmitResponse::queued(job_id)),
        SubmitOutcome::Completed { download_url } => {
            HttpResponse::Ok().json(SubmitResponse::completed(download_url))
        }
        SubmitOutcome::Failed { error } => HttpResponse::Ok().json(SubmitResponse::failed(error)),
    };
    Ok(response)
}

#[get("/status/{job_id}")]
async fn job_status(service: Data<JobService>, path: Path<String>) -> Result<HttpResponse, ServiceError> {
    let job_id = path.into_inner();
    let snapshot = service.status(&job_id).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

#[get("/files/{file_name}")]
async fn download_file(service: Data<JobService>, path: Path<String>) -> Result<HttpResponse, ServiceError> {
    let download = service.download(&path.into_inner()).await?;

    let content_type = match download.format {
        Some(AudioFormat::Mp3) => "audio/mpeg",
        Some(AudioFormat::Wav) => "audio/wav",
        None => "application/octet-stream",
    };

    Ok(HttpResponse::Ok()
        .content_type(content_type)
        .insert_header(ContentDisposition::attachment(download.file_name))
        .body(download.bytes))
}

pub fn job_config(config: &mut ServiceConfig) {
    config
        .service(process_upload)
        .service(job_status)
        .service(download_file);
}

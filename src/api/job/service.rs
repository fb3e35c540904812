use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::api::validation::ErrorResponse;
use crate::audio::AudioProcessor;
use crate::db::models::{new_job_id, random_hex, NewJob};
use crate::db::{JobStore, StoreError};
use crate::worker::job_worker::remove_input;
use super::dto::{download_url, JobStatusResponse};
use super::models::{sanitize_file_name, validate_submission, AdjustParams, AudioFormat, InvalidSubmission};

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Job store operation failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Upload failed validation
    #[error("Validation error: {0}")]
    Invalid(#[from] InvalidSubmission),

    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Job not found
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Requested download does not exist
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Requested download name is not a plain file name
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Store(_) | ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Invalid(_) | ServiceError::InvalidFileName(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) | ServiceError::FileNotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error, message) = match self {
            ServiceError::Store(e) => {
                error!("Store error: {}", e);
                ("Failed to process request", "Job store error occurred".to_string())
            }
            ServiceError::Io(e) => {
                error!("I/O error: {}", e);
                ("Failed to process request", "File system error occurred".to_string())
            }
            ServiceError::Invalid(e) => {
                warn!("Validation error: {}", e);
                ("Validation failed", e.to_string())
            }
            ServiceError::InvalidFileName(name) => {
                warn!("Rejected file name: {}", name);
                ("Validation failed", format!("Invalid file name '{}'", name))
            }
            ServiceError::NotFound(id) => {
                warn!("Job not found: {}", id);
                ("Not found", format!("Job with id {} not found", id))
            }
            ServiceError::FileNotFound(name) => {
                warn!("File not found: {}", name);
                ("Not found", format!("File {} not found", name))
            }
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: error.to_string(),
            fields: serde_json::json!({ "message": message }),
        })
    }
}

/// An uploaded file sitting in a temporary location
pub struct StagedUpload<'a> {
    pub path: &'a Path,
    pub file_name: String,
    pub size: usize,
    pub params: AdjustParams,
}

/// What happened to an accepted upload
#[derive(Debug, PartialEq)]
pub enum SubmitOutcome {
    /// Stored as a background job
    Queued { job_id: String },
    /// Processed inline; the result is at this URL
    Completed { download_url: String },
    /// Processed inline and the transformation failed
    Failed { error: String },
}

/// A processed file ready to be sent
pub struct Download {
    pub file_name: String,
    pub format: Option<AudioFormat>,
    pub bytes: Vec<u8>,
}

/// Job service containing the registry's business logic
pub struct JobService {
    store: JobStore,
    processor: AudioProcessor,
    upload_dir: PathBuf,
    queue_enabled: bool,
    /// Shared with the workers; bounds concurrent ffmpeg runs
    semaphore: Arc<Semaphore>,
}

impl JobService {
    pub fn new(
        store: JobStore,
        processor: AudioProcessor,
        upload_dir: PathBuf,
        queue_enabled: bool,
        semaphore: Arc<Semaphore>,
    ) -> Self {
        Self {
            store,
            processor,
            upload_dir,
            queue_enabled,
            semaphore,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Accept an upload
    ///
    /// - Validates the file and the adjustment parameters
    /// - Copies the upload into the upload directory under a unique name
    /// - Queues a job, or runs the transformation inline when the queue
    ///   is disabled
    pub async fn submit(&self, upload: StagedUpload<'_>) -> Result<SubmitOutcome, ServiceError> {
        let format = validate_submission(&upload.file_name, upload.size, &upload.params)?;
        let safe_name = sanitize_file_name(&upload.file_name);
        info!(
            "Service: accepted upload name={} size={} speed={} volume={}",
            safe_name, upload.size, upload.params.speed, upload.params.volume
        );

        let stem = Path::new(&safe_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let input_path = self
            .upload_dir
            .join(format!("{}_{}.{}", stem, random_hex(4), format.extension()));
        tokio::fs::copy(upload.path, &input_path).await?;

        if self.queue_enabled {
            let job = self
                .store
                .create(&NewJob {
                    id: new_job_id(),
                    input_path: input_path.to_string_lossy().into_owned(),
                    original_name: safe_name,
                    format,
                    params: upload.params,
                })
                .await;

            return match job {
                Ok(job) => {
                    info!("Service: queued job id={}", job.id);
                    Ok(SubmitOutcome::Queued { job_id: job.id })
                }
                Err(e) => {
                    remove_input(&input_path).await;
                    Err(e.into())
                }
            };
        }

        let output_name = AudioProcessor::output_name_for(&safe_name, format);
        let output_path = self.processor.output_dir().join(&output_name);
        let result = match self.semaphore.acquire().await {
            Ok(_permit) => {
                self.processor
                    .transform(&input_path, &output_path, &upload.params, None)
                    .await
            }
            Err(e) => {
                error!("Service: processing slots closed: {}", e);
                remove_input(&input_path).await;
                return Err(io::Error::other("processing is shutting down").into());
            }
        };
        remove_input(&input_path).await;

        Ok(match result {
            Ok(()) => SubmitOutcome::Completed {
                download_url: download_url(&output_name),
            },
            Err(e) => {
                warn!("Service: inline processing failed: {}", e);
                SubmitOutcome::Failed { error: e.to_string() }
            }
        })
    }

    /// Current snapshot of a job
    pub async fn status(&self, job_id: &str) -> Result<JobStatusResponse, ServiceError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))?;
        let position = self.store.queue_position(&job).await?;
        Ok(JobStatusResponse::from_row(&job, position))
    }

    /// Read a processed file from the output directory
    pub async fn download(&self, file_name: &str) -> Result<Download, ServiceError> {
        if file_name.is_empty() || sanitize_file_name(file_name) != file_name {
            return Err(ServiceError::InvalidFileName(file_name.to_string()));
        }

        let path = self.processor.output_dir().join(file_name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ServiceError::FileNotFound(file_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Download {
            file_name: file_name.to_string(),
            format: AudioFormat::from_file_name(file_name),
            bytes,
        })
    }
}

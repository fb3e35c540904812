use tracing::{debug, warn};

use crate::api::job::dto::SubmitResponse;
use crate::api::job::models::{validate_submission, JobStatus};
use super::api::{JobApi, Upload};
use super::error::{SubmitError, GENERIC_JOB_ERROR, GENERIC_SUBMIT_ERROR};

/// What the server made of an upload
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionResult {
    /// Processed synchronously; the result is ready
    Completed { download_url: String },
    /// Processed synchronously and failed
    Failed { error: String },
    /// Accepted for background processing; track it with this handle
    Queued { job_id: String },
}

impl SubmissionResult {
    /// Recognize one of the response shapes, or `None` for anything else
    pub fn from_response(response: SubmitResponse) -> Option<Self> {
        if response.queue_enabled == Some(true) {
            return response
                .job_id
                .filter(|id| !id.is_empty())
                .map(|job_id| SubmissionResult::Queued { job_id });
        }

        match response.status.as_deref() {
            Some(s) if s == JobStatus::Completed.as_str() => response
                .download_url
                .filter(|url| !url.is_empty())
                .map(|download_url| SubmissionResult::Completed { download_url }),
            Some(s) if s == JobStatus::Failed.as_str() => Some(SubmissionResult::Failed {
                error: response
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| GENERIC_JOB_ERROR.to_string()),
            }),
            _ => None,
        }
    }
}

/// Validates uploads locally and hands them to the server
#[derive(Clone)]
pub struct JobSubmitter<A> {
    api: A,
}

impl<A: JobApi> JobSubmitter<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    /// Submit a file with its adjustment parameters.
    ///
    /// Invalid uploads are refused before any request is made. Every
    /// server-side problem collapses into [`SubmitError::Failed`] carrying
    /// the server's message when there is one.
    pub async fn submit(&self, upload: Upload) -> Result<SubmissionResult, SubmitError> {
        validate_submission(&upload.file_name, upload.bytes.len(), &upload.params)?;
        debug!(
            "Submitting {} ({} bytes, speed={}, volume={})",
            upload.file_name,
            upload.bytes.len(),
            upload.params.speed,
            upload.params.volume
        );

        let response = self.api.submit(upload).await.map_err(|e| {
            warn!("Submission failed: {}", e);
            SubmitError::Failed(
                e.server_message()
                    .unwrap_or(GENERIC_SUBMIT_ERROR)
                    .to_string(),
            )
        })?;

        SubmissionResult::from_response(response).ok_or_else(|| {
            warn!("Submission response had no recognizable shape");
            SubmitError::Failed(GENERIC_SUBMIT_ERROR.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::job::models::{AdjustParams, InvalidSubmission};
    use crate::client::error::ApiError;
    use crate::client::testing::ScriptedApi;

    fn upload(speed: f64, volume: f64) -> Upload {
        Upload {
            file_name: "song.mp3".to_string(),
            bytes: b"ID3".to_vec(),
            params: AdjustParams { speed, volume },
        }
    }

    #[tokio::test]
    async fn out_of_range_parameters_never_reach_the_server() {
        let api = ScriptedApi::new();
        let submitter = JobSubmitter::new(api.clone());

        for (speed, volume) in [(0.49, 1.0), (2.5, 1.0), (1.0, 0.09), (1.0, 2.01)] {
            let err = submitter.submit(upload(speed, volume)).await.unwrap_err();
            assert!(matches!(err, SubmitError::Invalid(InvalidSubmission::Parameters(_))));
        }

        let empty = Upload {
            bytes: Vec::new(),
            ..upload(1.0, 1.0)
        };
        assert!(matches!(
            submitter.submit(empty).await.unwrap_err(),
            SubmitError::Invalid(InvalidSubmission::EmptyFile)
        ));
        assert_eq!(api.submit_calls(), 0);
    }

    #[tokio::test]
    async fn synchronous_completion_is_returned_directly() {
        let api = ScriptedApi::new().on_submit(Ok(SubmitResponse::completed("/files/out.mp3".into())));
        let result = JobSubmitter::new(api.clone())
            .submit(upload(1.15, 1.0))
            .await
            .unwrap();

        assert_eq!(
            result,
            SubmissionResult::Completed {
                download_url: "/files/out.mp3".to_string()
            }
        );
        assert_eq!(api.submit_calls(), 1);
    }

    #[tokio::test]
    async fn queue_response_yields_handle() {
        let api = ScriptedApi::new().on_submit(Ok(SubmitResponse::queued("abc".into())));
        let result = JobSubmitter::new(api).submit(upload(1.0, 1.0)).await.unwrap();
        assert_eq!(result, SubmissionResult::Queued { job_id: "abc".to_string() });
    }

    #[tokio::test]
    async fn server_message_is_kept_and_generic_used_otherwise() {
        let api = ScriptedApi::new()
            .on_submit(Err(ApiError::Server {
                status: 400,
                message: Some("Only MP3 and WAV files are allowed".to_string()),
            }))
            .on_submit(Err(ApiError::Server {
                status: 500,
                message: None,
            }))
            .on_submit(Ok(SubmitResponse::default()));
        let submitter = JobSubmitter::new(api);

        let err = submitter.submit(upload(1.0, 1.0)).await.unwrap_err();
        assert_eq!(err.to_string(), "Only MP3 and WAV files are allowed");

        let err = submitter.submit(upload(1.0, 1.0)).await.unwrap_err();
        assert_eq!(err.to_string(), GENERIC_SUBMIT_ERROR);

        // well-formed JSON, but none of the known shapes
        let err = submitter.submit(upload(1.0, 1.0)).await.unwrap_err();
        assert_eq!(err.to_string(), GENERIC_SUBMIT_ERROR);
    }

    #[test]
    fn response_shapes() {
        assert_eq!(
            SubmissionResult::from_response(SubmitResponse {
                status: Some("failed".into()),
                ..Default::default()
            }),
            Some(SubmissionResult::Failed {
                error: GENERIC_JOB_ERROR.to_string()
            })
        );
        assert_eq!(
            SubmissionResult::from_response(SubmitResponse::failed(String::new())),
            Some(SubmissionResult::Failed {
                error: GENERIC_JOB_ERROR.to_string()
            })
        );
        assert_eq!(
            SubmissionResult::from_response(SubmitResponse {
                status: Some("completed".into()),
                ..Default::default()
            }),
            None
        );
        assert_eq!(
            SubmissionResult::from_response(SubmitResponse {
                queue_enabled: Some(true),
                ..Default::default()
            }),
            None
        );
    }
}

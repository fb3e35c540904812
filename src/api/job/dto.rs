use serde::{Deserialize, Serialize};

use crate::db::models::JobRow;
use super::models::JobStatus;

/// Response for an upload.
///
/// One of three shapes goes over the wire:
/// `{status: "completed", download_url}`, `{status: "failed", error}` or
/// `{queue_enabled: true, job_id}`. The client decodes every field as
/// optional and decides which shape it got.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl SubmitResponse {
    pub fn completed(download_url: String) -> Self {
        Self {
            status: Some(JobStatus::Completed.as_str().to_string()),
            download_url: Some(download_url),
            ..Default::default()
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: Some(JobStatus::Failed.as_str().to_string()),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn queued(job_id: String) -> Self {
        Self {
            queue_enabled: Some(true),
            job_id: Some(job_id),
            ..Default::default()
        }
    }
}

/// Snapshot of a job returned by the status endpoint
///
/// `status` stays a plain string on the wire so that clients can keep
/// polling through values they do not recognize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: String,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusResponse {
    pub fn from_row(job: &JobRow, position: u32) -> Self {
        Self {
            status: job.status.as_str().to_string(),
            progress: job.progress.min(100),
            position: if job.status == JobStatus::Queued { position } else { 0 },
            download_url: match job.status {
                JobStatus::Completed => job.output_name.as_deref().map(download_url),
                _ => None,
            },
            error: match job.status {
                JobStatus::Failed => job.error.clone(),
                _ => None,
            },
        }
    }
}

/// Public location of a processed file
pub fn download_url(file_name: &str) -> String {
    format!("/files/{}", file_name)
}

use std::time::Duration;

use crate::api::job::models::InvalidSubmission;

/// Message shown when a submission fails and the server said nothing useful
pub const GENERIC_SUBMIT_ERROR: &str = "Error processing file";

/// Message shown when a job fails without an error from the server
pub const GENERIC_JOB_ERROR: &str = "Processing failed";

/// Errors from the HTTP job API
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.)
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status
    #[error("Server error ({status}): {}", .message.as_deref().unwrap_or("no details"))]
    Server { status: u16, message: Option<String> },

    /// The body was not what the endpoint promises
    #[error("Unexpected response: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Text the server supplied for this failure, if any
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Server { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

/// Why an upload did not yield a submission result
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Rejected locally; nothing was sent
    #[error(transparent)]
    Invalid(#[from] InvalidSubmission),

    /// The server rejected the upload, was unreachable, or answered
    /// with something unrecognizable
    #[error("{0}")]
    Failed(String),

    #[error("Submission cancelled")]
    Cancelled,
}

/// Why tracking a job stopped without a terminal status
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    /// Consecutive status queries kept failing
    #[error("Job tracking failed after {attempts} attempts: {last_error}")]
    Unreachable { attempts: u32, last_error: String },

    #[error("Job tracking cancelled")]
    Cancelled,

    #[error("Job tracking timed out after {0:?}")]
    TimedOut(Duration),

    /// A terminal status arrived without the data it requires
    #[error("Job tracking failed: {0}")]
    Malformed(String),
}

/// Any failure of the combined submit-and-track flow
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),
}

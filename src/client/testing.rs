//! Scripted [`JobApi`] for exercising the submitter and poller offline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::api::job::dto::{JobStatusResponse, SubmitResponse};
use super::api::{JobApi, Upload};
use super::error::ApiError;

#[derive(Default)]
struct Script {
    submit: VecDeque<Result<SubmitResponse, ApiError>>,
    /// `None` is a query that never answers
    statuses: VecDeque<Option<Result<JobStatusResponse, ApiError>>>,
    submit_calls: usize,
    status_calls: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedApi {
    script: Arc<Mutex<Script>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_submit(self, response: Result<SubmitResponse, ApiError>) -> Self {
        self.script.lock().unwrap().submit.push_back(response);
        self
    }

    pub fn then_status(self, response: Result<JobStatusResponse, ApiError>) -> Self {
        self.script.lock().unwrap().statuses.push_back(Some(response));
        self
    }

    pub fn then_stall(self) -> Self {
        self.script.lock().unwrap().statuses.push_back(None);
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.script.lock().unwrap().submit_calls
    }

    pub fn status_calls(&self) -> usize {
        self.script.lock().unwrap().status_calls
    }
}

impl JobApi for ScriptedApi {
    async fn submit(&self, _upload: Upload) -> Result<SubmitResponse, ApiError> {
        let mut script = self.script.lock().unwrap();
        script.submit_calls += 1;
        script
            .submit
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Malformed("no scripted submit response".to_string())))
    }

    async fn status(&self, _job_id: &str) -> Result<JobStatusResponse, ApiError> {
        let next = {
            let mut script = self.script.lock().unwrap();
            script.status_calls += 1;
            script.statuses.pop_front()
        };
        match next {
            Some(Some(response)) => response,
            Some(None) => std::future::pending().await,
            None => Err(ApiError::Malformed("no scripted status response".to_string())),
        }
    }
}

pub fn status(status: &str, progress: u8, position: u32) -> JobStatusResponse {
    JobStatusResponse {
        status: status.to_string(),
        progress,
        position,
        download_url: None,
        error: None,
    }
}

pub fn completed(download_url: &str) -> JobStatusResponse {
    JobStatusResponse {
        download_url: Some(download_url.to_string()),
        ..status("completed", 100, 0)
    }
}

pub fn failed(error: Option<&str>) -> JobStatusResponse {
    JobStatusResponse {
        error: error.map(str::to_string),
        ..status("failed", 0, 0)
    }
}

pub fn unreachable() -> ApiError {
    ApiError::Server {
        status: 502,
        message: Some("Bad Gateway".to_string()),
    }
}

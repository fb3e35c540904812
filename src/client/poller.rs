//! Client-side job tracking.
//!
//! [`JobPoller::track`] queries a job's status on a fixed interval until the
//! server reports `completed` or `failed`. Every other status keeps the loop
//! going and refreshes the progress sink. The loop stops early on
//! cancellation, on an optional deadline, or after too many consecutive
//! failed queries.

use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::job::dto::JobStatusResponse;
use crate::api::job::models::JobStatus;
use super::api::JobApi;
use super::error::{TrackingError, GENERIC_JOB_ERROR};
use super::progress::{ProgressSink, ResetOnDrop};

pub const PROCESSING_MESSAGE: &str = "Processing in progress...";

/// Tunable parameters for the polling loop
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Fixed delay between status queries
    pub interval: Duration,
    /// Consecutive failed queries tolerated before giving up
    pub max_consecutive_failures: u32,
    /// Upper bound on total tracking time
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_consecutive_failures: 5,
            timeout: None,
        }
    }
}

/// How a tracked job ended
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Completed { download_url: String },
    Failed { error: String },
}

/// What one status snapshot means for the loop
#[derive(Debug, PartialEq)]
enum Step {
    Finished(TerminalOutcome),
    Pending { progress: u8, message: String },
    Malformed(String),
}

fn interpret(snapshot: JobStatusResponse) -> Step {
    match snapshot.status.as_str() {
        s if s == JobStatus::Failed.as_str() => Step::Finished(TerminalOutcome::Failed {
            error: snapshot
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| GENERIC_JOB_ERROR.to_string()),
        }),
        s if s == JobStatus::Completed.as_str() => match snapshot.download_url {
            Some(download_url) if !download_url.is_empty() => {
                Step::Finished(TerminalOutcome::Completed { download_url })
            }
            _ => Step::Malformed("job completed without a download location".to_string()),
        },
        // queued, processing, and anything unrecognized keep polling
        _ => Step::Pending {
            progress: snapshot.progress.min(100),
            message: status_message(snapshot.position),
        },
    }
}

/// Status line for a job that has not finished yet
pub fn status_message(position: u32) -> String {
    if position > 0 {
        format!("Position in queue: {}", position)
    } else {
        PROCESSING_MESSAGE.to_string()
    }
}

/// Tracks one job at a time against a [`JobApi`], reporting to its own sink
pub struct JobPoller<A, P> {
    api: A,
    sink: P,
    policy: PollPolicy,
}

impl<A: JobApi, P: ProgressSink> JobPoller<A, P> {
    pub fn new(api: A, sink: P, policy: PollPolicy) -> Self {
        Self { api, sink, policy }
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    /// Poll `job_id` until it reaches a terminal state.
    ///
    /// No query is issued after a terminal status has been seen. The sink
    /// is reset on every exit, including when this future is dropped.
    pub async fn track(&self, job_id: &str, cancel: &CancellationToken) -> Result<TerminalOutcome, TrackingError> {
        let _reset = ResetOnDrop(&self.sink);
        let deadline = self.policy.timeout.map(|t| Instant::now() + t);
        let max_failures = self.policy.max_consecutive_failures.max(1);
        let mut failures = 0u32;
        let mut polls = 0u64;

        info!("Tracking job {}", job_id);

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(job_id)),
                _ = wait_for(deadline) => return Err(self.timed_out(job_id)),
                result = self.api.status(job_id) => result,
            };
            polls += 1;

            match result {
                Ok(snapshot) => {
                    failures = 0;
                    match interpret(snapshot) {
                        Step::Finished(outcome) => {
                            info!("Job {} reached terminal state after {} polls: {:?}", job_id, polls, outcome);
                            return Ok(outcome);
                        }
                        Step::Malformed(reason) => {
                            warn!("Unusable status response for job {}: {}", job_id, reason);
                            return Err(TrackingError::Malformed(reason));
                        }
                        Step::Pending { progress, message } => {
                            debug!("Job {} still running: {}% ({})", job_id, progress, message);
                            self.sink.update(progress, &message);
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!("Status query for job {} failed (attempt {}): {}", job_id, failures, e);
                    if failures >= max_failures {
                        return Err(TrackingError::Unreachable {
                            attempts: failures,
                            last_error: e.to_string(),
                        });
                    }
                }
            }

            // Wait before the next query, respecting cancellation and deadline
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(job_id)),
                _ = wait_for(deadline) => return Err(self.timed_out(job_id)),
                _ = sleep(self.policy.interval) => {}
            }
        }
    }

    fn cancelled(&self, job_id: &str) -> TrackingError {
        info!("Tracking of job {} cancelled", job_id);
        TrackingError::Cancelled
    }

    fn timed_out(&self, job_id: &str) -> TrackingError {
        let limit = self.policy.timeout.unwrap_or_default();
        warn!("Tracking of job {} timed out after {:?}", job_id, limit);
        TrackingError::TimedOut(limit)
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

//! Client side of the service: submit an upload, then follow it to a result.

pub mod api;
pub mod error;
pub mod poller;
pub mod progress;
pub mod submitter;

#[cfg(test)]
mod testing;

pub use api::{HttpJobApi, JobApi, Upload};
pub use error::{ClientError, SubmitError};
pub use poller::{JobPoller, PollPolicy, TerminalOutcome};
pub use progress::{ConsoleProgress, ProgressSink};
pub use submitter::{JobSubmitter, SubmissionResult};

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Submits a file and, when the server queues it, tracks the job to the end
pub struct AudioJobClient<A, P> {
    submitter: JobSubmitter<A>,
    poller: JobPoller<A, P>,
}

impl<A: JobApi + Clone, P: ProgressSink> AudioJobClient<A, P> {
    pub fn new(api: A, sink: P, policy: PollPolicy) -> Self {
        Self {
            submitter: JobSubmitter::new(api.clone()),
            poller: JobPoller::new(api, sink, policy),
        }
    }

    pub fn poller(&self) -> &JobPoller<A, P> {
        &self.poller
    }

    /// Run one upload to completion.
    ///
    /// Synchronous results come back as-is; queued jobs are polled.
    pub async fn process(&self, upload: Upload, cancel: &CancellationToken) -> Result<TerminalOutcome, ClientError> {
        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SubmitError::Cancelled.into()),
            result = self.submitter.submit(upload) => result?,
        };

        match submitted {
            SubmissionResult::Completed { download_url } => Ok(TerminalOutcome::Completed { download_url }),
            SubmissionResult::Failed { error } => Ok(TerminalOutcome::Failed { error }),
            SubmissionResult::Queued { job_id } => {
                info!("Job queued on server: id={}", job_id);
                Ok(self.poller.track(&job_id, cancel).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::job::dto::SubmitResponse;
    use crate::api::job::models::AdjustParams;
    use crate::client::progress::{RecordingSink, SinkEvent};
    use crate::client::testing::{completed, status, ScriptedApi};

    fn upload() -> Upload {
        Upload {
            file_name: "voice.wav".to_string(),
            bytes: b"RIFF0000WAVE".to_vec(),
            params: AdjustParams::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn synchronous_result_skips_polling() {
        let api = ScriptedApi::new().on_submit(Ok(SubmitResponse::completed("/files/voice.wav".into())));
        let client = AudioJobClient::new(api.clone(), RecordingSink::default(), PollPolicy::default());

        let outcome = client.process(upload(), &CancellationToken::new()).await.unwrap();
        assert_eq!(
            outcome,
            TerminalOutcome::Completed {
                download_url: "/files/voice.wav".to_string()
            }
        );
        assert_eq!(api.status_calls(), 0);
        assert!(client.poller().sink().events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn synchronous_failure_is_an_outcome() {
        let api = ScriptedApi::new().on_submit(Ok(SubmitResponse::failed("ffmpeg exited".into())));
        let client = AudioJobClient::new(api, RecordingSink::default(), PollPolicy::default());

        let outcome = client.process(upload(), &CancellationToken::new()).await.unwrap();
        assert_eq!(
            outcome,
            TerminalOutcome::Failed {
                error: "ffmpeg exited".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn queued_job_is_tracked_to_completion() {
        let api = ScriptedApi::new()
            .on_submit(Ok(SubmitResponse::queued("job-1".into())))
            .then_status(Ok(status("queued", 0, 1)))
            .then_status(Ok(completed("/files/voice_fast.wav")));
        let client = AudioJobClient::new(api.clone(), RecordingSink::default(), PollPolicy::default());

        let outcome = client.process(upload(), &CancellationToken::new()).await.unwrap();
        assert_eq!(
            outcome,
            TerminalOutcome::Completed {
                download_url: "/files/voice_fast.wav".to_string()
            }
        );
        assert_eq!(api.submit_calls(), 1);
        assert_eq!(api.status_calls(), 2);
        assert_eq!(
            client.poller().sink().events(),
            vec![
                SinkEvent::Update(0, "Position in queue: 1".to_string()),
                SinkEvent::Reset
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_submit_sends_nothing() {
        let api = ScriptedApi::new();
        let client = AudioJobClient::new(api.clone(), RecordingSink::default(), PollPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.process(upload(), &cancel).await.unwrap_err();
        assert!(matches!(err, ClientError::Submit(SubmitError::Cancelled)));
        assert_eq!(api.submit_calls(), 0);
    }
}

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::audio::AudioProcessor;
use crate::db::models::JobRow;
use crate::db::JobStore;

/// Background worker for processing queued audio jobs
#[derive(Clone)]
pub struct JobWorker {
    store: JobStore,
    processor: AudioProcessor,
    idle_delay: Duration,
}

impl JobWorker {
    pub fn new(store: JobStore, processor: AudioProcessor, idle_delay: Duration) -> Self {
        Self {
            store,
            processor,
            idle_delay,
        }
    }

    /// Run worker with semaphore-based bounded concurrency
    ///
    /// - Waits for a semaphore permit, then claims the oldest queued job
    /// - Spawns the transformation so the loop can keep claiming work
    /// - Sleeps when the queue is empty
    /// - Stops claiming jobs once `shutdown_rx` flips to `true` and waits
    ///   for its in-flight jobs before returning
    pub async fn run(&self, worker_id: u32, semaphore: Arc<Semaphore>, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Worker {} started with semaphore-based concurrency", worker_id);
        let mut in_flight = tokio::task::JoinSet::new();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        warn!("Worker {} lost its shutdown channel, stopping", worker_id);
                        break;
                    }
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Worker {} failed to acquire semaphore: {:?}", worker_id, e);
                    break;
                }
            };

            match self.store.acquire_next_job().await {
                Ok(Some(job)) => {
                    info!(
                        "Worker {} acquired job: id={}, file={}",
                        worker_id, job.id, job.original_name
                    );
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        worker.process_job(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    debug!("Worker {} found no jobs available, sleeping...", worker_id);
                    self.pause(&mut shutdown_rx, self.idle_delay).await;
                }
                Err(e) => {
                    drop(permit);
                    error!("Worker {} encountered store error: {}", worker_id, e);
                    self.pause(&mut shutdown_rx, Duration::from_secs(1)).await;
                }
            }

            // Reap finished jobs so the set does not grow unbounded
            while let Some(result) = in_flight.try_join_next() {
                if let Err(e) = result {
                    error!("Worker {} job task panicked: {:?}", worker_id, e);
                }
            }
        }

        info!(
            "Worker {} stopping, waiting for {} in-flight jobs",
            worker_id,
            in_flight.len()
        );
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                error!("Worker {} job task panicked: {:?}", worker_id, e);
            }
        }
        info!("Worker {} stopped", worker_id);
    }

    async fn pause(&self, shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // Sender gone: still honour the delay instead of spinning
                if changed.is_err() {
                    sleep(delay).await;
                }
            }
            _ = sleep(delay) => {}
        }
    }

    /// Transform one claimed job and record the outcome
    pub async fn process_job(&self, job: JobRow) {
        let output_name = AudioProcessor::output_name_for(&job.original_name, job.format);
        let output_path = self.processor.output_dir().join(&output_name);
        let input_path = Path::new(&job.input_path);

        let (progress_tx, mut progress_rx) = mpsc::channel::<u8>(16);
        let params = job.params();
        let transform = self
            .processor
            .transform(input_path, &output_path, &params, Some(progress_tx));
        tokio::pin!(transform);

        let result = loop {
            tokio::select! {
                result = &mut transform => break result,
                Some(percent) = progress_rx.recv() => {
                    if let Err(e) = self.store.update_progress(&job.id, percent).await {
                        warn!("Failed to record progress for job {}: {}", job.id, e);
                    }
                }
            }
        };

        let recorded = match result {
            Ok(()) => {
                info!("Completed job {}: output={}", job.id, output_name);
                self.store.complete(&job.id, &output_name).await
            }
            Err(e) => {
                warn!("Job {} failed: {}", job.id, e);
                self.store.fail(&job.id, &e.to_string()).await
            }
        };
        if let Err(e) = recorded {
            error!("Failed to update job {}: {}", job.id, e);
        }

        remove_input(input_path).await;
    }
}

pub async fn remove_input(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove upload {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::job::models::{AdjustParams, AudioFormat, JobStatus};
    use crate::db::models::NewJob;

    fn worker_with_missing_ffmpeg(store: JobStore, dir: &Path) -> JobWorker {
        let processor = AudioProcessor::new(
            "definitely-not-ffmpeg-binary".to_string(),
            "definitely-not-ffprobe-binary".to_string(),
            dir.to_path_buf(),
            Duration::from_secs(5),
        );
        JobWorker::new(store, processor, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn failed_transformation_marks_job_failed_and_removes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("upload.mp3");
        tokio::fs::write(&input, b"not really audio").await.unwrap();

        let store = JobStore::in_memory();
        store
            .create(&NewJob {
                id: "job1".to_string(),
                input_path: input.to_string_lossy().into_owned(),
                original_name: "song.mp3".to_string(),
                format: AudioFormat::Mp3,
                params: AdjustParams::default(),
            })
            .await
            .unwrap();

        let worker = worker_with_missing_ffmpeg(store.clone(), dir.path());
        let job = store.acquire_next_job().await.unwrap().unwrap();
        worker.process_job(job).await;

        let job = store.get("job1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("definitely-not-ffmpeg-binary"));
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn run_returns_after_shutdown_signal() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker_with_missing_ffmpeg(JobStore::in_memory(), dir.path());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            worker.run(1, Arc::new(Semaphore::new(1)), shutdown_rx).await;
        });

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}

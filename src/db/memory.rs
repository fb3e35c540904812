use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::api::job::models::JobStatus;
use crate::db::models::{JobRow, NewJob};

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, JobRow>,
    next_seq: i64,
}

/// Job records held in process memory. Lost on restart.
#[derive(Clone, Default)]
pub struct MemoryJobRepository {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, job: &NewJob) -> JobRow {
        let mut inner = self.inner.write().await;
        inner.next_seq += 1;
        let now = Utc::now();

        let row = JobRow {
            id: job.id.clone(),
            seq: inner.next_seq,
            status: JobStatus::Queued,
            progress: 0,
            input_path: job.input_path.clone(),
            original_name: job.original_name.clone(),
            format: job.format,
            speed: job.params.speed,
            volume: job.params.volume,
            output_name: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        inner.jobs.insert(row.id.clone(), row.clone());
        debug!("Job created with id={} seq={}", row.id, row.seq);
        row
    }

    pub async fn get(&self, id: &str) -> Option<JobRow> {
        self.inner.read().await.jobs.get(id).cloned()
    }

    pub async fn queue_position(&self, job: &JobRow) -> u32 {
        if job.status != JobStatus::Queued {
            return 0;
        }
        let inner = self.inner.read().await;
        inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued && j.seq <= job.seq)
            .count() as u32
    }

    /// Claim the oldest queued job and mark it processing
    pub async fn acquire_next_job(&self) -> Option<JobRow> {
        let mut inner = self.inner.write().await;
        let id = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by_key(|j| j.seq)
            .map(|j| j.id.clone())?;

        let job = inner.jobs.get_mut(&id)?;
        job.status = JobStatus::Processing;
        job.updated_at = Utc::now();
        Some(job.clone())
    }

    pub async fn update_progress(&self, id: &str, progress: u8) -> bool {
        self.modify(id, |job| {
            if job.status == JobStatus::Processing {
                job.progress = progress.min(100);
            }
        })
        .await
    }

    pub async fn complete(&self, id: &str, output_name: &str) -> bool {
        self.modify(id, |job| {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.output_name = Some(output_name.to_string());
        })
        .await
    }

    pub async fn fail(&self, id: &str, error: &str) -> bool {
        self.modify(id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
        })
        .await
    }

    pub async fn requeue_interrupted(&self) -> u64 {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Queued;
                job.progress = 0;
                job.updated_at = Utc::now();
                count += 1;
            }
        }
        count
    }

    /// Remove terminal jobs last touched before `cutoff` and return them
    pub async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Vec<JobRow> {
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.updated_at < cutoff)
            .map(|j| j.id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| inner.jobs.remove(id))
            .collect()
    }

    async fn modify(&self, id: &str, f: impl FnOnce(&mut JobRow)) -> bool {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(id) {
            Some(job) => {
                f(job);
                job.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

pub mod connection;
pub mod job_repository;
pub mod memory;
pub mod migrations;
pub mod models;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::job_repository::JobRepository;
use crate::db::memory::MemoryJobRepository;
use crate::db::models::{JobRow, NewJob};

/// Storage-level errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}

/// Where job status records live.
///
/// PostgreSQL when a database URL is configured, process memory otherwise.
/// Every job mutation in the service goes through here.
#[derive(Clone)]
pub enum JobStore {
    Memory(MemoryJobRepository),
    Postgres(JobRepository),
}

impl JobStore {
    /// Pick the backend from configuration, running migrations for PostgreSQL
    pub async fn connect(database_url: Option<&str>, max_connections: u32) -> Result<Self, StoreError> {
        match database_url {
            Some(url) => {
                let pool = connection::get_connection(url, max_connections).await?;
                info!("Database connection pool established");
                migrations::run_migrations(&pool).await?;
                Ok(JobStore::Postgres(JobRepository::new(pool)))
            }
            None => {
                info!("No DATABASE_URL configured, keeping job records in memory");
                Ok(JobStore::Memory(MemoryJobRepository::new()))
            }
        }
    }

    pub fn in_memory() -> Self {
        JobStore::Memory(MemoryJobRepository::new())
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            JobStore::Memory(_) => "memory",
            JobStore::Postgres(_) => "postgres",
        }
    }

    pub async fn create(&self, job: &NewJob) -> Result<JobRow, StoreError> {
        match self {
            JobStore::Memory(repo) => Ok(repo.create(job).await),
            JobStore::Postgres(repo) => repo.create(job).await,
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<JobRow>, StoreError> {
        match self {
            JobStore::Memory(repo) => Ok(repo.get(id).await),
            JobStore::Postgres(repo) => repo.get(id).await,
        }
    }

    pub async fn queue_position(&self, job: &JobRow) -> Result<u32, StoreError> {
        match self {
            JobStore::Memory(repo) => Ok(repo.queue_position(job).await),
            JobStore::Postgres(repo) => repo.queue_position(job).await,
        }
    }

    pub async fn acquire_next_job(&self) -> Result<Option<JobRow>, StoreError> {
        match self {
            JobStore::Memory(repo) => Ok(repo.acquire_next_job().await),
            JobStore::Postgres(repo) => repo.acquire_next_job().await,
        }
    }

    pub async fn update_progress(&self, id: &str, progress: u8) -> Result<bool, StoreError> {
        match self {
            JobStore::Memory(repo) => Ok(repo.update_progress(id, progress).await),
            JobStore::Postgres(repo) => repo.update_progress(id, progress).await,
        }
    }

    pub async fn complete(&self, id: &str, output_name: &str) -> Result<bool, StoreError> {
        match self {
            JobStore::Memory(repo) => Ok(repo.complete(id, output_name).await),
            JobStore::Postgres(repo) => repo.complete(id, output_name).await,
        }
    }

    pub async fn fail(&self, id: &str, error: &str) -> Result<bool, StoreError> {
        match self {
            JobStore::Memory(repo) => Ok(repo.fail(id, error).await),
            JobStore::Postgres(repo) => repo.fail(id, error).await,
        }
    }

    pub async fn requeue_interrupted(&self) -> Result<u64, StoreError> {
        match self {
            JobStore::Memory(repo) => Ok(repo.requeue_interrupted().await),
            JobStore::Postgres(repo) => repo.requeue_interrupted().await,
        }
    }

    pub async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobRow>, StoreError> {
        match self {
            JobStore::Memory(repo) => Ok(repo.delete_expired(cutoff).await),
            JobStore::Postgres(repo) => repo.delete_expired(cutoff).await,
        }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            JobStore::Memory(_) => Ok(()),
            JobStore::Postgres(repo) => repo.ping().await,
        }
    }

    pub async fn close(&self) {
        if let JobStore::Postgres(repo) = self {
            repo.pool().close().await;
        }
    }
}

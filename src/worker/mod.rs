pub mod job_worker;
pub mod retention;

pub use job_worker::JobWorker;
pub use retention::RetentionSweeper;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;

use crate::api::job::models::{AdjustParams, AudioFormat, JobStatus};

/// Stored representation of a job with all fields
#[derive(Debug, Clone, Serialize)]
pub struct JobRow {
    pub id: String,
    /// Insertion order, drives FIFO acquisition and queue position
    pub seq: i64,
    pub status: JobStatus,
    pub progress: u8,
    pub input_path: String,
    pub original_name: String,
    pub format: AudioFormat,
    pub speed: f64,
    pub volume: f64,
    pub output_name: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRow {
    pub fn params(&self) -> AdjustParams {
        AdjustParams {
            speed: self.speed,
            volume: self.volume,
        }
    }
}

/// Everything needed to enqueue a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub input_path: String,
    pub original_name: String,
    pub format: AudioFormat,
    pub params: AdjustParams,
}

/// Opaque job handle: 16 random bytes, hex encoded
pub fn new_job_id() -> String {
    random_hex(16)
}

pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_32_hex_chars_and_distinct() {
        let a = new_job_id();
        let b = new_job_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Speed used when a submission does not name one
pub const DEFAULT_SPEED: f64 = 1.15;

/// Volume used when a submission does not name one
pub const DEFAULT_VOLUME: f64 = 1.0;

/// Job status enum representing the state of a job
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Audio containers accepted for upload. The output keeps the input container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    /// Detect the container from a file name's extension (case-insensitive)
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "wav" => Some(AudioFormat::Wav),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            other => Err(format!("unknown audio format '{}'", other)),
        }
    }
}

/// Speed and volume adjustment applied to an upload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct AdjustParams {
    #[validate(range(min = 0.5, max = 2.0, message = "Speed must be between 0.5 and 2.0"))]
    pub speed: f64,
    #[validate(range(min = 0.1, max = 2.0, message = "Volume must be between 0.1 and 2.0"))]
    pub volume: f64,
}

impl Default for AdjustParams {
    fn default() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            volume: DEFAULT_VOLUME,
        }
    }
}

/// Reasons an upload is refused before any processing happens
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidSubmission {
    #[error("No file selected")]
    EmptyFile,

    #[error("Only MP3 and WAV files are allowed (got '{0}')")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Parameters(String),
}

/// Check an upload against the accepted containers and parameter ranges.
///
/// Shared by the server handler and the client-side submitter, so both
/// reject exactly the same inputs.
pub fn validate_submission(
    file_name: &str,
    size: usize,
    params: &AdjustParams,
) -> Result<AudioFormat, InvalidSubmission> {
    if file_name.trim().is_empty() || size == 0 {
        return Err(InvalidSubmission::EmptyFile);
    }

    let format = AudioFormat::from_file_name(file_name)
        .ok_or_else(|| InvalidSubmission::UnsupportedFormat(file_name.to_string()))?;

    // NaN slips through range checks
    if params.speed.is_nan() || params.volume.is_nan() {
        return Err(InvalidSubmission::Parameters(
            "Speed and volume must be numbers".to_string(),
        ));
    }

    if let Err(validation_errors) = params.validate() {
        let mut messages: Vec<String> = validation_errors
            .field_errors()
            .values()
            .flat_map(|errors| {
                errors.iter().map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation error".to_string())
                })
            })
            .collect();
        messages.sort();
        return Err(InvalidSubmission::Parameters(messages.join("; ")));
    }

    Ok(format)
}

/// Reduce an uploaded file name to something safe to put on disk.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                Some(c)
            } else if c.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "audio".to_string()
    } else {
        cleaned.to_string()
    }
}

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::api::job::models::{sanitize_file_name, AdjustParams, AudioFormat};
use crate::config::Config;
use crate::db::models::random_hex;

/// Every processed file name starts with this
pub const OUTPUT_PREFIX: &str = "speedup_";

/// Errors from running the external audio tools
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while processing audio: {0}")]
    Io(#[from] io::Error),

    #[error("Error processing audio: {0}")]
    Ffmpeg(String),

    #[error("Audio processing timed out after {0:?}")]
    Timeout(Duration),
}

/// Runs ffmpeg to time-stretch and re-gain audio files
#[derive(Clone, Debug)]
pub struct AudioProcessor {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    output_dir: PathBuf,
    timeout: Duration,
}

impl AudioProcessor {
    pub fn new(ffmpeg_bin: String, ffprobe_bin: String, output_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            ffmpeg_bin,
            ffprobe_bin,
            output_dir,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ffmpeg_bin.clone(),
            config.ffprobe_bin.clone(),
            config.output_dir.clone(),
            config.process_timeout,
        )
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Pick a fresh output file name derived from the upload's name
    pub fn output_name_for(original_name: &str, format: AudioFormat) -> String {
        let safe = sanitize_file_name(original_name);
        let stem = Path::new(&safe)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        format!("{}{}_{}.{}", OUTPUT_PREFIX, stem, random_hex(4), format.extension())
    }

    /// Duration of an audio file in seconds, if ffprobe can tell
    pub async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                parse_duration(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                warn!(
                    "ffprobe failed for {}: {}",
                    input.display(),
                    last_line(&String::from_utf8_lossy(&output.stderr)).unwrap_or("no output")
                );
                None
            }
            Err(e) => {
                warn!("Failed to run {}: {}", self.ffprobe_bin, e);
                None
            }
        }
    }

    /// Write `input` to `output` with the given speed and volume applied.
    ///
    /// Percent-complete values are sent on `progress` when the input
    /// duration is known. Values stay below 100 until ffmpeg exits cleanly.
    pub async fn transform(
        &self,
        input: &Path,
        output: &Path,
        params: &AdjustParams,
        progress: Option<mpsc::Sender<u8>>,
    ) -> Result<(), ProcessError> {
        let duration = match progress {
            Some(_) => self.probe_duration(input).await,
            None => None,
        };
        debug!(
            "Transforming {} -> {} (speed={}, volume={}, duration={:?})",
            input.display(),
            output.display(),
            params.speed,
            params.volume,
            duration
        );

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(ffmpeg_args(input, output, params))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.ffmpeg_bin.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_progress = async {
            let Some(stdout) = stdout else {
                return Ok::<(), io::Error>(());
            };
            let mut lines = BufReader::new(stdout).lines();
            let mut last_sent = None;
            while let Some(line) = lines.next_line().await? {
                let (Some(total), Some(tx)) = (duration, progress.as_ref()) else {
                    continue;
                };
                if let Some(percent) = parse_progress(&line, total) {
                    if last_sent != Some(percent) {
                        last_sent = Some(percent);
                        // A full channel only drops an intermediate value
                        let _ = tx.try_send(percent);
                    }
                }
            }
            Ok(())
        };

        let read_errors = async {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                stderr.read_to_string(&mut buf).await?;
            }
            Ok::<String, io::Error>(buf)
        };

        let run = async {
            let (progress_result, errors) = tokio::join!(read_progress, read_errors);
            progress_result?;
            let errors = errors?;
            let status = child.wait().await?;
            Ok::<_, io::Error>((status, errors))
        };

        let outcome = timeout(self.timeout, run).await;
        let (status, errors) = match outcome {
            Ok(result) => result?,
            Err(_) => {
                warn!("ffmpeg exceeded {:?}, killing it", self.timeout);
                let _ = child.kill().await;
                remove_partial(output).await;
                return Err(ProcessError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            remove_partial(output).await;
            let message = last_line(&errors)
                .map(str::to_string)
                .unwrap_or_else(|| format!("ffmpeg exited with {}", status));
            return Err(ProcessError::Ffmpeg(message));
        }

        info!("Processed {} -> {}", input.display(), output.display());
        Ok(())
    }
}

/// ffmpeg filter chain: `atempo` stretches time without shifting pitch
pub fn filter_chain(params: &AdjustParams) -> String {
    format!("atempo={},volume={}", params.speed, params.volume)
}

pub fn ffmpeg_args(input: &Path, output: &Path, params: &AdjustParams) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(input.as_os_str().to_owned());
    let filter = filter_chain(params);
    for flag in ["-filter:a", filter.as_str(), "-progress", "pipe:1", "-nostats", "-loglevel", "error"] {
        args.push(OsString::from(flag));
    }
    args.push(output.as_os_str().to_owned());
    args
}

/// Turn one `-progress` line into a percentage of `total_secs`
pub fn parse_progress(line: &str, total_secs: f64) -> Option<u8> {
    let (key, value) = line.trim().split_once('=')?;
    // out_time_ms is reported in microseconds as well
    if key != "out_time_us" && key != "out_time_ms" {
        return None;
    }
    if !(total_secs > 0.0) {
        return None;
    }
    let micros: f64 = value.trim().parse().ok()?;
    let percent = (micros / 1_000_000.0 / total_secs * 100.0).floor();
    Some(percent.clamp(0.0, 99.0) as u8)
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove partial output {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_chain_carries_both_factors() {
        let params = AdjustParams { speed: 1.15, volume: 1.0 };
        assert_eq!(filter_chain(&params), "atempo=1.15,volume=1");
    }

    #[test]
    fn args_end_with_output_and_stream_progress_to_stdout() {
        let params = AdjustParams { speed: 0.5, volume: 2.0 };
        let args = ffmpeg_args(Path::new("/in/a.wav"), Path::new("/out/b.wav"), &params);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(args.last().map(String::as_str), Some("/out/b.wav"));
        let input_at = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_at + 1], "/in/a.wav");
        let progress_at = args.iter().position(|a| a == "-progress").unwrap();
        assert_eq!(args[progress_at + 1], "pipe:1");
        assert!(args.contains(&"atempo=0.5,volume=2".to_string()));
    }

    #[test]
    fn progress_lines_become_capped_percentages() {
        assert_eq!(parse_progress("out_time_us=5000000", 10.0), Some(50));
        assert_eq!(parse_progress("out_time_ms=2500000", 10.0), Some(25));
        assert_eq!(parse_progress("out_time_us=12000000", 10.0), Some(99));
        assert_eq!(parse_progress("out_time_us=-300", 10.0), Some(0));
        assert_eq!(parse_progress("out_time=00:00:05.000000", 10.0), None);
        assert_eq!(parse_progress("progress=end", 10.0), None);
        assert_eq!(parse_progress("out_time_us=N/A", 10.0), None);
        assert_eq!(parse_progress("out_time_us=100", 0.0), None);
    }

    #[test]
    fn durations_and_stderr_are_read_leniently() {
        assert_eq!(parse_duration("12.5\n"), Some(12.5));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(last_line("first\nsecond\n\n"), Some("second"));
        assert_eq!(last_line(""), None);
    }

    #[test]
    fn output_names_keep_stem_and_container() {
        let name = AudioProcessor::output_name_for("my song.mp3", AudioFormat::Mp3);
        assert!(name.starts_with("speedup_my_song_"));
        assert!(name.ends_with(".mp3"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let processor = AudioProcessor::new(
            "definitely-not-ffmpeg-binary".to_string(),
            "definitely-not-ffprobe-binary".to_string(),
            dir.path().to_path_buf(),
            Duration::from_secs(5),
        );
        let err = processor
            .transform(
                &dir.path().join("in.mp3"),
                &dir.path().join("out.mp3"),
                &AdjustParams::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}

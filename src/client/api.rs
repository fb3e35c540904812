//! HTTP client for the upload, status and download endpoints.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::api::job::dto::{JobStatusResponse, SubmitResponse};
use crate::api::job::models::AdjustParams;
use crate::api::validation::ErrorResponse;
use super::error::ApiError;

/// A file ready to be uploaded
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub params: AdjustParams,
}

impl Upload {
    /// Read a local file into memory for upload
    pub async fn from_path(path: &Path, params: AdjustParams) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            file_name,
            bytes,
            params,
        })
    }
}

/// The two registry operations the submitter and poller consume
pub trait JobApi {
    fn submit(&self, upload: Upload) -> impl Future<Output = Result<SubmitResponse, ApiError>> + Send;

    fn status(&self, job_id: &str) -> impl Future<Output = Result<JobStatusResponse, ApiError>> + Send;
}

/// [`JobApi`] over HTTP with [`reqwest`]
#[derive(Clone)]
pub struct HttpJobApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobApi {
    /// * `base_url` - server root, e.g. `http://127.0.0.1:8080`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Absolute URL for a server-relative location such as `/files/x.mp3`
    pub fn resolve(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}/{}", self.base_url, location.trim_start_matches('/'))
        }
    }

    /// Stream a result location into `dest`, returning the bytes written.
    ///
    /// A transfer that breaks off leaves no file behind.
    pub async fn download(&self, location: &str, dest: &Path) -> Result<u64, ApiError> {
        let response = Self::ensure_success(self.client.get(self.resolve(location)).send().await?).await?;

        let file = tokio::fs::File::create(dest).await?;
        match Self::stream_into(response, file).await {
            Ok(written) => Ok(written),
            Err(e) => {
                warn!("Download of {} failed, removing {}: {}", location, dest.display(), e);
                if let Err(rm) = tokio::fs::remove_file(dest).await {
                    warn!("Failed to remove partial download {}: {}", dest.display(), rm);
                }
                Err(e)
            }
        }
    }

    /// Where a download should land when the caller gave no path
    pub fn default_destination(location: &str, dir: &Path) -> PathBuf {
        let name = location
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("download");
        dir.join(name)
    }

    // ---- private helpers ----

    async fn stream_into(mut response: reqwest::Response, mut file: tokio::fs::File) -> Result<u64, ApiError> {
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Turn non-2xx responses into [`ApiError::Server`], keeping whatever
    /// message the server put in the body.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Server {
            status: status.as_u16(),
            message: server_message(&body),
        })
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

impl JobApi for HttpJobApi {
    async fn submit(&self, upload: Upload) -> Result<SubmitResponse, ApiError> {
        let form = Form::new()
            .part("file", Part::bytes(upload.bytes).file_name(upload.file_name))
            .text("speed", upload.params.speed.to_string())
            .text("volume", upload.params.volume.to_string());

        let response = self
            .client
            .post(format!("{}/process", self.base_url))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn status(&self, job_id: &str) -> Result<JobStatusResponse, ApiError> {
        let response = self
            .client
            .get(format!("{}/status/{}", self.base_url, job_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands the service's `ErrorResponse` JSON; otherwise uses the
/// trimmed body text.
fn server_message(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
        let detail = parsed.fields.get("message").and_then(|m| m.as_str());
        return Some(detail.map(str::to_string).unwrap_or(parsed.error));
    }
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(error) = map.get("error").and_then(|e| e.as_str()) {
            return Some(error.to_string());
        }
    }
    let text = body.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_messages_prefer_structured_detail() {
        let body = r#"{"error":"Validation failed","fields":{"message":"Speed must be between 0.5 and 2.0"}}"#;
        assert_eq!(
            server_message(body).as_deref(),
            Some("Speed must be between 0.5 and 2.0")
        );
        assert_eq!(
            server_message(r#"{"error":"Not found","fields":{}}"#).as_deref(),
            Some("Not found")
        );
        assert_eq!(server_message(r#"{"error":"boom"}"#).as_deref(), Some("boom"));
        assert_eq!(
            server_message("Only MP3 and WAV files are allowed\n").as_deref(),
            Some("Only MP3 and WAV files are allowed")
        );
        assert_eq!(server_message("   "), None);
    }

    #[test]
    fn relative_locations_resolve_against_the_server() {
        let api = HttpJobApi::with_client(reqwest::Client::new(), "http://localhost:8080/");
        assert_eq!(api.resolve("/files/abc.mp3"), "http://localhost:8080/files/abc.mp3");
        assert_eq!(api.resolve("https://cdn.example/x.mp3"), "https://cdn.example/x.mp3");
    }

    #[test]
    fn default_destination_uses_last_path_segment() {
        let dest = HttpJobApi::default_destination("/files/speedup_song.mp3", Path::new("/tmp"));
        assert_eq!(dest, Path::new("/tmp/speedup_song.mp3"));
    }

    #[tokio::test]
    async fn broken_transfer_leaves_no_file() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            use std::io::{Read, Write};
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request);
            // promises 1000 bytes, sends 7, then hangs up
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\npartial");
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("speedup_song.mp3");
        let api = HttpJobApi::new(&format!("http://{}", addr)).unwrap();

        let err = api.download("/files/speedup_song.mp3", &dest).await.unwrap_err();
        assert!(matches!(err, ApiError::Request(_)));
        assert!(!dest.exists());
    }

    mod against_handlers {
        use std::sync::Arc;

        use actix_web::{dev::ServerHandle, web::Data, App, HttpServer};
        use tokio::sync::Semaphore;

        use super::*;
        use crate::api::job::handlers::job_config;
        use crate::api::job::service::JobService;
        use crate::api::validation::multipart_config;
        use crate::audio::AudioProcessor;
        use crate::client::submitter::{JobSubmitter, SubmissionResult};
        use crate::db::JobStore;

        struct TestServer {
            api: HttpJobApi,
            handle: ServerHandle,
            _dir: tempfile::TempDir,
        }

        fn start_server(queue_enabled: bool) -> TestServer {
            let dir = tempfile::tempdir().unwrap();
            let uploads = dir.path().join("uploads");
            let outputs = dir.path().join("outputs");
            std::fs::create_dir_all(&uploads).unwrap();
            std::fs::create_dir_all(&outputs).unwrap();

            let processor = AudioProcessor::new(
                "definitely-not-ffmpeg-binary".to_string(),
                "definitely-not-ffprobe-binary".to_string(),
                outputs,
                Duration::from_secs(5),
            );
            let service = Data::new(JobService::new(
                JobStore::in_memory(),
                processor,
                uploads,
                queue_enabled,
                Arc::new(Semaphore::new(2)),
            ));

            let server = HttpServer::new(move || {
                App::new()
                    .app_data(service.clone())
                    .app_data(multipart_config(1024 * 1024))
                    .configure(job_config)
            })
            .workers(1)
            .bind(("127.0.0.1", 0))
            .unwrap();
            let addr = server.addrs()[0];
            let server = server.run();
            let handle = server.handle();
            actix_web::rt::spawn(server);

            TestServer {
                api: HttpJobApi::new(&format!("http://{}", addr)).unwrap(),
                handle,
                _dir: dir,
            }
        }

        fn song(params: AdjustParams) -> Upload {
            Upload {
                file_name: "song.mp3".to_string(),
                bytes: b"ID3fake".to_vec(),
                params,
            }
        }

        #[actix_web::test]
        async fn queued_upload_and_status_round_trip() {
            let server = start_server(true);

            let response = server.api.submit(song(AdjustParams::default())).await.unwrap();
            assert_eq!(response.queue_enabled, Some(true));
            let job_id = response.job_id.unwrap();

            let snapshot = server.api.status(&job_id).await.unwrap();
            assert_eq!(snapshot.status, "queued");
            assert_eq!(snapshot.position, 1);

            let err = server.api.status("no-such-job").await.unwrap_err();
            assert!(matches!(err, ApiError::Server { status: 404, .. }));

            server.handle.stop(false).await;
        }

        #[actix_web::test]
        async fn server_side_validation_message_reaches_the_client() {
            let server = start_server(true);

            let err = server
                .api
                .submit(song(AdjustParams { speed: 3.0, volume: 1.0 }))
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::Server { status: 400, .. }));
            assert_eq!(err.server_message(), Some("Speed must be between 0.5 and 2.0"));

            server.handle.stop(false).await;
        }

        #[actix_web::test]
        async fn inline_failure_is_a_submission_result() {
            let server = start_server(false);

            let result = JobSubmitter::new(server.api.clone())
                .submit(song(AdjustParams { speed: 1.5, volume: 0.8 }))
                .await
                .unwrap();
            match result {
                SubmissionResult::Failed { error } => assert!(error.contains("definitely-not-ffmpeg-binary")),
                other => panic!("expected a failed result, got {:?}", other),
            }

            server.handle.stop(false).await;
        }
    }

    #[tokio::test]
    async fn upload_takes_file_name_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");
        tokio::fs::write(&path, b"RIFF").await.unwrap();

        let upload = Upload::from_path(&path, AdjustParams::default()).await.unwrap();
        assert_eq!(upload.file_name, "track.wav");
        assert_eq!(upload.bytes, b"RIFF");
    }
}

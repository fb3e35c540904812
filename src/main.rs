use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod api;
mod audio;
mod client;
mod config;
mod db;
mod shutdown;
mod worker;

use crate::api::job::models::{DEFAULT_SPEED, DEFAULT_VOLUME};
use crate::api::job::{handlers::job_config, AdjustParams, JobService};
use crate::api::{health::health_config, validation};
use crate::audio::AudioProcessor;
use crate::client::{AudioJobClient, ConsoleProgress, HttpJobApi, JobApi, PollPolicy, TerminalOutcome, Upload};
use crate::db::JobStore;
use crate::shutdown::ShutdownCoordinator;
use crate::worker::{JobWorker, RetentionSweeper};

#[derive(Parser)]
#[command(name = "audio-speedup", version, about = "Speed up and re-level MP3/WAV audio")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Upload a file, follow the job and download the result
    Process {
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_SPEED)]
        speed: f64,
        #[arg(long, default_value_t = DEFAULT_VOLUME)]
        volume: f64,
        #[arg(long, env = "AUDIO_SPEEDUP_URL", default_value = "http://127.0.0.1:8080")]
        server: String,
        /// Where to write the result; defaults to the server's file name in the current directory
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Give up tracking after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long, default_value_t = 1000)]
        poll_interval_ms: u64,
        /// Give up after this many status queries fail in a row
        #[arg(long, default_value_t = 5)]
        max_failures: u32,
        #[arg(long, short)]
        quiet: bool,
    },
    /// Print the current status of a job
    Status {
        job_id: String,
        #[arg(long, env = "AUDIO_SPEEDUP_URL", default_value = "http://127.0.0.1:8080")]
        server: String,
    },
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Process {
            file,
            speed,
            volume,
            server,
            output,
            timeout_secs,
            poll_interval_ms,
            max_failures,
            quiet,
        } => {
            init_client_logging();
            let policy = PollPolicy {
                interval: Duration::from_millis(poll_interval_ms),
                max_consecutive_failures: max_failures,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            process_file(&file, AdjustParams { speed, volume }, &server, output, policy, quiet).await
        }
        Command::Status { job_id, server } => {
            init_client_logging();
            let api = HttpJobApi::new(&server)?;
            let status = api.status(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = config::Config::from_env().map_err(anyhow::Error::msg)?;

    init_server_logging(&config.log_dir)?;

    for dir in [&config.upload_dir, &config.output_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    info!("Starting audio-speedup service");
    info!("Configuration loaded successfully:");
    info!("  - Max upload size: {} bytes", config.max_upload_size);
    info!("  - Queue enabled: {}", config.queue_enabled);
    info!("  - Workers: {} (max {} concurrent jobs)", config.num_workers, config.max_concurrent_jobs);
    info!("  - Upload dir: {}", config.upload_dir.display());
    info!("  - Output dir: {}", config.output_dir.display());

    let store = JobStore::connect(config.database_url.as_deref(), config.max_db_connections)
        .await
        .context("Failed to open job store")?;

    let requeued = store.requeue_interrupted().await?;
    if requeued > 0 {
        info!("Requeued {} jobs interrupted by the previous shutdown", requeued);
    }

    let processor = AudioProcessor::from_config(&config);

    // watch channel lets every background task see the same shutdown flag
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
    let mut worker_handles = Vec::new();
    if config.queue_enabled {
        for worker_id in 1..=config.num_workers {
            let job_worker = JobWorker::new(store.clone(), processor.clone(), config.worker_idle);
            let worker_semaphore = semaphore.clone();
            let worker_shutdown_rx = shutdown_rx.clone();

            worker_handles.push(tokio::spawn(async move {
                job_worker.run(worker_id, worker_semaphore, worker_shutdown_rx).await;
            }));
            info!("Spawned worker {}", worker_id);
        }
    }

    let sweeper = RetentionSweeper::new(store.clone(), config.output_dir.clone(), config.job_ttl);
    let sweep_interval = config.sweep_interval;
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweep_interval, shutdown_rx).await;
    });

    let job_service = web::Data::new(JobService::new(
        store.clone(),
        processor,
        config.upload_dir.clone(),
        config.queue_enabled,
        semaphore,
    ));
    let max_upload_size = config.max_upload_size;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(job_service.clone())
            .app_data(web::PayloadConfig::default().limit(max_upload_size))
            .app_data(validation::multipart_config(max_upload_size))
            .configure(health_config)
            .configure(job_config)
    });

    info!("Server starting on http://{}:{}", config.bind_addr, config.port);

    let server = server.bind((config.bind_addr.as_str(), config.port))?.run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    let coordinator = ShutdownCoordinator::new(
        server_handle,
        server_task,
        worker_handles,
        sweeper_handle,
        shutdown_tx,
        store,
    );

    coordinator.wait_for_shutdown().await?;
    Ok(())
}

async fn process_file(
    file: &Path,
    params: AdjustParams,
    server: &str,
    output: Option<PathBuf>,
    policy: PollPolicy,
    quiet: bool,
) -> anyhow::Result<()> {
    let upload = Upload::from_path(file, params)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let api = HttpJobApi::new(server)?;
    let sink = if quiet { ConsoleProgress::hidden() } else { ConsoleProgress::new() };
    let client = AudioJobClient::new(api.clone(), sink, policy);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match client.process(upload, &cancel).await? {
        TerminalOutcome::Completed { download_url } => {
            let dest = match output {
                Some(path) => path,
                None => HttpJobApi::default_destination(&download_url, &std::env::current_dir()?),
            };
            let written = api.download(&download_url, &dest).await?;
            info!("Saved {} bytes to {}", written, dest.display());
            println!("{}", dest.display());
            Ok(())
        }
        TerminalOutcome::Failed { error } => {
            error!("Processing failed: {}", error);
            bail!(error)
        }
    }
}

/// File-based logging with daily rotation and level separation.
/// Log files are created as: logs/info.2025-01-01.log, logs/error.2025-01-01.log, etc.
fn init_server_logging(log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir).context("Failed to create logs directory")?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let info_file = tracing_appender::rolling::daily(log_dir, "info.log");
    let warn_file = tracing_appender::rolling::daily(log_dir, "warn.log");
    let error_file = tracing_appender::rolling::daily(log_dir, "error.log");
    let debug_file = tracing_appender::rolling::daily(log_dir, "debug.log");

    let info_layer = tracing_subscriber::fmt::layer()
        .with_writer(info_file)
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    let warn_layer = tracing_subscriber::fmt::layer()
        .with_writer(warn_file)
        .with_ansi(false)
        .with_filter(LevelFilter::WARN);

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_file)
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);

    let debug_layer = tracing_subscriber::fmt::layer()
        .with_writer(debug_file)
        .with_ansi(false)
        .with_filter(LevelFilter::DEBUG);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(info_layer)
        .with(warn_layer)
        .with(error_layer)
        .with(debug_layer)
        .init();

    Ok(())
}

/// Client commands log to stderr only, so stdout stays clean for results
fn init_client_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

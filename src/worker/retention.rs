use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::audio::ffmpeg::OUTPUT_PREFIX;
use crate::db::JobStore;

/// Deletes finished jobs past their time-to-live, together with their files
pub struct RetentionSweeper {
    store: JobStore,
    output_dir: PathBuf,
    ttl: Duration,
}

impl RetentionSweeper {
    pub fn new(store: JobStore, output_dir: PathBuf, ttl: Duration) -> Self {
        Self {
            store,
            output_dir,
            ttl,
        }
    }

    pub async fn run(&self, every: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Retention sweep failed: {}", e);
                    }
                }
            }
            if *shutdown_rx.borrow() {
                break;
            }
        }
        info!("Retention sweeper stopped");
    }

    /// One pass. Returns how many jobs and unowned result files were removed.
    pub async fn sweep(&self) -> Result<usize, crate::db::StoreError> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let expired = self.store.delete_expired(cutoff).await?;
        for job in &expired {
            remove_if_present(Path::new(&job.input_path)).await;
            if let Some(name) = &job.output_name {
                remove_if_present(&self.output_dir.join(name)).await;
            }
        }

        if !expired.is_empty() {
            info!("Expired {} finished jobs", expired.len());
        }

        // Inline results have no job row; age them out by modification time
        let stale = self.remove_stale_outputs().await;
        if stale > 0 {
            info!("Removed {} stale result files", stale);
        }
        Ok(expired.len() + stale)
    }

    async fn remove_stale_outputs(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Failed to list {}: {}", self.output_dir.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read {}: {}", self.output_dir.display(), e);
                    break;
                }
            };
            if !entry.file_name().to_string_lossy().starts_with(OUTPUT_PREFIX) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Failed to stat {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            // files stamped in the future are left alone
            if now.duration_since(modified).is_ok_and(|age| age > self.ttl) {
                remove_if_present(&entry.path()).await;
                removed += 1;
            }
        }
        removed
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

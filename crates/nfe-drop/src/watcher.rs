//! Filesystem watcher and intake pipeline
//!
//! Turns drops in `incoming/` into durable jobs: each arrival is
//! classified by extension, checked for size stability, renamed into
//! `processing/` and published to the broker. Promotion is strictly
//! sequential, which keeps rename/stat races out of the picture.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use tracing::{debug, error, info, warn};

use nfe_common::{NfeError, Result};

use crate::config::DirectoryConfig;
use crate::queue::{Job, JobPublisher};

/// Size samples taken before giving up on a file stabilizing.
const STABLE_ATTEMPTS: u32 = 5;

/// Delay between consecutive size samples.
const STABLE_DELAY: Duration = Duration::from_millis(200);

/// Watches the incoming directory and promotes stable recognized files.
pub struct Watcher {
    dirs: DirectoryConfig,
    publisher: Option<Arc<dyn JobPublisher>>,
    stable_attempts: u32,
    stable_delay: Duration,
}

impl Watcher {
    /// Watcher publishing through `publisher`; pass `None` when the broker
    /// backend is disabled and the worker polls `processing/` instead.
    pub fn new(dirs: DirectoryConfig, publisher: Option<Arc<dyn JobPublisher>>) -> Self {
        Self {
            dirs,
            publisher,
            stable_attempts: STABLE_ATTEMPTS,
            stable_delay: STABLE_DELAY,
        }
    }

    /// Override the stability sampling parameters.
    pub fn with_stability(mut self, attempts: u32, delay: Duration) -> Self {
        self.stable_attempts = attempts;
        self.stable_delay = delay;
        self
    }

    /// Run until `shutdown` resolves.
    ///
    /// Ensures all staged directories exist, sweeps files already sitting
    /// in `incoming/`, then reacts to filesystem change notifications.
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()> + Send) -> Result<()> {
        self.dirs.ensure_all()?;

        info!(incoming = %self.dirs.incoming.display(), "processing files already in incoming");
        self.sweep_incoming().await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut fs_watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = tx.send(result);
        })
        .map_err(|e| NfeError::Watch(e.to_string()))?;

        fs_watcher
            .watch(&self.dirs.incoming, RecursiveMode::NonRecursive)
            .map_err(|e| NfeError::Watch(e.to_string()))?;

        info!(incoming = %self.dirs.incoming.display(), "watching incoming directory");

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping watcher");
                    return Ok(());
                }
                event = rx.recv() => {
                    match event {
                        Some(Ok(event)) => self.handle_event(event).await,
                        Some(Err(e)) => {
                            error!(error = %e, "filesystem watch error");
                        }
                        None => {
                            return Err(NfeError::Watch("event channel closed".to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Process every non-directory entry already present in `incoming/`
    /// as if it had just arrived.
    pub async fn sweep_incoming(&self) {
        let entries = match std::fs::read_dir(&self.dirs.incoming) {
            Ok(entries) => entries,
            Err(e) => {
                error!(
                    dir = %self.dirs.incoming.display(),
                    error = %e,
                    "failed to read incoming directory"
                );
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            self.handle_incoming_file(&path).await;
        }
    }

    async fn handle_event(&self, event: Event) {
        if !is_relevant(&event.kind) {
            return;
        }

        for path in &event.paths {
            match std::fs::metadata(path) {
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        debug!(
                            path = %path.display(),
                            error = %e,
                            "file no longer accessible, discarding event"
                        );
                    }
                    continue;
                }
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => {}
            }

            self.handle_incoming_file(path).await;
        }
    }

    /// Classify one arrival and move it forward.
    pub async fn handle_incoming_file(&self, path: &Path) {
        let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
        else {
            return;
        };

        if is_zone_identifier(&filename) {
            info!(path = %path.display(), "metadata file (Zone.Identifier) detected, removing");
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove metadata file");
            }
            return;
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "xml" | "zip" => {
                if !self.wait_file_stable(path).await {
                    warn!(path = %path.display(), "file did not stabilize, leaving for a later event");
                    return;
                }
                self.promote_to_processing(path, &filename, &extension).await;
            }
            _ => self.move_to_ignored(path, &filename),
        }
    }

    /// A file is stable once two consecutive size samples match and are
    /// positive. Vanished files and files that stay empty are not stable.
    async fn wait_file_stable(&self, path: &Path) -> bool {
        let mut last_size: Option<u64> = None;

        for _ in 0..self.stable_attempts {
            let size = match std::fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "stat failed during stability check");
                    return false;
                }
            };

            if size > 0 && last_size == Some(size) {
                return true;
            }

            last_size = Some(size);
            tokio::time::sleep(self.stable_delay).await;
        }

        false
    }

    async fn promote_to_processing(&self, src: &Path, filename: &str, kind: &str) {
        let dest = self.dirs.processing.join(filename);

        if let Err(e) = std::fs::rename(src, &dest) {
            error!(
                src = %src.display(),
                dest = %dest.display(),
                error = %e,
                "failed to move file from incoming to processing"
            );
            return;
        }

        info!(src = %src.display(), dest = %dest.display(), "file moved to processing");

        if let Some(ref publisher) = self.publisher {
            let job = Job {
                path: dest.display().to_string(),
                filename: filename.to_string(),
                kind: kind.to_string(),
            };

            // A failed publish is not backed out: the file stays in
            // processing/ where the polling fallback can still pick it up.
            match publisher.publish(&job).await {
                Ok(()) => {
                    info!(path = %job.path, kind = %job.kind, "job published");
                }
                Err(e) => {
                    error!(path = %job.path, kind = %job.kind, error = %e, "failed to publish job");
                }
            }
        }
    }

    fn move_to_ignored(&self, src: &Path, filename: &str) {
        let dest = self.dirs.ignored.join(filename);

        if let Err(e) = std::fs::rename(src, &dest) {
            error!(
                src = %src.display(),
                dest = %dest.display(),
                error = %e,
                "failed to move unsupported file to ignored"
            );
            return;
        }

        info!(src = %src.display(), dest = %dest.display(), "unsupported file moved to ignored");
    }
}

/// A change event matters when it signals a create, a write or a
/// permission change; renames and removals are left to the stat check.
fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Metadata(_))
            | EventKind::Modify(ModifyKind::Any)
    )
}

fn is_zone_identifier(filename: &str) -> bool {
    filename.to_lowercase().contains("zone.identifier")
}

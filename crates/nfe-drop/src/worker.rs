//! Work dispatcher
//!
//! Consumes jobs (from the broker, or by polling `processing/` when the
//! broker backend is disabled), runs the parse-and-persist pipeline for
//! each invoice and routes the source file to its terminal directory.
//! Every per-invoice outcome is recovered here and reported as a metric;
//! the broker only ever sees infrastructure failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info, warn};

use nfe_common::{NfeError, Result};

use crate::config::DirectoryConfig;
use crate::invoice::InvoiceParser;
use crate::metrics;
use crate::queue::{Job, JobHandler, RabbitMqQueue};
use crate::store::{InvoiceStore, SaveOutcome};

/// Interval between `processing/` scans in polling mode.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Terminal outcome of one invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ParseError,
    DbError,
    Duplicate,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::ParseError => "parse_error",
            Outcome::DbError => "db_error",
            Outcome::Duplicate => "duplicate",
        }
    }
}

/// Where the invoice XML came from, for metric labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Xml,
    Zip,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Xml => "xml",
            SourceKind::Zip => "zip",
        }
    }
}

/// Counters accumulated while processing one ZIP archive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ZipStats {
    pub xml_total: usize,
    pub success: usize,
    pub duplicate: usize,
    pub failed: usize,
}

/// Processes jobs into persisted invoices and terminal file moves.
pub struct Worker {
    dirs: DirectoryConfig,
    parser: InvoiceParser,
    store: Arc<dyn InvoiceStore>,
}

impl Worker {
    pub fn new(dirs: DirectoryConfig, parser: InvoiceParser, store: Arc<dyn InvoiceStore>) -> Self {
        Self { dirs, parser, store }
    }

    /// Run until `shutdown` resolves.
    ///
    /// With a queue client, consumes jobs from the broker; without one,
    /// falls back to polling `processing/` every two seconds.
    pub async fn run(
        self: Arc<Self>,
        queue: Option<Arc<RabbitMqQueue>>,
        shutdown: impl std::future::Future<Output = ()> + Send,
    ) -> Result<()> {
        self.dirs.ensure_all()?;

        match queue {
            Some(queue) => {
                info!(
                    processing = %self.dirs.processing.display(),
                    "worker running in queue mode"
                );
                queue.consume(Arc::clone(&self), shutdown).await
            }
            None => {
                info!(
                    processing = %self.dirs.processing.display(),
                    "worker running in directory polling mode"
                );

                let mut ticker = tokio::time::interval(POLL_INTERVAL);
                tokio::pin!(shutdown);

                loop {
                    tokio::select! {
                        _ = &mut shutdown => {
                            info!("shutdown requested, stopping worker");
                            return Ok(());
                        }
                        _ = ticker.tick() => self.scan_processing().await,
                    }
                }
            }
        }
    }

    /// Polling fallback: handle every file currently in `processing/`.
    pub async fn scan_processing(&self) {
        let entries = match std::fs::read_dir(&self.dirs.processing) {
            Ok(entries) => entries,
            Err(e) => {
                error!(
                    dir = %self.dirs.processing.display(),
                    error = %e,
                    "failed to read processing directory"
                );
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();

            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "file in processing is no longer accessible, skipping"
                    );
                    continue;
                }
            };
            if meta.is_dir() {
                continue;
            }

            let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };

            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();

            match extension.as_str() {
                "xml" => {
                    self.process_xml_file(&path, &filename, SourceKind::Xml).await;
                }
                "zip" => {
                    self.process_zip_file(&path, &filename).await;
                }
                _ => {
                    info!(
                        path = %path.display(),
                        extension = %extension,
                        "unhandled extension in processing, moving to processed"
                    );
                    self.move_file(&self.dirs.processed, &path, &filename, "processed");
                }
            }
        }
    }

    /// Run the single-invoice pipeline and emit its metric.
    pub async fn process_xml_file(
        &self,
        src: &Path,
        filename: &str,
        source: SourceKind,
    ) -> Outcome {
        let start = Instant::now();
        let outcome = self.handle_xml(src, filename).await;
        metrics::observe_invoice(outcome.as_str(), source.as_str(), start.elapsed());
        outcome
    }

    async fn handle_xml(&self, src: &Path, filename: &str) -> Outcome {
        let parsed = match self.parser.parse_file(src) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(path = %src.display(), error = %e, "failed to validate or parse XML");
                self.move_file(&self.dirs.failed, src, filename, "failed");
                return Outcome::ParseError;
            }
        };

        info!(
            path = %src.display(),
            summary = %parsed.summary(),
            "invoice parsed"
        );

        match self.store.save(&parsed).await {
            Ok(SaveOutcome::Saved { invoice_id }) => {
                info!(
                    invoice_id,
                    access_key = %parsed.access_key,
                    "invoice stored"
                );
                self.move_file(&self.dirs.processed, src, filename, "processed");
                Outcome::Success
            }
            Ok(SaveOutcome::Duplicate) => {
                info!(
                    path = %src.display(),
                    access_key = %parsed.access_key,
                    "invoice already stored, skipping reprocessing"
                );
                self.move_file(&self.dirs.ignored, src, filename, "ignored");
                Outcome::Duplicate
            }
            Err(e) => {
                error!(
                    path = %src.display(),
                    access_key = %parsed.access_key,
                    error = %e,
                    "failed to persist invoice"
                );
                self.move_file(&self.dirs.failed, src, filename, "failed");
                Outcome::DbError
            }
        }
    }

    /// Extract every XML entry of the archive into a private scratch
    /// directory, run each through the single-invoice pipeline, then
    /// remove the ZIP. The scratch directory never outlives this call.
    pub async fn process_zip_file(&self, src: &Path, filename: &str) -> ZipStats {
        info!(path = %src.display(), "ZIP identified, extracting for processing");

        let mut stats = ZipStats::default();

        let base = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename);
        let work_dir = self.dirs.tmp.join(base);

        if let Err(e) = std::fs::create_dir_all(&work_dir) {
            error!(
                zip = %src.display(),
                work_dir = %work_dir.display(),
                error = %e,
                "failed to create scratch directory for ZIP"
            );
            remove_zip(src);
            return stats;
        }

        let _scratch = ScratchDir(work_dir.clone());

        let extraction = match extract_xml_entries(src, &work_dir, &mut stats) {
            Ok(extraction) => extraction,
            Err(e) => {
                error!(zip = %src.display(), error = %e, "failed to open ZIP");
                remove_zip(src);
                return stats;
            }
        };

        if extraction.archive_empty {
            warn!(zip = %src.display(), "ZIP is empty");
            remove_zip(src);
            return stats;
        }

        for inner_path in &extraction.files {
            let Some(inner_name) = inner_path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
            else {
                continue;
            };

            match self
                .process_xml_file(inner_path, &inner_name, SourceKind::Zip)
                .await
            {
                Outcome::Success => stats.success += 1,
                Outcome::Duplicate => stats.duplicate += 1,
                Outcome::ParseError | Outcome::DbError => stats.failed += 1,
            }
        }

        remove_zip(src);

        info!(
            zip = %src.display(),
            xml_total = stats.xml_total,
            success = stats.success,
            duplicates = stats.duplicate,
            failed = stats.failed,
            "ZIP processing complete"
        );

        stats
    }

    fn move_file(&self, dest_dir: &Path, src: &Path, filename: &str, label: &str) {
        let dest = dest_dir.join(filename);

        if let Err(e) = std::fs::rename(src, &dest) {
            error!(
                src = %src.display(),
                dest = %dest.display(),
                error = %e,
                "failed to move file to {}",
                label
            );
            return;
        }

        info!(src = %src.display(), dest = %dest.display(), "file moved to {}", label);
    }
}

#[async_trait]
impl JobHandler for Worker {
    /// Deterministic per-invoice failures are terminal here (the file has
    /// already been routed); returning `Ok` acks the delivery. A job whose
    /// file vanished is considered already handled.
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        let path = Path::new(&job.path);

        match std::fs::metadata(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %job.path,
                    filename = %job.filename,
                    kind = %job.kind,
                    "job file no longer exists, skipping"
                );
                return Ok(());
            }
            Err(e) => {
                error!(path = %job.path, error = %e, "failed to stat job file");
                return Ok(());
            }
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => {}
        }

        match job.kind.to_lowercase().as_str() {
            "xml" => {
                self.process_xml_file(path, &job.filename, SourceKind::Xml).await;
            }
            "zip" => {
                self.process_zip_file(path, &job.filename).await;
            }
            other => {
                warn!(
                    path = %job.path,
                    filename = %job.filename,
                    kind = %other,
                    "unknown job kind"
                );
            }
        }

        Ok(())
    }
}

/// Result of the extraction phase over one archive.
struct ZipExtraction {
    files: Vec<PathBuf>,
    archive_empty: bool,
}

/// Extract the XML entries of `src` into `work_dir`, logging and skipping
/// everything else. Entry-level extraction failures count as failed.
fn extract_xml_entries(
    src: &Path,
    work_dir: &Path,
    stats: &mut ZipStats,
) -> Result<ZipExtraction> {
    let file = std::fs::File::open(src)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| NfeError::parse("ZIP archive", e.to_string()))?;

    if archive.is_empty() {
        return Ok(ZipExtraction {
            files: Vec::new(),
            archive_empty: true,
        });
    }

    // Entry names come from the central directory listing, so an entry
    // whose local header is corrupt still lands in the counts below.
    let entry_names: Vec<String> = archive.file_names().map(str::to_string).collect();

    let mut extracted = Vec::new();

    for (index, name) in entry_names.iter().enumerate() {
        if name.ends_with('/') {
            continue;
        }

        if !name.to_lowercase().ends_with(".xml") {
            info!(zip = %src.display(), inner_name = %name, "entry inside ZIP ignored (not XML)");
            continue;
        }

        stats.xml_total += 1;

        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                error!(
                    zip = %src.display(),
                    inner_name = %name,
                    error = %e,
                    "failed to read ZIP entry"
                );
                stats.failed += 1;
                continue;
            }
        };

        let Some(inner_filename) = Path::new(name).file_name() else {
            stats.failed += 1;
            continue;
        };
        let inner_path = work_dir.join(inner_filename);

        let mut out = match std::fs::File::create(&inner_path) {
            Ok(out) => out,
            Err(e) => {
                error!(
                    zip = %src.display(),
                    inner_name = %name,
                    dest = %inner_path.display(),
                    error = %e,
                    "failed to create scratch file for extracted XML"
                );
                stats.failed += 1;
                continue;
            }
        };

        if let Err(e) = std::io::copy(&mut entry, &mut out) {
            error!(
                zip = %src.display(),
                inner_name = %name,
                dest = %inner_path.display(),
                error = %e,
                "failed to copy ZIP entry to scratch file"
            );
            stats.failed += 1;
            continue;
        }

        info!(
            zip = %src.display(),
            inner_name = %name,
            scratch_path = %inner_path.display(),
            "XML extracted from ZIP"
        );
        extracted.push(inner_path);
    }

    Ok(ZipExtraction {
        files: extracted,
        archive_empty: false,
    })
}

fn remove_zip(src: &Path) {
    if let Err(e) = std::fs::remove_file(src) {
        warn!(path = %src.display(), error = %e, "failed to remove ZIP after processing");
    }
}

/// Per-ZIP scratch directory, removed unconditionally when processing ends.
struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(work_dir = %self.0.display(), error = %e, "failed to remove scratch directory");
            }
        }
    }
}

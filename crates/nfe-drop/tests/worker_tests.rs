//! Worker dispatch, terminal moves and ZIP fan-out

mod helpers;

use std::io::Write;
use std::sync::Arc;

use tempfile::TempDir;

use nfe_drop::config::DirectoryConfig;
use nfe_drop::invoice::InvoiceParser;
use nfe_drop::queue::Job;
use nfe_drop::queue::JobHandler;
use nfe_drop::worker::{Outcome, SourceKind, Worker};

use helpers::{proc_invoice_xml, test_dirs, MemoryStore, FIXTURE_ACCESS_KEY};

const SECOND_ACCESS_KEY: &str = "35240214200166000187550010000000021000000029";

fn worker_with(dirs: &DirectoryConfig, store: Arc<MemoryStore>) -> Worker {
    Worker::new(dirs.clone(), InvoiceParser::new(), store)
}

fn stage_xml(dirs: &DirectoryConfig, name: &str, content: &str) -> std::path::PathBuf {
    let path = dirs.processing.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn build_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    for (name, content) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content).unwrap();
    }

    zip.finish().unwrap();
}

#[tokio::test]
async fn valid_xml_is_persisted_and_moved_to_processed() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    let src = stage_xml(&dirs, "nota.xml", &proc_invoice_xml(FIXTURE_ACCESS_KEY));

    let outcome = worker
        .process_xml_file(&src, "nota.xml", SourceKind::Xml)
        .await;

    assert_eq!(outcome, Outcome::Success);
    assert!(dirs.processed.join("nota.xml").exists());
    assert!(!src.exists());
    assert!(store.contains_access_key(FIXTURE_ACCESS_KEY));
}

#[tokio::test]
async fn duplicate_goes_to_ignored_without_a_second_row() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    let first = stage_xml(&dirs, "nota.xml", &proc_invoice_xml(FIXTURE_ACCESS_KEY));
    let outcome = worker
        .process_xml_file(&first, "nota.xml", SourceKind::Xml)
        .await;
    assert_eq!(outcome, Outcome::Success);

    let second = stage_xml(&dirs, "nota-copy.xml", &proc_invoice_xml(FIXTURE_ACCESS_KEY));
    let outcome = worker
        .process_xml_file(&second, "nota-copy.xml", SourceKind::Xml)
        .await;

    assert_eq!(outcome, Outcome::Duplicate);
    assert!(dirs.ignored.join("nota-copy.xml").exists());
    assert_eq!(store.saved_count(), 1);
}

#[tokio::test]
async fn parse_error_goes_to_failed() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    let src = stage_xml(&dirs, "broken.xml", "<invoice>not an NFe</invoice>");

    let outcome = worker
        .process_xml_file(&src, "broken.xml", SourceKind::Xml)
        .await;

    assert_eq!(outcome, Outcome::ParseError);
    assert!(dirs.failed.join("broken.xml").exists());
    assert_eq!(store.saved_count(), 0);
}

#[tokio::test]
async fn database_failure_goes_to_failed() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    store.fail_saves();
    let worker = worker_with(&dirs, store.clone());

    let src = stage_xml(&dirs, "nota.xml", &proc_invoice_xml(FIXTURE_ACCESS_KEY));

    let outcome = worker
        .process_xml_file(&src, "nota.xml", SourceKind::Xml)
        .await;

    assert_eq!(outcome, Outcome::DbError);
    assert!(dirs.failed.join("nota.xml").exists());
}

#[tokio::test]
async fn job_for_missing_file_is_acked() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    let job = Job {
        path: dirs.processing.join("gone.xml").display().to_string(),
        filename: "gone.xml".to_string(),
        kind: "xml".to_string(),
    };

    // The file was already handled elsewhere; the handler reports success
    // so the broker does not redeliver.
    assert!(worker.handle(job).await.is_ok());
    assert_eq!(store.saved_count(), 0);
}

#[tokio::test]
async fn unknown_job_kind_is_acked_and_leaves_the_file_alone() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    let src = stage_xml(&dirs, "nota.xml", &proc_invoice_xml(FIXTURE_ACCESS_KEY));
    let job = Job {
        path: src.display().to_string(),
        filename: "nota.xml".to_string(),
        kind: "pdf".to_string(),
    };

    assert!(worker.handle(job).await.is_ok());
    assert!(src.exists());
    assert_eq!(store.saved_count(), 0);
}

#[tokio::test]
async fn zip_with_mixed_entries_fans_out_per_invoice() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    let zip_path = dirs.processing.join("lote.zip");
    build_zip(
        &zip_path,
        &[
            ("nota-a.xml", proc_invoice_xml(FIXTURE_ACCESS_KEY).as_bytes()),
            ("nota-b.xml", proc_invoice_xml(SECOND_ACCESS_KEY).as_bytes()),
            ("broken.xml", b"<nope/>"),
            ("leia-me.txt", b"not an invoice"),
        ],
    );

    let stats = worker.process_zip_file(&zip_path, "lote.zip").await;

    assert_eq!(stats.xml_total, 3);
    assert_eq!(stats.success, 2);
    assert_eq!(stats.duplicate, 0);
    assert_eq!(stats.failed, 1);

    // Extracted XMLs are routed individually; the ZIP itself is removed,
    // never moved to a terminal directory.
    assert!(dirs.processed.join("nota-a.xml").exists());
    assert!(dirs.processed.join("nota-b.xml").exists());
    assert!(dirs.failed.join("broken.xml").exists());
    assert!(!zip_path.exists());
    assert_eq!(store.saved_count(), 2);

    // The per-ZIP scratch directory does not outlive the call.
    assert!(!dirs.tmp.join("lote").exists());
}

/// Write a ZIP with one good entry plus `corrupt_name`, whose local file
/// header signature is clobbered after the fact. The entry stays listed
/// in the central directory but cannot be read back.
fn build_zip_with_corrupt_entry(path: &std::path::Path, good: (&str, &[u8]), corrupt_name: &str) {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();

        zip.start_file(good.0, options).unwrap();
        zip.write_all(good.1).unwrap();
        zip.start_file(corrupt_name, options).unwrap();
        zip.write_all(b"<nfeProc/>").unwrap();

        zip.finish().unwrap();
    }
    let mut bytes = cursor.into_inner();

    // The first occurrence of the name belongs to the local file header
    // (the central directory copy comes later); the header signature
    // sits 30 bytes before the name.
    let name = corrupt_name.as_bytes();
    let pos = bytes
        .windows(name.len())
        .position(|window| window == name)
        .unwrap();
    bytes[pos - 30..pos - 26].copy_from_slice(b"XXXX");

    std::fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn zip_entry_with_corrupt_header_counts_toward_totals() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    let zip_path = dirs.processing.join("lote.zip");
    build_zip_with_corrupt_entry(
        &zip_path,
        ("boa.xml", proc_invoice_xml(FIXTURE_ACCESS_KEY).as_bytes()),
        "corrompida.xml",
    );

    let stats = worker.process_zip_file(&zip_path, "lote.zip").await;

    // The unreadable entry is named in the central directory, so it is
    // still an XML that failed rather than a silently dropped one.
    assert_eq!(stats.xml_total, 2);
    assert_eq!(stats.success, 1);
    assert_eq!(stats.duplicate, 0);
    assert_eq!(stats.failed, 1);

    assert!(dirs.processed.join("boa.xml").exists());
    assert!(!zip_path.exists());
    assert_eq!(store.saved_count(), 1);
}

#[tokio::test]
async fn zip_with_repeated_invoice_counts_a_duplicate() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    let zip_path = dirs.processing.join("lote.zip");
    build_zip(
        &zip_path,
        &[
            ("um.xml", proc_invoice_xml(FIXTURE_ACCESS_KEY).as_bytes()),
            ("dois.xml", proc_invoice_xml(SECOND_ACCESS_KEY).as_bytes()),
            ("repetida.xml", proc_invoice_xml(FIXTURE_ACCESS_KEY).as_bytes()),
        ],
    );

    let stats = worker.process_zip_file(&zip_path, "lote.zip").await;

    assert_eq!(stats.xml_total, 3);
    assert_eq!(stats.success, 2);
    assert_eq!(stats.duplicate, 1);
    assert_eq!(stats.failed, 0);

    assert!(dirs.ignored.join("repetida.xml").exists());
    assert_eq!(store.saved_count(), 2);
}

#[tokio::test]
async fn empty_zip_is_removed_without_side_effects() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    let zip_path = dirs.processing.join("vazio.zip");
    build_zip(&zip_path, &[]);

    let stats = worker.process_zip_file(&zip_path, "vazio.zip").await;

    assert_eq!(stats.xml_total, 0);
    assert_eq!(stats.success, 0);
    assert_eq!(stats.failed, 0);
    assert!(!zip_path.exists());
    assert_eq!(store.saved_count(), 0);
}

#[tokio::test]
async fn corrupt_zip_is_removed() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    let zip_path = dirs.processing.join("ruim.zip");
    std::fs::write(&zip_path, b"this is not a zip archive").unwrap();

    let stats = worker.process_zip_file(&zip_path, "ruim.zip").await;

    assert_eq!(stats.xml_total, 0);
    assert!(!zip_path.exists());
}

#[tokio::test]
async fn polling_scan_processes_staged_files() {
    let root = TempDir::new().unwrap();
    let dirs = test_dirs(root.path());
    let store = Arc::new(MemoryStore::new());
    let worker = worker_with(&dirs, store.clone());

    stage_xml(&dirs, "nota.xml", &proc_invoice_xml(FIXTURE_ACCESS_KEY));
    // Unknown extensions found in processing/ are shelved into processed/.
    std::fs::write(dirs.processing.join("leia-me.txt"), b"skip").unwrap();

    worker.scan_processing().await;

    assert!(dirs.processed.join("nota.xml").exists());
    assert!(dirs.processed.join("leia-me.txt").exists());
    assert!(store.contains_access_key(FIXTURE_ACCESS_KEY));
}

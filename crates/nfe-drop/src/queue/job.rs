//! Job envelope
//!
//! The JSON message carried by the broker: the staged file's absolute
//! path, its basename, and the kind of processing it needs.

use serde::{Deserialize, Serialize};

/// Job kind for a single invoice XML file.
pub const KIND_XML: &str = "xml";
/// Job kind for a ZIP archive of invoice XML files.
pub const KIND_ZIP: &str = "zip";

/// One unit of work published by the watcher and consumed by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Absolute path inside the processing directory.
    pub path: String,
    /// Basename of the staged file.
    pub filename: String,
    /// `"xml"` or `"zip"`; anything else is logged and dropped.
    pub kind: String,
}

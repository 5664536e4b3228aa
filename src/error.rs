//! Error types for the fieldscan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FieldScanError`] is **fatal**: the operation cannot proceed at all
//!   (no fields defined, unreadable upload, provider not configured). Returned
//!   as `Err(FieldScanError)` before any file state is touched.
//!
//! * [`StageError`] is **non-fatal**: one stage failed for one file (the VLM
//!   timed out, the document store said no). Stored on the file itself via its
//!   status axes so the rest of the batch carries on.
//!
//! Nothing a single file does can turn into a `FieldScanError` mid-run: the
//! File Queue is the record of what succeeded.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the fieldscan library.
///
/// Per-file failures use [`StageError`] and are recorded on
/// [`crate::queue::ScannedFile`] rather than propagated here.
#[derive(Debug, Error)]
pub enum FieldScanError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// A batch run was requested with an empty Field Registry.
    #[error("No fields defined.\nDraw at least one field (or run `fieldscan detect`) before processing.")]
    NoRegions,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Geometry / registry errors ────────────────────────────────────────
    /// The image container has a non-positive or non-finite size.
    #[error("Invalid image bounds {width}x{height}: both sides must be positive")]
    InvalidGeometry { width: f64, height: f64 },

    /// A region name was empty after trimming.
    #[error("Field names must not be empty")]
    InvalidRegionName,

    /// Another region already uses this name.
    #[error("A field named '{name}' already exists")]
    DuplicateRegionName { name: String },

    /// No region with this id or name exists in the registry.
    #[error("Field '{0}' not found")]
    RegionNotFound(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The upload is neither PNG nor JPEG (nor PDF with the `pdf` feature).
    #[error("Unsupported file format for '{name}'\nFirst bytes: {magic:?}")]
    UnsupportedFormat { name: String, magic: [u8; 4] },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// The first page of a PDF upload could not be rendered.
    #[error("Could not render a preview for '{name}': {detail}")]
    PreviewFailed { name: String, detail: String },

    // ── Template I/O ──────────────────────────────────────────────────────
    /// Could not read or parse a field template file.
    #[error("Failed to read field template '{path}': {detail}")]
    TemplateReadFailed { path: PathBuf, detail: String },

    /// Could not write a field template file.
    #[error("Failed to write field template '{path}': {source}")]
    TemplateWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── State machine ─────────────────────────────────────────────────────
    /// A status transition was requested that the state machine forbids.
    #[error("File '{file}': cannot move {axis} from {from} to {to}")]
    InvalidTransition {
        file: String,
        axis: &'static str,
        from: &'static str,
        to: &'static str,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Region auto-detection failed for the seed file.
    #[error("Could not seed fields from '{file}': {source}")]
    DetectionFailed {
        file: String,
        #[source]
        source: StageError,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for one stage of one file.
///
/// The orchestrator converts these into state on the file; the `Display`
/// text is what ends up in `ScannedFile::error`.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// The preview could not be decoded or re-encoded for upload.
    #[error("Preview encoding failed: {detail}")]
    Encode { detail: String },

    /// The extraction collaborator rejected the request.
    #[error("Extraction failed: {detail}")]
    Extraction { detail: String },

    /// The detection collaborator rejected the request.
    #[error("Field detection failed: {detail}")]
    Detection { detail: String },

    /// A collaborator call exceeded its timeout.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: String, secs: u64 },

    /// The model answered, but not with the JSON shape we asked for.
    #[error("Malformed model response: {detail}")]
    MalformedResponse { detail: String },

    /// The document store write failed.
    #[error("Persistence failed: {detail}")]
    Persistence { detail: String },

    /// The spreadsheet append failed.
    #[error("Spreadsheet append failed: {detail}")]
    Spreadsheet { detail: String },
}

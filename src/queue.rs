//! File Queue: uploaded documents and their per-file lifecycle.
//!
//! Each [`ScannedFile`] moves along independent status axes:
//!
//! ```text
//! status:        Pending ──▶ Processing ──▶ Completed{data}
//!                   ▲                  └──▶ Error{message}
//!                   └──────── reset ◀───────────┘
//!
//! sync / sheet:  Unsynced ──▶ Syncing ──▶ Synced
//!                    │               └──▶ Failed{reason}
//!                    └──── (extraction failed) ──▶ Failed{reason}
//! ```
//!
//! Extracted data lives inside `Completed`, so a file cannot carry data in
//! any other state. Transitions are methods that check the current state and
//! return [`FieldScanError::InvalidTransition`] for anything the diagram does
//! not allow. Only the orchestrator drives them.

use crate::error::FieldScanError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Extracted values keyed by region name.
pub type ExtractedData = BTreeMap<String, String>;

/// Opaque identifier of a [`ScannedFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Preview ──────────────────────────────────────────────────────────────

/// Raster formats a preview can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    /// Sniff the format from magic bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }
}

/// The renderable image of a document: encoded PNG/JPEG bytes.
///
/// Bytes are shared, so cloning a file (e.g. for a progress snapshot) does
/// not copy the image.
#[derive(Clone)]
pub struct Preview {
    bytes: Arc<[u8]>,
    kind: ImageKind,
}

impl Preview {
    /// Wrap encoded image bytes; `None` if they are not PNG or JPEG.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Option<Self> {
        let bytes = bytes.into();
        let kind = ImageKind::detect(&bytes)?;
        Some(Self { bytes, kind })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }
}

impl fmt::Debug for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preview")
            .field("kind", &self.kind)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

// ── Status axes ──────────────────────────────────────────────────────────

/// Processing status of a file.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Pending,
    Processing,
    Completed { data: ExtractedData },
    Error { message: String },
}

impl FileStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
        }
    }
}

/// Status of one downstream sync target (document store or spreadsheet).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Unsynced,
    Syncing,
    Synced,
    Failed { reason: String },
}

impl SyncStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unsynced => "unsynced",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }
}

/// Which sync axis a transition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    /// The document store (persistence collaborator).
    Store,
    /// The spreadsheet (append-row collaborator).
    Sheet,
}

impl SyncTarget {
    fn axis(&self) -> &'static str {
        match self {
            Self::Store => "sync_status",
            Self::Sheet => "sheet_status",
        }
    }
}

// ── ScannedFile ──────────────────────────────────────────────────────────

/// One uploaded document and everything the pipeline has learned about it.
#[derive(Debug, Clone, Serialize)]
pub struct ScannedFile {
    id: FileId,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip)]
    preview: Preview,
    status: FileStatus,
    sync_status: SyncStatus,
    sheet_status: SyncStatus,
}

impl ScannedFile {
    /// A freshly uploaded file: pending, unsynced on both axes.
    pub fn new(name: impl Into<String>, preview: Preview) -> Self {
        Self {
            id: FileId::new(),
            name: name.into(),
            source: None,
            preview,
            status: FileStatus::Pending,
            sync_status: SyncStatus::Unsynced,
            sheet_status: SyncStatus::Unsynced,
        }
    }

    /// Remember where the file came from (path or URL).
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    /// Display name, also sent to the document store.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn preview(&self) -> &Preview {
        &self.preview
    }

    pub fn status(&self) -> &FileStatus {
        &self.status
    }

    pub fn sync_status(&self) -> &SyncStatus {
        &self.sync_status
    }

    pub fn sheet_status(&self) -> &SyncStatus {
        &self.sheet_status
    }

    /// Extracted data; `Some` exactly when the file is completed.
    pub fn extracted_data(&self) -> Option<&ExtractedData> {
        match &self.status {
            FileStatus::Completed { data } => Some(data),
            _ => None,
        }
    }

    /// The error message; `Some` exactly when the file is in error.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            FileStatus::Error { message } => Some(message),
            _ => None,
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(self.status, FileStatus::Processing)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, FileStatus::Completed { .. })
    }

    fn sync_axis(&self, target: SyncTarget) -> &SyncStatus {
        match target {
            SyncTarget::Store => &self.sync_status,
            SyncTarget::Sheet => &self.sheet_status,
        }
    }

    fn sync_axis_mut(&mut self, target: SyncTarget) -> &mut SyncStatus {
        match target {
            SyncTarget::Store => &mut self.sync_status,
            SyncTarget::Sheet => &mut self.sheet_status,
        }
    }

    fn invalid(&self, axis: &'static str, from: &'static str, to: &'static str) -> FieldScanError {
        FieldScanError::InvalidTransition {
            file: self.name.clone(),
            axis,
            from,
            to,
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// Any non-processing state → `Processing`.
    ///
    /// Starting over discards earlier data and resets both sync axes: a new
    /// extraction has not been synced anywhere yet.
    pub(crate) fn begin_processing(&mut self) -> Result<(), FieldScanError> {
        match self.status {
            FileStatus::Processing => Err(self.invalid("status", "processing", "processing")),
            FileStatus::Pending | FileStatus::Completed { .. } | FileStatus::Error { .. } => {
                self.status = FileStatus::Processing;
                self.sync_status = SyncStatus::Unsynced;
                self.sheet_status = SyncStatus::Unsynced;
                Ok(())
            }
        }
    }

    /// `Processing` → `Completed`.
    pub(crate) fn complete(&mut self, data: ExtractedData) -> Result<(), FieldScanError> {
        match self.status {
            FileStatus::Processing => {
                self.status = FileStatus::Completed { data };
                Ok(())
            }
            ref other => Err(self.invalid("status", other.label(), "completed")),
        }
    }

    /// `Processing` → `Error`.
    pub(crate) fn fail(&mut self, message: impl Into<String>) -> Result<(), FieldScanError> {
        match self.status {
            FileStatus::Processing => {
                self.status = FileStatus::Error {
                    message: message.into(),
                };
                Ok(())
            }
            ref other => Err(self.invalid("status", other.label(), "error")),
        }
    }

    /// `Unsynced` → `Syncing`; only for completed files.
    pub(crate) fn begin_sync(&mut self, target: SyncTarget) -> Result<(), FieldScanError> {
        let axis = target.axis();
        if !self.is_completed() {
            return Err(self.invalid(axis, self.sync_axis(target).label(), "syncing"));
        }
        match self.sync_axis(target) {
            SyncStatus::Unsynced => {
                *self.sync_axis_mut(target) = SyncStatus::Syncing;
                Ok(())
            }
            other => Err(self.invalid(axis, other.label(), "syncing")),
        }
    }

    /// `Syncing` → `Synced` or `Failed`.
    pub(crate) fn finish_sync(
        &mut self,
        target: SyncTarget,
        outcome: Result<(), String>,
    ) -> Result<(), FieldScanError> {
        match self.sync_axis(target) {
            SyncStatus::Syncing => {
                *self.sync_axis_mut(target) = match outcome {
                    Ok(()) => SyncStatus::Synced,
                    Err(reason) => SyncStatus::Failed { reason },
                };
                Ok(())
            }
            other => {
                let to = if outcome.is_ok() { "synced" } else { "failed" };
                Err(self.invalid(target.axis(), other.label(), to))
            }
        }
    }

    /// `Unsynced` → `Failed` when there is nothing to sync because
    /// extraction failed.
    pub(crate) fn skip_sync(
        &mut self,
        target: SyncTarget,
        reason: impl Into<String>,
    ) -> Result<(), FieldScanError> {
        let axis = target.axis();
        if !matches!(self.status, FileStatus::Error { .. }) {
            return Err(self.invalid(axis, self.sync_axis(target).label(), "failed"));
        }
        match self.sync_axis(target) {
            SyncStatus::Unsynced => {
                *self.sync_axis_mut(target) = SyncStatus::Failed {
                    reason: reason.into(),
                };
                Ok(())
            }
            other => Err(self.invalid(axis, other.label(), "failed")),
        }
    }

    /// Back to a freshly uploaded state. Callers check `is_processing` first.
    fn reset(&mut self) {
        self.status = FileStatus::Pending;
        self.sync_status = SyncStatus::Unsynced;
        self.sheet_status = SyncStatus::Unsynced;
    }
}

// ── FileQueue ────────────────────────────────────────────────────────────

/// Result of an operator edit against the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    /// The file is mid-pipeline; the request was ignored.
    Busy,
    NotFound,
}

/// Per-status counts for a results view header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

/// Ordered collection of [`ScannedFile`]s, mutated in place by id.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct FileQueue {
    files: Vec<ScannedFile>,
}

impl FileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScannedFile> {
        self.files.iter()
    }

    pub fn files(&self) -> &[ScannedFile] {
        &self.files
    }

    pub fn get(&self, id: FileId) -> Option<&ScannedFile> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn first(&self) -> Option<&ScannedFile> {
        self.files.first()
    }

    pub(crate) fn get_index_mut(&mut self, index: usize) -> Option<&mut ScannedFile> {
        self.files.get_mut(index)
    }

    /// Append files in order; returns their ids.
    pub fn enqueue(&mut self, files: impl IntoIterator<Item = ScannedFile>) -> Vec<FileId> {
        let start = self.files.len();
        self.files.extend(files);
        self.files[start..].iter().map(|f| f.id).collect()
    }

    /// Remove a file unless it is processing.
    ///
    /// A processing file is left alone and `Busy` is returned; this is not
    /// an error and records nothing on the file.
    pub fn remove(&mut self, id: FileId) -> EditOutcome {
        let Some(pos) = self.files.iter().position(|f| f.id == id) else {
            return EditOutcome::NotFound;
        };
        if self.files[pos].is_processing() {
            return EditOutcome::Busy;
        }
        self.files.remove(pos);
        EditOutcome::Applied
    }

    /// Return a settled file to pending so the next run extracts it again.
    pub fn reset(&mut self, id: FileId) -> EditOutcome {
        match self.files.iter_mut().find(|f| f.id == id) {
            None => EditOutcome::NotFound,
            Some(f) if f.is_processing() => EditOutcome::Busy,
            Some(f) => {
                f.reset();
                EditOutcome::Applied
            }
        }
    }

    /// [`reset`](Self::reset) every file that is not processing.
    pub fn reset_all(&mut self) -> usize {
        let mut n = 0;
        for f in self.files.iter_mut().filter(|f| !f.is_processing()) {
            f.reset();
            n += 1;
        }
        n
    }

    /// Return files stuck in `Processing` to pending.
    ///
    /// A run only leaves a file processing if it was dropped mid-file; call
    /// this once no run is active.
    pub fn recover_interrupted(&mut self) -> usize {
        let mut n = 0;
        for f in self.files.iter_mut().filter(|f| f.is_processing()) {
            f.reset();
            n += 1;
        }
        n
    }

    pub fn count_by_status(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for f in &self.files {
            match f.status {
                FileStatus::Pending => counts.pending += 1,
                FileStatus::Processing => counts.processing += 1,
                FileStatus::Completed { .. } => counts.completed += 1,
                FileStatus::Error { .. } => counts.error += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Smallest byte string that sniffs as PNG; never decoded here.
    pub(crate) fn fake_preview() -> Preview {
        Preview::from_bytes(vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]).unwrap()
    }

    fn file(name: &str) -> ScannedFile {
        ScannedFile::new(name, fake_preview())
    }

    fn data(pairs: &[(&str, &str)]) -> ExtractedData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn image_kind_sniffing() {
        assert_eq!(ImageKind::detect(b"\x89PNG\r\n"), Some(ImageKind::Png));
        assert_eq!(ImageKind::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::detect(b"%PDF-1.7"), None);
        assert!(Preview::from_bytes(b"GIF89a".to_vec()).is_none());
    }

    #[test]
    fn new_file_is_pending_and_unsynced() {
        let f = file("a.png");
        assert_eq!(f.status(), &FileStatus::Pending);
        assert_eq!(f.sync_status(), &SyncStatus::Unsynced);
        assert_eq!(f.sheet_status(), &SyncStatus::Unsynced);
        assert!(f.extracted_data().is_none());
        assert!(f.error().is_none());
    }

    #[test]
    fn happy_path_transitions() {
        let mut f = file("a.png");
        f.begin_processing().unwrap();
        f.complete(data(&[("Total", "42.00")])).unwrap();
        assert_eq!(f.extracted_data().unwrap()["Total"], "42.00");

        f.begin_sync(SyncTarget::Store).unwrap();
        assert_eq!(f.sync_status(), &SyncStatus::Syncing);
        f.finish_sync(SyncTarget::Store, Ok(())).unwrap();
        assert!(f.sync_status().is_synced());
        assert_eq!(f.sheet_status(), &SyncStatus::Unsynced, "axes are independent");
    }

    #[test]
    fn data_only_exists_while_completed() {
        let mut f = file("a.png");
        f.begin_processing().unwrap();
        f.complete(data(&[("A", "1")])).unwrap();
        f.begin_processing().unwrap();
        assert!(f.extracted_data().is_none(), "re-processing drops old data");
        f.fail("Extraction failed").unwrap();
        assert!(f.extracted_data().is_none());
        assert_eq!(f.error(), Some("Extraction failed"));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut f = file("a.png");
        assert!(f.complete(ExtractedData::new()).is_err(), "pending → completed");
        assert!(f.fail("x").is_err(), "pending → error");
        assert!(f.begin_sync(SyncTarget::Store).is_err(), "sync before completion");

        f.begin_processing().unwrap();
        assert!(f.begin_processing().is_err(), "processing twice");
        assert!(f.finish_sync(SyncTarget::Sheet, Ok(())).is_err(), "finish before begin");
        assert!(f.skip_sync(SyncTarget::Store, "x").is_err(), "skip while processing");
    }

    #[test]
    fn skip_sync_after_extraction_failure() {
        let mut f = file("a.png");
        f.begin_processing().unwrap();
        f.fail("Extraction failed").unwrap();
        f.skip_sync(SyncTarget::Store, "extraction failed").unwrap();
        assert_eq!(f.sync_status().label(), "failed");
    }

    #[test]
    fn begin_processing_resets_sync_axes() {
        let mut f = file("a.png");
        f.begin_processing().unwrap();
        f.complete(ExtractedData::new()).unwrap();
        f.begin_sync(SyncTarget::Store).unwrap();
        f.finish_sync(SyncTarget::Store, Err("HTTP 500".into())).unwrap();

        f.begin_processing().unwrap();
        assert_eq!(f.sync_status(), &SyncStatus::Unsynced);
    }

    #[test]
    fn enqueue_preserves_order() {
        let mut q = FileQueue::new();
        let ids = q.enqueue(vec![file("a"), file("b")]);
        let more = q.enqueue(vec![file("c")]);
        assert_eq!(ids.len(), 2);
        assert_eq!(more.len(), 1);
        let names: Vec<_> = q.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(q.get(more[0]).unwrap().name(), "c");
    }

    #[test]
    fn remove_is_ignored_while_processing() {
        let mut q = FileQueue::new();
        let ids = q.enqueue(vec![file("a"), file("b")]);
        q.get_index_mut(0).unwrap().begin_processing().unwrap();

        assert_eq!(q.remove(ids[0]), EditOutcome::Busy);
        assert_eq!(q.len(), 2);
        assert!(q.get(ids[0]).unwrap().is_processing());
        assert!(q.get(ids[0]).unwrap().error().is_none());

        assert_eq!(q.remove(ids[1]), EditOutcome::Applied);
        assert_eq!(q.len(), 1);
        assert_eq!(q.remove(ids[1]), EditOutcome::NotFound);
    }

    #[test]
    fn reset_returns_settled_files_to_pending() {
        let mut q = FileQueue::new();
        let ids = q.enqueue(vec![file("a"), file("b")]);
        {
            let f = q.get_index_mut(0).unwrap();
            f.begin_processing().unwrap();
            f.complete(data(&[("A", "1")])).unwrap();
        }
        q.get_index_mut(1).unwrap().begin_processing().unwrap();

        assert_eq!(q.reset(ids[0]), EditOutcome::Applied);
        assert_eq!(q.get(ids[0]).unwrap().status(), &FileStatus::Pending);
        assert_eq!(q.reset(ids[1]), EditOutcome::Busy);
        assert_eq!(q.reset_all(), 1);
        assert_eq!(q.count_by_status().processing, 1);

        assert_eq!(q.recover_interrupted(), 1);
        assert_eq!(q.count_by_status().pending, 2);
    }

    #[test]
    fn status_serialises_as_tagged_state() {
        let mut f = file("a.png");
        f.begin_processing().unwrap();
        f.complete(data(&[("Total", "9")])).unwrap();
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["status"]["state"], "completed");
        assert_eq!(json["status"]["data"]["Total"], "9");
        assert_eq!(json["sync_status"]["state"], "unsynced");
        assert!(json.get("preview").is_none());
    }
}

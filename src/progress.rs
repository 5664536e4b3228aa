//! Progress observation for batch runs.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to see every
//! status transition the moment the orchestrator makes it. A results view
//! can render live progress from these calls alone.
//!
//! Callers that prefer a `Stream` can use [`channel`], which forwards every
//! callback into an unbounded Tokio channel.
//!
//! # Example
//!
//! ```rust
//! use fieldscan::{BatchProgressCallback, ScannedFile};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountTransitions(AtomicUsize);
//!
//! impl BatchProgressCallback for CountTransitions {
//!     fn on_file_update(&self, _index: usize, _total: usize, _file: &ScannedFile) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::orchestrator::BatchSummary;
use crate::queue::{FileId, ScannedFile};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// Called by the orchestrator as it drives each file.
///
/// Files are processed one at a time, so calls never overlap; the trait is
/// still `Send + Sync` so implementations can be shared with other tasks.
/// All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, before the first file is looked at.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called after every transition of any status axis of a file.
    ///
    /// # Arguments
    /// * `index`: 0-based position in the queue
    /// * `total`: queue length
    /// * `file`: the file in its new state
    fn on_file_update(&self, index: usize, total: usize, file: &ScannedFile) {
        let _ = (index, total, file);
    }

    /// Called when the skip rule passes over an already settled file.
    fn on_file_skipped(&self, index: usize, total: usize, file: &ScannedFile) {
        let _ = (index, total, file);
    }

    /// Called once after the last file has settled.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

// ── Stream adapter ───────────────────────────────────────────────────────

/// One observation forwarded by [`ChannelProgressCallback`].
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started { total: usize },
    FileUpdated {
        index: usize,
        total: usize,
        file: ScannedFile,
    },
    FileSkipped { index: usize, id: FileId },
    Finished(BatchSummary),
}

/// A boxed stream of batch events.
pub type BatchEventStream = Pin<Box<dyn Stream<Item = BatchEvent> + Send>>;

/// Forwards callbacks into a channel; see [`channel`].
pub struct ChannelProgressCallback {
    tx: mpsc::UnboundedSender<BatchEvent>,
}

impl ChannelProgressCallback {
    fn send(&self, event: BatchEvent) {
        // The receiver going away just means nobody is watching any more.
        let _ = self.tx.send(event);
    }
}

impl BatchProgressCallback for ChannelProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.send(BatchEvent::Started { total: total_files });
    }

    fn on_file_update(&self, index: usize, total: usize, file: &ScannedFile) {
        self.send(BatchEvent::FileUpdated {
            index,
            total,
            file: file.clone(),
        });
    }

    fn on_file_skipped(&self, index: usize, _total: usize, file: &ScannedFile) {
        self.send(BatchEvent::FileSkipped {
            index,
            id: file.id(),
        });
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.send(BatchEvent::Finished(summary.clone()));
    }
}

/// Create a callback and the stream of events it produces.
///
/// The stream ends when the callback (and every clone of the `Arc`) is
/// dropped, which normally happens when the `BatchConfig` holding it goes.
pub fn channel() -> (ProgressCallback, BatchEventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ProgressCallback = Arc::new(ChannelProgressCallback { tx });
    (callback, Box::pin(UnboundedReceiverStream::new(rx)))
}

//! # fieldscan
//!
//! Pull named fields out of batches of scanned documents with a Vision
//! Language Model (VLM).
//!
//! ## Why this crate?
//!
//! OCR gives you every word on the page; an operator wants *the invoice
//! number, the date and the total*, the same fields from every document of a
//! kind. Here the operator draws those fields once on a sample page as
//! percentage rectangles (so they survive any display size). Each document
//! is then sent to a VLM together with that list, and the answers land in a
//! table, a document store and optionally a spreadsheet.
//!
//! ## Pipeline Overview
//!
//! ```text
//! uploads
//!  │
//!  ├─ 1. Input     PNG / JPEG (PDF page 1 with `pdf`) → pending file
//!  ├─ 2. Fields    drawn (geometry), loaded from a template, or detected
//!  ├─ 3. Encode    cap size → PNG → base64 ImageData (spawn_blocking)
//!  ├─ 4. Extract   one VLM call per file → { field name: value }
//!  ├─ 5. Persist   document store, per-file sync status
//!  ├─ 6. Sheet     one aligned row per completed file
//!  └─ 7. Export    table of completed files, columns in field order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fieldscan::{pipeline::input, project, Batch, BatchConfig, FieldRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = FieldRegistry::load("invoice-fields.json").await?;
//!     let mut batch = Batch::with_registry(registry);
//!     batch.enqueue(vec![input::load_file("scan-01.png", 2000, 30).await?]);
//!
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let summary = batch.process(&BatchConfig::default()).await?;
//!     eprintln!("{} completed, {} failed", summary.completed, summary.failed);
//!
//!     let table = project(batch.queue(), batch.registry());
//!     println!("{}", serde_json::to_string_pretty(&table)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fieldscan` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `pdf`   | off     | Accept PDF uploads, rendering page 1 through pdfium |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod geometry;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod queue;
pub mod registry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{Batch, BatchId};
pub use config::{BatchConfig, BatchConfigBuilder};
pub use error::{FieldScanError, StageError};
pub use export::{project, row_for, ExportRow, ExportTable};
pub use geometry::{
    BoundingBox, GeometryEngine, PercentPoint, PercentRect, PixelRect, PointerPosition,
    MIN_REGION_PERCENT,
};
pub use orchestrator::{process_all_files, BatchSummary};
pub use pipeline::detect::{DetectedRegion, RegionDetector, VlmDetector};
pub use pipeline::extract::{Extractor, VlmExtractor};
pub use pipeline::persist::{Persister, RestPersister};
pub use pipeline::sheet::{GoogleSheetsSink, SpreadsheetSink, SpreadsheetSync, SpreadsheetTarget};
pub use progress::{BatchEvent, BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use queue::{
    EditOutcome, ExtractedData, FileId, FileQueue, FileStatus, ImageKind, Preview, ScannedFile,
    StatusCounts, SyncStatus,
};
pub use registry::{FieldRegistry, Region, RegionId};

//! Batch orchestration: drive every eligible file through the pipeline.
//!
//! ## Per-file flow
//!
//! ```text
//! skip? ──▶ processing ──▶ encode ──▶ extract ──▶ completed ──▶ persist ──▶ sheet
//!                                        │
//!                                        └──▶ error ──▶ sync axes failed
//! ```
//!
//! Files run strictly one after another, in queue order. A failing file is
//! marked and the loop moves on; nothing one file does can abort the batch.
//! Every status change is pushed to the progress callback immediately, so a
//! results view never lags behind the queue.
//!
//! ## Skip rule
//!
//! A file is skipped when it is completed *and* synced on every configured
//! target. Completed files still unsynced somewhere are re-extracted from
//! scratch, which is what makes a plain re-run the way to retry a failed
//! store or spreadsheet write.

use crate::batch::{Batch, BatchId};
use crate::config::BatchConfig;
use crate::error::{FieldScanError, StageError};
use crate::export::row_for;
use crate::pipeline::encode::encode_preview;
use crate::pipeline::extract::{Extractor, VlmExtractor};
use crate::queue::{ExtractedData, ScannedFile, SyncTarget};
use crate::registry::Region;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Totals for one run, reported to the progress callback and returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Files in the queue when the run started.
    pub total: usize,
    /// Files the skip rule passed over.
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
    /// Document-store writes that succeeded / failed.
    pub synced: usize,
    pub sync_failed: usize,
    /// Spreadsheet appends that succeeded / failed.
    pub sheet_appended: usize,
    pub sheet_failed: usize,
    pub duration_ms: u64,
}

/// Process every eligible file of `batch`.
///
/// Returns `Err` only before any file is touched (no regions, no usable
/// extractor) or if a status transition is rejected, which would mean the
/// queue was edited behind the orchestrator's back. Per-file failures are
/// recorded on the files and counted in the summary.
pub async fn process_all_files(
    batch: &mut Batch,
    config: &BatchConfig,
) -> Result<BatchSummary, FieldScanError> {
    let start = Instant::now();

    // ── Step 1: Preconditions ────────────────────────────────────────────
    if batch.registry().is_empty() {
        return Err(FieldScanError::NoRegions);
    }

    // ── Step 2: Snapshot the schema and resolve collaborators ────────────
    let regions = batch.registry().snapshot();
    let extractor: Arc<dyn Extractor> = match config.extractor {
        Some(ref e) => Arc::clone(e),
        None => Arc::new(VlmExtractor::from_config(config)?),
    };
    let run = Run {
        batch_id: batch.id(),
        hints: batch.ai_hints().map(str::to_string),
        regions,
        extractor,
        config,
        total: batch.queue().len(),
    };

    info!(
        "Batch {}: {} files, {} fields",
        run.batch_id,
        run.total,
        run.regions.len()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(run.total);
    }

    // ── Step 3: Drive each file in order ─────────────────────────────────
    let mut summary = BatchSummary {
        total: run.total,
        ..Default::default()
    };
    for index in 0..run.total {
        let file = batch
            .queue_mut()
            .get_index_mut(index)
            .ok_or_else(|| FieldScanError::Internal(format!("queue shrank below {index}")))?;

        if let Some(reason) = skip_reason(file, config) {
            debug!("Skipping '{}': {}", file.name(), reason);
            summary.skipped += 1;
            if let Some(ref cb) = config.progress_callback {
                cb.on_file_skipped(index, run.total, file);
            }
            continue;
        }

        run.process_file(index, file, &mut summary).await?;
    }

    // ── Step 4: Report ───────────────────────────────────────────────────
    summary.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Batch {} done: {} completed, {} failed, {} skipped in {}ms",
        run.batch_id, summary.completed, summary.failed, summary.skipped, summary.duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(&summary);
    }
    Ok(summary)
}

/// Why a file is left alone this run, if it is.
fn skip_reason(file: &ScannedFile, config: &BatchConfig) -> Option<&'static str> {
    if file.is_processing() {
        return Some("still marked processing from an interrupted run");
    }
    let settled = file.is_completed()
        && (!config.has_store() || file.sync_status().is_synced())
        && (!config.has_spreadsheet() || file.sheet_status().is_synced());
    settled.then_some("completed and synced")
}

/// Give every region exactly one entry; drop keys no region asked for.
fn cover_all_regions(mut raw: ExtractedData, regions: &[Region]) -> ExtractedData {
    let data: ExtractedData = regions
        .iter()
        .map(|r| {
            let value = raw.remove(r.name()).unwrap_or_default();
            (r.name().to_string(), value)
        })
        .collect();
    if !raw.is_empty() {
        debug!("Ignoring {} unrequested keys: {:?}", raw.len(), raw.keys());
    }
    data
}

/// State shared by every file of one run.
struct Run<'a> {
    batch_id: BatchId,
    hints: Option<String>,
    regions: Vec<Region>,
    extractor: Arc<dyn Extractor>,
    config: &'a BatchConfig,
    total: usize,
}

impl Run<'_> {
    fn notify(&self, index: usize, file: &ScannedFile) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_file_update(index, self.total, file);
        }
    }

    async fn process_file(
        &self,
        index: usize,
        file: &mut ScannedFile,
        summary: &mut BatchSummary,
    ) -> Result<(), FieldScanError> {
        file.begin_processing()?;
        self.notify(index, file);

        match self.extract(file).await {
            Ok(raw) => {
                let data = cover_all_regions(raw, &self.regions);
                file.complete(data.clone())?;
                summary.completed += 1;
                info!("'{}' extracted ({} fields)", file.name(), data.len());
                self.notify(index, file);

                self.persist(index, file, &data, summary).await?;
                self.append_row(index, file, &data, summary).await?;
            }
            Err(e) => {
                warn!("'{}' failed: {}", file.name(), e);
                file.fail(e.to_string())?;
                summary.failed += 1;
                self.notify(index, file);

                let reason = "Extraction failed; nothing to sync";
                if self.config.has_store() {
                    file.skip_sync(SyncTarget::Store, reason)?;
                    self.notify(index, file);
                }
                if self.config.has_spreadsheet() {
                    file.skip_sync(SyncTarget::Sheet, reason)?;
                    self.notify(index, file);
                }
            }
        }
        Ok(())
    }

    async fn extract(&self, file: &ScannedFile) -> Result<ExtractedData, StageError> {
        let image = encode_preview(file.preview(), self.config.max_preview_pixels).await?;
        self.extractor
            .extract(&image, &self.regions, self.hints.as_deref())
            .await
    }

    async fn persist(
        &self,
        index: usize,
        file: &mut ScannedFile,
        data: &ExtractedData,
        summary: &mut BatchSummary,
    ) -> Result<(), FieldScanError> {
        let Some(ref persister) = self.config.persister else {
            return Ok(());
        };
        file.begin_sync(SyncTarget::Store)?;
        self.notify(index, file);

        let outcome = persister
            .persist(&self.batch_id, file.name(), data, &self.regions)
            .await;
        let outcome = settle("Document store", outcome);
        match outcome {
            Ok(()) => summary.synced += 1,
            Err(ref reason) => {
                warn!("'{}' not stored: {}", file.name(), reason);
                summary.sync_failed += 1;
            }
        }
        file.finish_sync(SyncTarget::Store, outcome)?;
        self.notify(index, file);
        Ok(())
    }

    async fn append_row(
        &self,
        index: usize,
        file: &mut ScannedFile,
        data: &ExtractedData,
        summary: &mut BatchSummary,
    ) -> Result<(), FieldScanError> {
        let Some(ref sheet) = self.config.spreadsheet else {
            return Ok(());
        };
        file.begin_sync(SyncTarget::Sheet)?;
        self.notify(index, file);

        let row = row_for(&self.regions, data);
        let outcome = settle("Spreadsheet", sheet.append(&row).await);
        match outcome {
            Ok(()) => summary.sheet_appended += 1,
            Err(ref reason) => {
                warn!("'{}' not appended: {}", file.name(), reason);
                summary.sheet_failed += 1;
            }
        }
        file.finish_sync(SyncTarget::Sheet, outcome)?;
        self.notify(index, file);
        Ok(())
    }
}

/// Collapse a collaborator's `Result<bool, _>`: only `Ok(true)` succeeds.
fn settle(target: &str, outcome: Result<bool, StageError>) -> Result<(), String> {
    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => Err(format!("{target} declined the write")),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PercentRect;

    fn region(name: &str) -> Region {
        Region::new(
            name,
            PercentRect {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            },
        )
    }

    #[test]
    fn cover_fills_missing_and_drops_extra() {
        let raw: ExtractedData = [
            ("Total".to_string(), "42.00".to_string()),
            ("Bogus".to_string(), "x".to_string()),
        ]
        .into();
        let data = cover_all_regions(raw, &[region("Invoice Number"), region("Total")]);
        assert_eq!(data.len(), 2);
        assert_eq!(data["Invoice Number"], "");
        assert_eq!(data["Total"], "42.00");
        assert!(!data.contains_key("Bogus"));
    }

    #[test]
    fn settle_treats_false_as_failure() {
        assert_eq!(settle("Store", Ok(true)), Ok(()));
        assert_eq!(
            settle("Store", Ok(false)),
            Err("Store declined the write".to_string())
        );
        let err = settle(
            "Store",
            Err(StageError::Persistence {
                detail: "HTTP 503".into(),
            }),
        )
        .unwrap_err();
        assert!(err.contains("HTTP 503"));
    }

    #[test]
    fn skip_rule_without_targets() {
        let config = BatchConfig::default();
        let mut f = ScannedFile::new("a.png", crate::queue::tests::fake_preview());
        assert!(skip_reason(&f, &config).is_none(), "pending runs");
        f.begin_processing().unwrap();
        assert!(skip_reason(&f, &config).is_some(), "stuck file is left alone");
        f.complete(ExtractedData::new()).unwrap();
        assert!(skip_reason(&f, &config).is_some(), "completed, no targets");
    }
}

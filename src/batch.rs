//! A batch: one extraction schema, the operator's hints, and the files to run.

use crate::config::BatchConfig;
use crate::error::FieldScanError;
use crate::orchestrator::{process_all_files, BatchSummary};
use crate::pipeline::detect::{RegionDetector, VlmDetector};
use crate::pipeline::encode::encode_preview;
use crate::queue::{FileId, FileQueue, ScannedFile};
use crate::registry::FieldRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Identifier sent with every persisted record so a store can group them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session state for one batch of documents.
///
/// The registry and hints are edited freely between runs; a run borrows the
/// whole batch mutably, so neither can change while files are processing.
///
/// Cloning starts a new session: the clone gets its own [`BatchId`], so its
/// records never mix with the original's in a document store.
#[derive(Debug, Default)]
pub struct Batch {
    id: BatchId,
    registry: FieldRegistry,
    ai_hints: Option<String>,
    queue: FileQueue,
}

impl Clone for Batch {
    fn clone(&self) -> Self {
        Self {
            id: BatchId::new(),
            registry: self.registry.clone(),
            ai_hints: self.ai_hints.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing schema (e.g. a loaded template).
    pub fn with_registry(registry: FieldRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FieldRegistry {
        &mut self.registry
    }

    pub fn queue(&self) -> &FileQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut FileQueue {
        &mut self.queue
    }

    /// Free-text notes passed to every extraction and detection request.
    pub fn ai_hints(&self) -> Option<&str> {
        self.ai_hints.as_deref()
    }

    /// Set the hints; blank text clears them.
    pub fn set_ai_hints(&mut self, hints: impl Into<String>) {
        let hints = hints.into();
        self.ai_hints = if hints.trim().is_empty() {
            None
        } else {
            Some(hints)
        };
    }

    pub fn enqueue(&mut self, files: impl IntoIterator<Item = ScannedFile>) -> Vec<FileId> {
        self.queue.enqueue(files)
    }

    /// Run every eligible file through the pipeline.
    pub async fn process(&mut self, config: &BatchConfig) -> Result<BatchSummary, FieldScanError> {
        process_all_files(self, config).await
    }

    /// [`seed_regions`](Self::seed_regions) with the configured detector, or
    /// a VLM detector built from the provider settings.
    pub async fn seed_regions_with(&mut self, config: &BatchConfig) -> Result<usize, FieldScanError> {
        let detector: Arc<dyn RegionDetector> = match config.detector {
            Some(ref d) => Arc::clone(d),
            None => Arc::new(VlmDetector::from_config(config)?),
        };
        self.seed_regions(detector.as_ref(), config.max_preview_pixels)
            .await
    }

    /// Propose fields from the first queued file.
    ///
    /// Does nothing (returns 0) unless the registry is empty and a file is
    /// queued. Proposed rectangles are cropped to the image (those left
    /// with no area are dropped), names are made unique, and the first new
    /// region becomes the active one.
    pub async fn seed_regions(
        &mut self,
        detector: &dyn RegionDetector,
        max_preview_pixels: u32,
    ) -> Result<usize, FieldScanError> {
        if !self.registry.is_empty() {
            return Ok(0);
        }
        let Some(first) = self.queue.first() else {
            return Ok(0);
        };
        let file_name = first.name().to_string();

        let detection_failed = |source| FieldScanError::DetectionFailed {
            file: file_name.clone(),
            source,
        };
        let image = encode_preview(first.preview(), max_preview_pixels)
            .await
            .map_err(detection_failed)?;
        let proposed = detector
            .detect(&image, self.ai_hints.as_deref())
            .await
            .map_err(detection_failed)?;

        let mut first_id = None;
        for region in &proposed {
            let rect = region.rect.clamped();
            if !(rect.width > 0.0 && rect.height > 0.0) {
                warn!("Dropping detected field '{}': empty after cropping", region.name);
                continue;
            }
            let id = self.registry.add_unique(&region.name, rect);
            first_id.get_or_insert(id);
        }
        if let Some(id) = first_id {
            self.registry.select(id)?;
        }

        let added = self.registry.len();
        info!("Seeded {} fields from '{}'", added, file_name);
        Ok(added)
    }
}

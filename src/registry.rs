//! Field Registry: the ordered, named set of regions shared by a whole batch.
//!
//! Iteration order is creation order and is significant: it fixes the column
//! order of the export table and the cell order of spreadsheet rows.
//! Names are unique within a registry, so the registry can hand extracted
//! values back by name.

use crate::error::FieldScanError;
use crate::geometry::PercentRect;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque identifier of a [`Region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(Uuid);

impl RegionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named rectangle over the document, in percent of the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(default)]
    id: RegionId,
    name: String,
    #[serde(flatten)]
    rect: PercentRect,
}

impl Region {
    pub fn new(name: impl Into<String>, rect: PercentRect) -> Self {
        Self {
            id: RegionId::new(),
            name: name.into(),
            rect,
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rect(&self) -> &PercentRect {
        &self.rect
    }
}

/// The current set of regions plus the operator's active selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldRegistry {
    regions: Vec<Region>,
    #[serde(skip)]
    active: Option<RegionId>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// Region names in registry order.
    pub fn names(&self) -> Vec<String> {
        self.regions.iter().map(|r| r.name.clone()).collect()
    }

    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// The active (selected) region id, if any.
    pub fn active(&self) -> Option<RegionId> {
        self.active
    }

    pub fn active_region(&self) -> Option<&Region> {
        self.active.and_then(|id| self.get(id))
    }

    /// A copy of the regions, taken at the start of a batch run.
    pub fn snapshot(&self) -> Vec<Region> {
        self.regions.clone()
    }

    /// Append a region under an explicit name.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        rect: PercentRect,
    ) -> Result<RegionId, FieldScanError> {
        let name = validate_name(&name.into())?;
        if self.find_by_name(&name).is_some() {
            return Err(FieldScanError::DuplicateRegionName { name });
        }
        let region = Region::new(name, rect);
        let id = region.id;
        self.regions.push(region);
        Ok(id)
    }

    /// Append a region named `Field N`, N being the next unused ordinal.
    pub fn add_auto(&mut self, rect: PercentRect) -> RegionId {
        let region = Region::new(self.next_field_name(), rect);
        let id = region.id;
        debug!("Created '{}' at {:?}", region.name, region.rect);
        self.regions.push(region);
        id
    }

    /// Append a region, suffixing the name (`Total (2)`) if it is taken.
    ///
    /// Used for model-proposed regions, whose names we do not control.
    pub fn add_unique(&mut self, name: &str, rect: PercentRect) -> RegionId {
        let base = match validate_name(name) {
            Ok(n) => n,
            Err(_) => self.next_field_name(),
        };
        let name = self.unique_name(&base);
        let region = Region::new(name, rect);
        let id = region.id;
        self.regions.push(region);
        id
    }

    /// The name [`add_auto`](Self::add_auto) would use next.
    pub fn next_field_name(&self) -> String {
        let mut n = self.regions.len() + 1;
        loop {
            let candidate = format!("Field {n}");
            if self.find_by_name(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    fn unique_name(&self, base: &str) -> String {
        if self.find_by_name(base).is_none() {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base} ({n})"))
            .find(|candidate| self.find_by_name(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    /// Make `id` the active region.
    pub fn select(&mut self, id: RegionId) -> Result<(), FieldScanError> {
        if self.get(id).is_none() {
            return Err(FieldScanError::RegionNotFound(id.to_string()));
        }
        self.active = Some(id);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.active = None;
    }

    /// Rename a region. The new name is trimmed and must be unused.
    pub fn rename(&mut self, id: RegionId, name: &str) -> Result<(), FieldScanError> {
        let name = validate_name(name)?;
        if self.regions.iter().any(|r| r.name == name && r.id != id) {
            return Err(FieldScanError::DuplicateRegionName { name });
        }
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| FieldScanError::RegionNotFound(id.to_string()))?;
        region.name = name;
        Ok(())
    }

    /// Remove a region; clears the selection if it was the active one.
    pub fn delete(&mut self, id: RegionId) -> Result<Region, FieldScanError> {
        let pos = self
            .regions
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| FieldScanError::RegionNotFound(id.to_string()))?;
        if self.active == Some(id) {
            self.active = None;
        }
        Ok(self.regions.remove(pos))
    }

    // ── Templates ────────────────────────────────────────────────────────

    /// Load a registry saved by [`save`](Self::save).
    ///
    /// Duplicate ids and duplicate or empty names (after trimming) are
    /// rejected; a template that would break name uniqueness cannot be used
    /// as an extraction schema.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FieldScanError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            FieldScanError::TemplateReadFailed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        })?;
        let registry = Self::from_json(&text).map_err(|detail| {
            FieldScanError::TemplateReadFailed {
                path: path.to_path_buf(),
                detail,
            }
        })?;
        info!("Loaded {} fields from {}", registry.len(), path.display());
        Ok(registry)
    }

    /// Write the registry as pretty JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), FieldScanError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FieldScanError::Internal(format!("serialise fields: {e}")))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| FieldScanError::TemplateWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!("Saved {} fields to {}", self.len(), path.display());
        Ok(())
    }

    /// Names are trimmed as [`rename`](Self::rename) trims them before the
    /// uniqueness checks run.
    fn from_json(text: &str) -> Result<Self, String> {
        let mut registry: Self = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for region in &mut registry.regions {
            region.name = validate_name(&region.name)
                .map_err(|_| "field with an empty name".to_string())?;
            if !names.insert(region.name.clone()) {
                return Err(format!("duplicate field name '{}'", region.name));
            }
            if !ids.insert(region.id) {
                return Err(format!("duplicate field id {}", region.id));
            }
        }
        Ok(registry)
    }
}

fn validate_name(name: &str) -> Result<String, FieldScanError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(FieldScanError::InvalidRegionName);
    }
    Ok(trimmed.to_string())
}

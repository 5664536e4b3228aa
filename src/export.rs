//! Export projection: completed files as a table, one column per field.
//!
//! A pure read of the queue and registry. Column order is registry order;
//! the same alignment produces spreadsheet rows, so an exported table and
//! the rows appended during a run always line up.

use crate::queue::{ExtractedData, FileId, FileQueue};
use crate::registry::{FieldRegistry, Region};
use serde::Serialize;

/// Cell value for a region the file has no entry for.
pub const EMPTY_CELL: &str = "";

/// One completed file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub file_id: FileId,
    pub file_name: String,
    pub cells: Vec<String>,
}

/// Completed files projected onto the current field list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportTable {
    pub columns: Vec<String>,
    pub rows: Vec<ExportRow>,
}

impl ExportTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Build the table from the queue's completed files, in queue order.
pub fn project(queue: &FileQueue, registry: &FieldRegistry) -> ExportTable {
    let regions = registry.regions();
    let rows = queue
        .iter()
        .filter_map(|f| {
            f.extracted_data().map(|data| ExportRow {
                file_id: f.id(),
                file_name: f.name().to_string(),
                cells: row_for(regions, data),
            })
        })
        .collect();
    ExportTable {
        columns: registry.names(),
        rows,
    }
}

/// Values aligned to `regions`, missing ones as [`EMPTY_CELL`].
pub fn row_for(regions: &[Region], data: &ExtractedData) -> Vec<String> {
    regions
        .iter()
        .map(|r| {
            data.get(r.name())
                .cloned()
                .unwrap_or_else(|| EMPTY_CELL.to_string())
        })
        .collect()
}

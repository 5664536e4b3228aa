//! Spreadsheet collaborator: append one row per completed file.
//!
//! Rows are aligned to registry order by [`crate::export::row_for`] before
//! they get here; sinks only ship them.

use crate::error::StageError;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default Sheets API base.
pub const GOOGLE_SHEETS_API: &str = "https://sheets.googleapis.com";

/// Where rows go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadsheetTarget {
    pub spreadsheet_id: String,
    /// A1 range whose table rows are appended to, e.g. `Sheet1!A1`.
    pub range: String,
}

impl SpreadsheetTarget {
    pub fn new(spreadsheet_id: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
        }
    }
}

/// Appends a row of cell values to a spreadsheet.
///
/// `Ok(false)` means the service declined; the orchestrator records it like
/// an error on the file's sheet axis.
#[async_trait]
pub trait SpreadsheetSink: Send + Sync {
    async fn append_row(
        &self,
        target: &SpreadsheetTarget,
        credential: &str,
        row: &[String],
    ) -> Result<bool, StageError>;
}

/// A configured spreadsheet destination: sink, target and credential.
#[derive(Clone)]
pub struct SpreadsheetSync {
    pub sink: Arc<dyn SpreadsheetSink>,
    pub target: SpreadsheetTarget,
    pub credential: String,
}

impl SpreadsheetSync {
    pub fn new(
        sink: Arc<dyn SpreadsheetSink>,
        target: SpreadsheetTarget,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            target,
            credential: credential.into(),
        }
    }

    pub async fn append(&self, row: &[String]) -> Result<bool, StageError> {
        self.sink
            .append_row(&self.target, &self.credential, row)
            .await
    }
}

impl fmt::Debug for SpreadsheetSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpreadsheetSync")
            .field("target", &self.target)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// [`SpreadsheetSink`] for the Google Sheets `values:append` endpoint.
#[derive(Debug, Clone)]
pub struct GoogleSheetsSink {
    client: reqwest::Client,
    base: Url,
}

impl GoogleSheetsSink {
    pub fn new(timeout_secs: u64) -> Result<Self, StageError> {
        Self::with_base(GOOGLE_SHEETS_API, timeout_secs)
    }

    /// Point at a different API base (a proxy, or a local fake in tests).
    pub fn with_base(base: &str, timeout_secs: u64) -> Result<Self, StageError> {
        let base = Url::parse(base).map_err(|e| StageError::Spreadsheet {
            detail: format!("invalid API base '{base}': {e}"),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StageError::Spreadsheet {
                detail: e.to_string(),
            })?;
        Ok(Self { client, base })
    }

    /// `{base}/v4/spreadsheets/{id}/values/{range}:append?valueInputOption=USER_ENTERED`
    fn append_url(&self, target: &SpreadsheetTarget) -> Result<Url, StageError> {
        let range = format!("{}:append", target.range);
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StageError::Spreadsheet {
                detail: format!("API base '{}' cannot carry a path", self.base),
            })?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                target.spreadsheet_id.as_str(),
                "values",
                range.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        Ok(url)
    }
}

#[async_trait]
impl SpreadsheetSink for GoogleSheetsSink {
    async fn append_row(
        &self,
        target: &SpreadsheetTarget,
        credential: &str,
        row: &[String],
    ) -> Result<bool, StageError> {
        let url = self.append_url(target)?;
        let response = self
            .client
            .post(url)
            .bearer_auth(credential)
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .map_err(|e| StageError::Spreadsheet {
                detail: e.to_string(),
            })?;

        let status = response.status();
        debug!(
            "Append to {} ({}) → HTTP {}",
            target.spreadsheet_id, target.range, status
        );
        if status.is_success() {
            Ok(true)
        } else {
            Err(StageError::Spreadsheet {
                detail: format!("HTTP {status}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_url_layout() {
        let sink = GoogleSheetsSink::new(5).unwrap();
        let url = sink
            .append_url(&SpreadsheetTarget::new("abc123", "Sheet1!A1"))
            .unwrap();
        let s = url.as_str();
        assert!(
            s.starts_with("https://sheets.googleapis.com/v4/spreadsheets/abc123/values/"),
            "got {s}"
        );
        assert!(s.contains(":append"), "got {s}");
        assert!(s.ends_with("?valueInputOption=USER_ENTERED"), "got {s}");
    }

    #[test]
    fn base_with_path_prefix() {
        let sink = GoogleSheetsSink::with_base("http://localhost:8080/proxy/", 5).unwrap();
        let url = sink
            .append_url(&SpreadsheetTarget::new("id", "Data"))
            .unwrap();
        assert_eq!(url.path(), "/proxy/v4/spreadsheets/id/values/Data:append");
    }

    #[test]
    fn debug_redacts_credential() {
        let sync = SpreadsheetSync::new(
            Arc::new(GoogleSheetsSink::new(5).unwrap()),
            SpreadsheetTarget::new("id", "Sheet1"),
            "ya29.secret",
        );
        let dbg = format!("{sync:?}");
        assert!(!dbg.contains("ya29.secret"));
        assert!(dbg.contains("<redacted>"));
    }
}

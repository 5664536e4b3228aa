//! Persistence collaborator: store one completed file in a document store.

use crate::batch::BatchId;
use crate::error::StageError;
use crate::queue::ExtractedData;
use crate::registry::Region;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Writes a completed file's data to a document store.
///
/// `Ok(false)` means the store declined the write; the orchestrator treats
/// it exactly like an error.
#[async_trait]
pub trait Persister: Send + Sync {
    async fn persist(
        &self,
        batch_id: &BatchId,
        file_name: &str,
        data: &ExtractedData,
        regions: &[Region],
    ) -> Result<bool, StageError>;
}

/// The JSON body [`RestPersister`] sends.
#[derive(Debug, Serialize)]
pub struct PersistRecord<'a> {
    pub batch_id: &'a BatchId,
    pub file_name: &'a str,
    pub data: &'a ExtractedData,
    pub regions: &'a [Region],
}

/// [`Persister`] that POSTs each record to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct RestPersister {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RestPersister {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, StageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StageError::Persistence {
                detail: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Persister for RestPersister {
    async fn persist(
        &self,
        batch_id: &BatchId,
        file_name: &str,
        data: &ExtractedData,
        regions: &[Region],
    ) -> Result<bool, StageError> {
        let record = PersistRecord {
            batch_id,
            file_name,
            data,
            regions,
        };
        let mut request = self.client.post(&self.endpoint).json(&record);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| StageError::Persistence {
            detail: if e.is_timeout() {
                format!("request to {} timed out", self.endpoint)
            } else {
                e.to_string()
            },
        })?;

        let status = response.status();
        debug!("Persist '{}' → HTTP {}", file_name, status);
        if status.is_success() {
            Ok(true)
        } else {
            Err(StageError::Persistence {
                detail: format!("HTTP {status}"),
            })
        }
    }
}

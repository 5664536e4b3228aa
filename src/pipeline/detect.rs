//! Detection collaborator: propose fields for a document nobody has mapped.

use super::llm::{ask_vision, resolve_provider, LlmSettings, VisionStage};
use super::response::parse_detection;
use crate::config::BatchConfig;
use crate::error::{FieldScanError, StageError};
use crate::prompts::{detection_instruction, DETECTION_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ImageData, LLMProvider};
use std::sync::Arc;

pub use super::response::DetectedRegion;

/// Proposes named regions for a document image.
///
/// Proposals may be out of bounds or share names; the caller clamps and
/// de-duplicates them before they reach the registry.
#[async_trait]
pub trait RegionDetector: Send + Sync {
    async fn detect(
        &self,
        image: &ImageData,
        hints: Option<&str>,
    ) -> Result<Vec<DetectedRegion>, StageError>;
}

/// [`RegionDetector`] backed by a vision-language model.
pub struct VlmDetector {
    provider: Arc<dyn LLMProvider>,
    settings: LlmSettings,
}

impl VlmDetector {
    pub fn new(provider: Arc<dyn LLMProvider>, settings: LlmSettings) -> Self {
        Self { provider, settings }
    }

    pub fn from_config(config: &BatchConfig) -> Result<Self, FieldScanError> {
        Ok(Self::new(
            resolve_provider(config)?,
            LlmSettings::from_config(config),
        ))
    }
}

#[async_trait]
impl RegionDetector for VlmDetector {
    async fn detect(
        &self,
        image: &ImageData,
        hints: Option<&str>,
    ) -> Result<Vec<DetectedRegion>, StageError> {
        let reply = ask_vision(
            &self.provider,
            DETECTION_SYSTEM_PROMPT,
            &detection_instruction(hints),
            image,
            &self.settings,
            VisionStage::Detection,
        )
        .await?;
        parse_detection(&reply)
    }
}

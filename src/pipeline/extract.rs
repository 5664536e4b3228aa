//! Extraction collaborator: read field values off one document image.

use super::llm::{ask_vision, resolve_provider, LlmSettings, VisionStage};
use super::response::parse_extraction;
use crate::config::BatchConfig;
use crate::error::{FieldScanError, StageError};
use crate::prompts::{extraction_instruction, EXTRACTION_SYSTEM_PROMPT};
use crate::queue::ExtractedData;
use crate::registry::Region;
use async_trait::async_trait;
use edgequake_llm::{ImageData, LLMProvider};
use std::sync::Arc;

/// Reads the value inside each region of a document image.
///
/// Implementations return a map keyed by region name. Extra or missing keys
/// are tolerated; the orchestrator aligns the result with the regions it
/// asked for.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        image: &ImageData,
        regions: &[Region],
        hints: Option<&str>,
    ) -> Result<ExtractedData, StageError>;
}

/// [`Extractor`] backed by a vision-language model.
pub struct VlmExtractor {
    provider: Arc<dyn LLMProvider>,
    settings: LlmSettings,
    system_prompt: String,
}

impl VlmExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, settings: LlmSettings) -> Self {
        Self {
            provider,
            settings,
            system_prompt: EXTRACTION_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Build from a run configuration, resolving the provider chain.
    pub fn from_config(config: &BatchConfig) -> Result<Self, FieldScanError> {
        let provider = resolve_provider(config)?;
        let mut extractor = Self::new(provider, LlmSettings::from_config(config));
        if let Some(ref prompt) = config.system_prompt {
            extractor.system_prompt = prompt.clone();
        }
        Ok(extractor)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

#[async_trait]
impl Extractor for VlmExtractor {
    async fn extract(
        &self,
        image: &ImageData,
        regions: &[Region],
        hints: Option<&str>,
    ) -> Result<ExtractedData, StageError> {
        let instruction = extraction_instruction(regions, hints);
        let reply = ask_vision(
            &self.provider,
            &self.system_prompt,
            &instruction,
            image,
            &self.settings,
            VisionStage::Extraction,
        )
        .await?;
        parse_extraction(&reply)
    }
}

//! VLM interaction: provider resolution and the shared vision call.
//!
//! Extraction and detection both send "system prompt + one image + a short
//! instruction" and want the reply text back. This module owns that call;
//! prompt wording lives in [`crate::prompts`], reply parsing in
//! [`super::response`].
//!
//! ## No retries
//!
//! A file whose call fails is marked as an error and the operator re-runs
//! it. Each call is bounded by `api_timeout_secs` so one hung request
//! cannot stall the rest of the batch.

use crate::config::BatchConfig;
use crate::error::{FieldScanError, StageError};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// The call parameters shared by extraction and detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LlmSettings {
    pub temperature: f32,
    pub max_tokens: usize,
    pub api_timeout_secs: u64,
}

impl LlmSettings {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

/// Which collaborator is calling, for error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionStage {
    Extraction,
    Detection,
}

impl VisionStage {
    fn name(&self) -> &'static str {
        match self {
            Self::Extraction => "Extraction",
            Self::Detection => "Field detection",
        }
    }

    fn error(&self, detail: String) -> StageError {
        match self {
            Self::Extraction => StageError::Extraction { detail },
            Self::Detection => StageError::Detection { detail },
        }
    }
}

/// Send one image with a system prompt and instruction; return the reply.
///
/// The image goes in the user turn after the instruction text, the same
/// layout for every provider edgequake-llm supports.
pub async fn ask_vision(
    provider: &Arc<dyn LLMProvider>,
    system_prompt: &str,
    instruction: &str,
    image: &ImageData,
    settings: &LlmSettings,
    stage: VisionStage,
) -> Result<String, StageError> {
    let start = Instant::now();
    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user_with_images(instruction, vec![image.clone()]),
    ];
    let options = settings.options();

    let call = provider.chat(&messages, Some(&options));
    match timeout(Duration::from_secs(settings.api_timeout_secs), call).await {
        Ok(Ok(response)) => {
            debug!(
                "{}: {} input tokens, {} output tokens, {:?}",
                stage.name(),
                response.prompt_tokens,
                response.completion_tokens,
                start.elapsed()
            );
            Ok(response.content)
        }
        Ok(Err(e)) => {
            warn!("{} call failed: {}", stage.name(), e);
            Err(stage.error(e.to_string()))
        }
        Err(_) => {
            warn!(
                "{} call exceeded {}s",
                stage.name(),
                settings.api_timeout_secs
            );
            Err(StageError::Timeout {
                stage: stage.name().to_string(),
                secs: settings.api_timeout_secs,
            })
        }
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, FieldScanError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FieldScanError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    [`DEFAULT_MODEL`]; the factory reads the matching API key.
/// 3. **Environment pair** `FIELDSCAN_LLM_PROVIDER` + `FIELDSCAN_MODEL`,
///    both non-empty.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set, so operators holding several
///    keys get a predictable default.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &BatchConfig) -> Result<Arc<dyn LLMProvider>, FieldScanError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("FIELDSCAN_LLM_PROVIDER"),
        std::env::var("FIELDSCAN_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FieldScanError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let config = BatchConfig::builder()
            .temperature(0.3)
            .max_tokens(512)
            .api_timeout_secs(5)
            .build()
            .unwrap();
        let s = LlmSettings::from_config(&config);
        let opts = s.options();
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(512));
        assert_eq!(s.api_timeout_secs, 5);
    }

    #[test]
    fn stage_errors_are_classified() {
        assert!(matches!(
            VisionStage::Extraction.error("boom".into()),
            StageError::Extraction { .. }
        ));
        assert_eq!(
            VisionStage::Detection.error("boom".into()).to_string(),
            "Field detection failed: boom"
        );
    }
}

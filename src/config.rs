//! Configuration for batch runs.
//!
//! Everything that is not part of the batch's *data* (its id, fields, hints
//! and files live on [`crate::batch::Batch`]) is set here: how previews are
//! prepared, which model reads them, and which downstream targets receive
//! completed files. Collaborators are trait objects so tests, or callers with
//! their own document store, can plug in their own.
//!
//! Build via [`BatchConfig::builder()`] or use [`BatchConfig::default()`],
//! which extracts with an auto-detected LLM provider and syncs nowhere.

use crate::error::FieldScanError;
use crate::pipeline::detect::RegionDetector;
use crate::pipeline::extract::Extractor;
use crate::pipeline::persist::Persister;
use crate::pipeline::sheet::SpreadsheetSync;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Configuration for a batch run.
///
/// # Example
/// ```rust
/// use fieldscan::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .model("gpt-4.1-mini")
///     .max_preview_pixels(1600)
///     .build()
///     .unwrap();
/// assert!(!config.has_store());
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Longest edge, in pixels, of the image sent to the model. Default: 2000.
    ///
    /// Phone photos of invoices are often 4000 px and larger; the model does
    /// not read them better, it only costs more to upload them.
    pub max_preview_pixels: u32,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 (transcription, not creativity).
    pub temperature: f32,

    /// Maximum tokens per model reply. Default: 2048.
    pub max_tokens: usize,

    /// Per-call timeout for model requests, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom extraction system prompt. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// Extraction collaborator. If None, a VLM extractor is built from the
    /// provider settings above when a run starts.
    pub extractor: Option<Arc<dyn Extractor>>,

    /// Detection collaborator for seeding fields. If None, a VLM detector is
    /// built from the provider settings.
    pub detector: Option<Arc<dyn RegionDetector>>,

    /// Document store for completed files. None disables the sync stage.
    pub persister: Option<Arc<dyn Persister>>,

    /// Spreadsheet target for completed files. None disables the stage.
    pub spreadsheet: Option<SpreadsheetSync>,

    /// Observer for per-file transitions.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_preview_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 2048,
            api_timeout_secs: 60,
            system_prompt: None,
            extractor: None,
            detector: None,
            persister: None,
            spreadsheet: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("max_preview_pixels", &self.max_preview_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("extractor", &self.extractor.as_ref().map(|_| "<dyn Extractor>"))
            .field("detector", &self.detector.as_ref().map(|_| "<dyn RegionDetector>"))
            .field("persister", &self.persister.as_ref().map(|_| "<dyn Persister>"))
            .field("spreadsheet", &self.spreadsheet)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether completed files are written to a document store.
    pub fn has_store(&self) -> bool {
        self.persister.is_some()
    }

    /// Whether completed files are appended to a spreadsheet.
    pub fn has_spreadsheet(&self) -> bool {
        self.spreadsheet.is_some()
    }
}

/// Builder for [`BatchConfig`].
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl fmt::Debug for BatchConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.config, f)
    }
}

impl BatchConfigBuilder {
    pub fn max_preview_pixels(mut self, px: u32) -> Self {
        self.config.max_preview_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn RegionDetector>) -> Self {
        self.config.detector = Some(detector);
        self
    }

    pub fn persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.config.persister = Some(persister);
        self
    }

    pub fn spreadsheet(mut self, spreadsheet: SpreadsheetSync) -> Self {
        self.config.spreadsheet = Some(spreadsheet);
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, FieldScanError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(FieldScanError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(FieldScanError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if let Some(ref sheet) = c.spreadsheet {
            if sheet.target.spreadsheet_id.trim().is_empty() {
                return Err(FieldScanError::InvalidConfig(
                    "spreadsheet id must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

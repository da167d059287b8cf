//! Configuration for document ingestion.
//!
//! Every knob lives in [`IngestConfig`], built through
//! [`IngestConfigBuilder`]. Setters clamp obviously out-of-range values;
//! [`IngestConfigBuilder::build`] rejects combinations that cannot work
//! (an overlap as large as the chunk, a threshold outside `[0, 1]`).

use crate::error::IngestError;
use crate::pipeline::chunk::Chunker;
use crate::pipeline::gate::QualityGate;
use crate::pipeline::tier::{ComplexityTier, TierTable};
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Configuration for one ingest run.
///
/// # Example
/// ```rust
/// use forjador_ingest::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .quality_threshold(0.9)
///     .chunk_size(2000)
///     .chunk_overlap(200)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 2000);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Minimum overall quality score for a parse to be accepted. Default: 0.85.
    pub quality_threshold: f64,

    /// Fallback attempts allowed after the primary parser. Default: 2.
    pub max_retries: u32,

    /// Maximum chunk length in characters. Default: 3500.
    pub chunk_size: usize,

    /// Characters repeated from the end of one chunk at the start of the
    /// next. Must be smaller than `chunk_size`. Default: 250.
    pub chunk_overlap: usize,

    /// Documents processed concurrently by the batch entry points. Default: 4.
    pub concurrency: usize,

    /// Files larger than this are rejected. Default: 100 MB.
    pub max_file_size_mb: f64,

    /// Files with more lines than this are rejected. Default: 5000.
    pub max_line_count: usize,

    /// Route every document to this tier instead of classifying it.
    pub tier_override: Option<ComplexityTier>,

    /// Tier → parser routing. Default: the built-in eleven-tier table.
    pub tier_table: Arc<TierTable>,

    /// Vision model identifier, e.g. "gpt-4.1-nano". If None, the provider default.
    pub model: Option<String>,

    /// Vision provider name ("openai", "anthropic", "ollama", …).
    /// If None along with `provider`, the provider is taken from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed vision provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for vision calls. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens a vision call may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Per vision call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Longest side of a rasterised page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF pages sent to the vision parser, counted from the first. Default: 10.
    pub max_vision_pages: usize,

    /// Custom vision system prompt. If None, uses the built-in OCR prompt.
    pub system_prompt: Option<String>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Receives per-document and per-attempt events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.85,
            max_retries: 2,
            chunk_size: 3500,
            chunk_overlap: 250,
            concurrency: 4,
            max_file_size_mb: 100.0,
            max_line_count: 5000,
            tier_override: None,
            tier_table: TierTable::shared(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            api_timeout_secs: 60,
            max_rendered_pixels: 2000,
            max_vision_pages: 10,
            system_prompt: None,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("quality_threshold", &self.quality_threshold)
            .field("max_retries", &self.max_retries)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("concurrency", &self.concurrency)
            .field("max_file_size_mb", &self.max_file_size_mb)
            .field("max_line_count", &self.max_line_count)
            .field("tier_override", &self.tier_override)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_vision_pages", &self.max_vision_pages)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestProgressCallback>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    /// The quality gate described by this config.
    pub fn gate(&self) -> QualityGate {
        QualityGate::new(self.quality_threshold, self.max_retries)
    }

    /// The chunker described by this config.
    pub fn chunker(&self) -> Chunker {
        Chunker::new(self.chunk_size, self.chunk_overlap)
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn quality_threshold(mut self, threshold: f64) -> Self {
        self.config.quality_threshold = threshold;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size.max(1);
        self
    }

    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_file_size_mb(mut self, mb: f64) -> Self {
        self.config.max_file_size_mb = mb;
        self
    }

    pub fn max_line_count(mut self, n: usize) -> Self {
        self.config.max_line_count = n;
        self
    }

    pub fn tier_override(mut self, tier: ComplexityTier) -> Self {
        self.config.tier_override = Some(tier);
        self
    }

    pub fn tier_table(mut self, table: TierTable) -> Self {
        self.config.tier_table = Arc::new(table);
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
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_vision_pages(mut self, n: usize) -> Self {
        self.config.max_vision_pages = n.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if !(0.0..=1.0).contains(&c.quality_threshold) {
            return Err(IngestError::InvalidConfig(format!(
                "quality threshold must be within 0–1, got {}",
                c.quality_threshold
            )));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(IngestError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.max_file_size_mb.is_nan() || c.max_file_size_mb <= 0.0 {
            return Err(IngestError::InvalidConfig(format!(
                "max file size must be positive, got {} MB",
                c.max_file_size_mb
            )));
        }
        Ok(self.config)
    }
}

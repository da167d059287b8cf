//! Vision-model OCR parser.
//!
//! Images are sent as-is (downscaled when larger than
//! `max_rendered_pixels`); PDFs are rasterised page by page through pdfium.
//! Each image becomes one VLM call carrying the purchase-order OCR prompt,
//! bounded by `api_timeout_secs`. Page transcriptions are cleaned by
//! [`crate::pipeline::postprocess`] and joined with blank lines.
//!
//! A page whose call fails is skipped with a warning; the parse only fails
//! when no page produced text. Retrying with a different parser is the
//! orchestrator's job, so there is no per-call backoff loop here.

use crate::config::IngestConfig;
use crate::error::ParseFailure;
use crate::parsers::{DocumentParser, ParserOutput};
use crate::pdfium;
use crate::pipeline::features::FileFormat;
use crate::pipeline::postprocess;
use crate::pipeline::tier::ParserKind;
use crate::prompts::{page_instruction, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Confidence reported whenever the model returned text.
const VISION_CONFIDENCE: f64 = 0.90;

const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

#[derive(Clone)]
pub struct VisionParser {
    provider: Option<Arc<dyn LLMProvider>>,
    /// Why `provider` is `None`, reported on every parse.
    unavailable_reason: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    api_timeout_secs: u64,
    max_rendered_pixels: u32,
    max_vision_pages: usize,
    password: Option<String>,
}

impl fmt::Debug for VisionParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionParser")
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_vision_pages", &self.max_vision_pages)
            .finish()
    }
}

impl VisionParser {
    /// Build from config, resolving the provider once.
    ///
    /// A missing provider is not an error here: tiers whose primary parser
    /// is not vision never need one, and tiers that do will record a
    /// [`ParseFailure::ProviderUnavailable`] and fall back.
    pub fn new(config: &IngestConfig) -> Self {
        match resolve_provider(config) {
            Ok(provider) => Self::build(config, Some(provider), String::new()),
            Err(e) => {
                warn!("Vision parser has no provider: {}", e);
                Self::build(config, None, e.to_string())
            }
        }
    }

    /// Build around an already-constructed provider.
    pub fn with_provider(config: &IngestConfig, provider: Arc<dyn LLMProvider>) -> Self {
        Self::build(config, Some(provider), String::new())
    }

    fn build(config: &IngestConfig, provider: Option<Arc<dyn LLMProvider>>, reason: String) -> Self {
        Self {
            provider,
            unavailable_reason: reason,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_timeout_secs: config.api_timeout_secs,
            max_rendered_pixels: config.max_rendered_pixels,
            max_vision_pages: config.max_vision_pages,
            password: config.password.clone(),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    async fn load_images(&self, path: &Path) -> Result<Vec<DynamicImage>, ParseFailure> {
        let format = FileFormat::from_path(path);
        match format {
            FileFormat::Pdf => {
                pdfium::render_pages(
                    path,
                    self.password.as_deref(),
                    self.max_rendered_pixels,
                    self.max_vision_pages,
                )
                .await
            }
            FileFormat::Csv | FileFormat::Xlsx => Err(ParseFailure::UnsupportedFormat {
                parser: ParserKind::Vision.to_string(),
                format: format.to_string(),
            }),
            // Images, and unknown files that may be misnamed images
            FileFormat::Png | FileFormat::Jpg | FileFormat::Unknown => {
                let bytes = tokio::fs::read(path).await?;
                let max_px = self.max_rendered_pixels;
                let decoded = tokio::task::spawn_blocking(move || {
                    image::load_from_memory(&bytes).map(|img| fit_within(img, max_px))
                })
                .await
                .map_err(|e| ParseFailure::Io(format!("image decode task panicked: {e}")))?;

                match decoded {
                    Ok(img) => Ok(vec![img]),
                    Err(e) => Err(ParseFailure::UnsupportedFormat {
                        parser: ParserKind::Vision.to_string(),
                        format: format!("{format} ({e})"),
                    }),
                }
            }
        }
    }

    /// One VLM call for one image, bounded by the configured timeout.
    async fn transcribe(
        &self,
        provider: &Arc<dyn LLMProvider>,
        image: ImageData,
        page_num: usize,
        total: usize,
    ) -> Result<(String, usize, usize), ParseFailure> {
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(page_instruction(page_num, total), vec![image]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let call = provider.chat(&messages, Some(&options));
        match tokio::time::timeout(Duration::from_secs(self.api_timeout_secs), call).await {
            Ok(Ok(response)) => {
                debug!(
                    "Image {}: {} input tokens, {} output tokens",
                    page_num, response.prompt_tokens, response.completion_tokens
                );
                Ok((
                    response.content,
                    response.prompt_tokens,
                    response.completion_tokens,
                ))
            }
            Ok(Err(e)) => Err(ParseFailure::VisionFailed {
                image: page_num,
                detail: e.to_string(),
            }),
            Err(_) => Err(ParseFailure::Timeout {
                image: page_num,
                secs: self.api_timeout_secs,
            }),
        }
    }
}

#[async_trait]
impl DocumentParser for VisionParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Vision
    }

    async fn parse(&self, path: &Path) -> Result<ParserOutput, ParseFailure> {
        let Some(provider) = self.provider.as_ref() else {
            return Err(ParseFailure::ProviderUnavailable(
                self.unavailable_reason.clone(),
            ));
        };

        let images = self.load_images(path).await?;
        let total = images.len();
        info!("Vision OCR over {} image(s) of {}", total, path.display());

        let mut pages = Vec::with_capacity(total);
        let (mut input_tokens, mut output_tokens) = (0, 0);
        let mut last_error = None;

        for (idx, img) in images.iter().enumerate() {
            let page_num = idx + 1;
            let data = encode_png(img).map_err(|e| ParseFailure::RenderFailed {
                page: page_num,
                detail: format!("PNG encoding failed: {e}"),
            })?;

            match self.transcribe(provider, data, page_num, total).await {
                Ok((text, inp, out)) => {
                    input_tokens += inp;
                    output_tokens += out;
                    let cleaned = postprocess::clean_text(&text);
                    if !cleaned.is_empty() {
                        pages.push(cleaned);
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    last_error = Some(e);
                }
            }
        }

        if pages.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let text = pages.join("\n\n");
        let confidence = if text.is_empty() { 0.0 } else { VISION_CONFIDENCE };
        Ok(ParserOutput {
            text,
            confidence,
            input_tokens,
            output_tokens,
        })
    }
}

/// Downscale so neither side exceeds `max_px`, keeping the aspect ratio.
fn fit_within(img: DynamicImage, max_px: u32) -> DynamicImage {
    if img.width() <= max_px && img.height() <= max_px {
        img
    } else {
        img.resize(max_px, max_px, image::imageops::FilterType::Lanczos3)
    }
}

/// Encode an image as a base64 PNG ready for the VLM API.
///
/// PNG keeps glyph edges crisp; `detail: "high"` keeps fine print visible
/// to tiling models.
fn encode_png(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Resolve the vision provider from config, then the environment.
///
/// Order: explicit provider, `provider_name` (+ `model`),
/// `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, `OPENAI_API_KEY`, and
/// finally whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(config: &IngestConfig) -> Result<Arc<dyn LLMProvider>, ParseFailure> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", model);
    }

    let (llm, _) = ProviderFactory::from_env()
        .map_err(|e| ParseFailure::ProviderUnavailable(format!("auto-detect: {e}")))?;
    Ok(llm)
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ParseFailure> {
    ProviderFactory::create_llm_provider(name, model)
        .map_err(|e| ParseFailure::ProviderUnavailable(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn no_provider() -> VisionParser {
        VisionParser::build(&IngestConfig::default(), None, "no key".into())
    }

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_png(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }

    #[test]
    fn large_images_are_downscaled() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(400, 100));
        let fitted = fit_within(img, 200);
        assert_eq!(fitted.width(), 200);
        assert_eq!(fitted.height(), 50);
    }

    #[test]
    fn small_images_are_untouched() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(40, 10));
        let fitted = fit_within(img, 200);
        assert_eq!((fitted.width(), fitted.height()), (40, 10));
    }

    #[tokio::test]
    async fn missing_provider_is_a_parse_failure() {
        let err = no_provider().parse(Path::new("scan.png")).await.unwrap_err();
        assert_eq!(err, ParseFailure::ProviderUnavailable("no key".into()));
    }

    #[test]
    fn config_values_are_carried() {
        let config = IngestConfig::builder()
            .temperature(0.3)
            .max_vision_pages(3)
            .system_prompt("custom")
            .build()
            .unwrap();
        let p = VisionParser::build(&config, None, String::new());
        assert_eq!(p.max_vision_pages, 3);
        assert_eq!(p.system_prompt, "custom");
        assert!((p.temperature - 0.3).abs() < f32::EPSILON);
        assert!(!p.has_provider());
    }
}

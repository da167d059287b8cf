//! Layout text-layer parser (the docling-equivalent strategy).
//!
//! Reads whatever text a file already carries: the embedded text layer of a
//! PDF (via pdfium), the raw text of a CSV, the cell text of a workbook. It
//! performs no OCR, so a scanned PDF yields empty text and zero confidence,
//! which the quality gate turns into a vision retry.

use crate::config::IngestConfig;
use crate::error::ParseFailure;
use crate::parsers::tabular::workbook_as_text;
use crate::parsers::{DocumentParser, ParserOutput};
use crate::pdfium;
use crate::pipeline::features::FileFormat;
use crate::pipeline::tier::ParserKind;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

/// Confidence reported whenever any text was found.
const TEXT_LAYER_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, Default)]
pub struct TextLayerParser {
    password: Option<String>,
}

impl TextLayerParser {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            password: config.password.clone(),
        }
    }
}

#[async_trait]
impl DocumentParser for TextLayerParser {
    fn kind(&self) -> ParserKind {
        ParserKind::TextLayer
    }

    async fn parse(&self, path: &Path) -> Result<ParserOutput, ParseFailure> {
        let format = FileFormat::from_path(path);

        let text = match format {
            FileFormat::Pdf => {
                let pages = pdfium::extract_text(path, self.password.as_deref()).await?;
                debug!("Text layer: {} pages", pages.len());
                join_pages(&pages)
            }
            FileFormat::Csv => {
                let bytes = tokio::fs::read(path).await?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            FileFormat::Xlsx => {
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || workbook_as_text(&path))
                    .await
                    .map_err(|e| ParseFailure::Tabular(format!("workbook task panicked: {e}")))??
            }
            other => {
                return Err(ParseFailure::UnsupportedFormat {
                    parser: ParserKind::TextLayer.to_string(),
                    format: other.to_string(),
                })
            }
        };

        let confidence = if text.trim().is_empty() {
            0.0
        } else {
            TEXT_LAYER_CONFIDENCE
        };
        info!(
            "Text layer produced {} chars (confidence {:.2})",
            text.chars().count(),
            confidence
        );
        Ok(ParserOutput::new(text, confidence))
    }
}

/// Join page texts with a blank line, skipping pages with no text.
fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .map(|p| p.trim_end())
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

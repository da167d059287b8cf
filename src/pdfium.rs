//! pdfium access: library binding, page counting, text layer, rasterisation.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which keeps
//! thread-local state and is not safe to drive from async contexts. Every
//! public entry point here moves the work onto tokio's blocking pool so the
//! retry loop of other documents keeps running while a large PDF is opened.
//!
//! ## Library resolution
//!
//! pdfium is bound at runtime, first match wins:
//!
//! 1. `PDFIUM_LIB_PATH`: explicit path to the shared library
//! 2. the platform library name in the current working directory
//! 3. the system loader search path
//!
//! A missing library is a [`ParseFailure`], not a fatal error: the tier's
//! fallback chain (vision, tabular) still gets its turn.

use crate::error::ParseFailure;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bind to a pdfium shared library.
pub fn bind() -> Result<Pdfium, ParseFailure> {
    if let Ok(env_path) = std::env::var("PDFIUM_LIB_PATH") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Pdfium::bind_to_library(&path)
                .map(Pdfium::new)
                .map_err(|e| {
                    ParseFailure::PdfiumUnavailable(format!("{}: {}", path.display(), e))
                });
        }
        warn!("PDFIUM_LIB_PATH '{}' does not exist; trying defaults", env_path);
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| ParseFailure::PdfiumUnavailable(e.to_string()))
}

fn open<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, ParseFailure> {
    pdfium
        .load_pdf_from_file(path, password)
        .map_err(|e| ParseFailure::PdfLoad(format!("{}: {:?}", path.display(), e)))
}

/// Count the pages of a PDF.
pub async fn page_count(path: &Path, password: Option<&str>) -> Result<usize, ParseFailure> {
    let path = path.to_path_buf();
    let pwd = password.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        let pdfium = bind()?;
        let document = open(&pdfium, &path, pwd.as_deref())?;
        Ok(document.pages().len() as usize)
    })
    .await
    .map_err(|e| ParseFailure::PdfLoad(format!("page-count task panicked: {e}")))?
}

/// Extract the embedded text layer, one string per page.
///
/// Scanned PDFs come back as a list of empty strings; deciding whether
/// that is good enough is the quality gate's job, not ours.
pub async fn extract_text(
    path: &Path,
    password: Option<&str>,
) -> Result<Vec<String>, ParseFailure> {
    let path = path.to_path_buf();
    let pwd = password.map(str::to_string);

    tokio::task::spawn_blocking(move || extract_text_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| ParseFailure::PdfLoad(format!("text task panicked: {e}")))?
}

fn extract_text_blocking(path: &Path, password: Option<&str>) -> Result<Vec<String>, ParseFailure> {
    let pdfium = bind()?;
    let document = open(&pdfium, path, password)?;
    let pages = document.pages();

    let mut texts = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        match page.text() {
            Ok(text) => texts.push(text.all()),
            Err(e) => {
                warn!("Page {}: no text layer ({:?})", idx + 1, e);
                texts.push(String::new());
            }
        }
    }

    debug!("Extracted text layer from {} pages", texts.len());
    Ok(texts)
}

/// Rasterise up to `limit` leading pages, longest edge capped at `max_pixels`.
pub async fn render_pages(
    path: &Path,
    password: Option<&str>,
    max_pixels: u32,
    limit: usize,
) -> Result<Vec<DynamicImage>, ParseFailure> {
    let path = path.to_path_buf();
    let pwd = password.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        render_pages_blocking(&path, pwd.as_deref(), max_pixels, limit)
    })
    .await
    .map_err(|e| ParseFailure::PdfLoad(format!("render task panicked: {e}")))?
}

fn render_pages_blocking(
    path: &Path,
    password: Option<&str>,
    max_pixels: u32,
    limit: usize,
) -> Result<Vec<DynamicImage>, ParseFailure> {
    let pdfium = bind()?;
    let document = open(&pdfium, path, password)?;
    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages > limit {
        warn!(
            "Rendering only the first {} of {} pages for vision OCR",
            limit, total_pages
        );
    }
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total_pages.min(limit));
    for (idx, page) in pages.iter().enumerate().take(limit) {
        let bitmap =
            page.render_with_config(&render_config)
                .map_err(|e| ParseFailure::RenderFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}

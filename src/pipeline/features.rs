//! File inspection and feature extraction.
//!
//! [`inspect_file`] reads just enough of a document (size, page or line
//! count) to route it; [`FeatureVector::from_metadata`] reduces that to the
//! handful of numbers the tier classifier looks at. Neither step parses
//! content, so a 90 MB scan is inspected in milliseconds.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pdfium;
use calamine::Reader;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lines assumed per PDF page when no real line count exists.
const PDF_LINES_PER_PAGE: usize = 50;

/// Document container formats the pipeline recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Pdf,
    Xlsx,
    Csv,
    Png,
    Jpg,
    /// Unrecognised extension; routed to the corrupted/unknown tier.
    Unknown,
}

impl FileFormat {
    /// Detect the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => FileFormat::Pdf,
            "xlsx" => FileFormat::Xlsx,
            "csv" => FileFormat::Csv,
            "png" => FileFormat::Png,
            "jpg" | "jpeg" => FileFormat::Jpg,
            _ => FileFormat::Unknown,
        }
    }

    pub fn is_image(self) -> bool {
        matches!(self, FileFormat::Png | FileFormat::Jpg)
    }

    /// MIME type used when the raw bytes are handed to a vision model.
    pub fn mime_type(self) -> Option<&'static str> {
        match self {
            FileFormat::Png => Some("image/png"),
            FileFormat::Jpg => Some("image/jpeg"),
            FileFormat::Pdf => Some("application/pdf"),
            FileFormat::Csv => Some("text/csv"),
            FileFormat::Xlsx => {
                Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
            }
            FileFormat::Unknown => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileFormat::Pdf => "pdf",
            FileFormat::Xlsx => "xlsx",
            FileFormat::Csv => "csv",
            FileFormat::Png => "png",
            FileFormat::Jpg => "jpg",
            FileFormat::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// What inspection learned about a file, plus any validation failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: PathBuf,
    pub format: FileFormat,
    /// Size in MiB, rounded to two decimals.
    pub size_mb: f64,
    pub page_count: usize,
    pub line_count: usize,
    pub validation_errors: Vec<String>,
}

impl FileMetadata {
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

/// Routing features derived from [`FileMetadata`]. Never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub format: FileFormat,
    pub size_mb: f64,
    pub page_count: usize,
    pub line_count: usize,
    pub is_image_format: bool,
}

impl FeatureVector {
    pub fn new(format: FileFormat, size_mb: f64, page_count: usize, line_count: usize) -> Self {
        Self {
            format,
            size_mb: size_mb.max(0.0),
            page_count,
            line_count,
            is_image_format: format.is_image(),
        }
    }

    pub fn from_metadata(meta: &FileMetadata) -> Self {
        Self::new(meta.format, meta.size_mb, meta.page_count, meta.line_count)
    }
}

/// Inspect a file on disk and apply the configured validation limits.
///
/// Counting failures (pdfium missing, unreadable workbook) are logged and
/// recorded as zero rather than failing: the classifier's defaults handle
/// a zero page count, and the parsers will report the real problem.
///
/// # Errors
/// Only for a missing or unreadable file.
pub async fn inspect_file(path: &Path, config: &IngestConfig) -> Result<FileMetadata, IngestError> {
    let fs_meta = match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => m,
        Ok(_) => {
            return Err(IngestError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(IngestError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => {
            return Err(IngestError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
    };

    let format = FileFormat::from_path(path);
    let size_mb = round2(fs_meta.len() as f64 / (1024.0 * 1024.0));

    let page_count = match format {
        FileFormat::Pdf => match pdfium::page_count(path, config.password.as_deref()).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Could not count PDF pages of {}: {}", path.display(), e);
                0
            }
        },
        _ => 0,
    };

    let line_count = match format {
        FileFormat::Csv => count_text_lines(path).await,
        FileFormat::Xlsx => count_sheet_rows(path).await,
        FileFormat::Pdf => page_count * PDF_LINES_PER_PAGE,
        _ => 0,
    };

    let mut validation_errors = Vec::new();
    if size_mb > config.max_file_size_mb {
        validation_errors.push(format!(
            "File size {:.2} MB exceeds maximum {} MB",
            size_mb, config.max_file_size_mb
        ));
    }
    if line_count > config.max_line_count {
        validation_errors.push(format!(
            "Line count {} exceeds maximum {} lines",
            line_count, config.max_line_count
        ));
    }

    let meta = FileMetadata {
        path: path.to_path_buf(),
        format,
        size_mb,
        page_count,
        line_count,
        validation_errors,
    };

    info!(
        "Inspected {}: {}, {:.2} MB, {} pages, {} lines{}",
        path.display(),
        format,
        size_mb,
        page_count,
        line_count,
        if meta.is_valid() { "" } else { " (INVALID)" }
    );

    Ok(meta)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

async fn count_text_lines(path: &Path) -> usize {
    let path = path.to_path_buf();
    let counted = tokio::task::spawn_blocking(move || -> std::io::Result<usize> {
        let reader = BufReader::new(std::fs::File::open(&path)?);
        // `split` rather than `lines` so latin-1 bytes do not abort the count
        Ok(reader.split(b'\n').count())
    })
    .await;

    match counted {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            warn!("Could not count lines: {}", e);
            0
        }
        Err(e) => {
            warn!("Line-count task panicked: {}", e);
            0
        }
    }
}

async fn count_sheet_rows(path: &Path) -> usize {
    let path = path.to_path_buf();
    let counted = tokio::task::spawn_blocking(move || -> Result<usize, String> {
        let mut workbook = calamine::open_workbook_auto(&path).map_err(|e| e.to_string())?;
        match workbook.worksheet_range_at(0) {
            Some(Ok(range)) => Ok(range.height()),
            Some(Err(e)) => Err(e.to_string()),
            None => Ok(0),
        }
    })
    .await;

    match counted {
        Ok(Ok(n)) => {
            debug!("Spreadsheet has {} rows", n);
            n
        }
        Ok(Err(e)) => {
            warn!("Could not count spreadsheet rows: {}", e);
            0
        }
        Err(e) => {
            warn!("Row-count task panicked: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn format_from_extension() {
        assert_eq!(FileFormat::from_path(Path::new("po.PDF")), FileFormat::Pdf);
        assert_eq!(FileFormat::from_path(Path::new("po.xlsx")), FileFormat::Xlsx);
        assert_eq!(FileFormat::from_path(Path::new("po.csv")), FileFormat::Csv);
        assert_eq!(FileFormat::from_path(Path::new("scan.jpeg")), FileFormat::Jpg);
        assert_eq!(FileFormat::from_path(Path::new("scan.jpg")), FileFormat::Jpg);
        assert_eq!(FileFormat::from_path(Path::new("scan.png")), FileFormat::Png);
        assert_eq!(FileFormat::from_path(Path::new("po.docx")), FileFormat::Unknown);
        assert_eq!(FileFormat::from_path(Path::new("noext")), FileFormat::Unknown);
    }

    #[test]
    fn feature_vector_flags_images() {
        let v = FeatureVector::new(FileFormat::Png, 1.0, 0, 0);
        assert!(v.is_image_format);
        let v = FeatureVector::new(FileFormat::Pdf, 1.0, 3, 150);
        assert!(!v.is_image_format);
    }

    #[test]
    fn feature_vector_clamps_negative_size() {
        let v = FeatureVector::new(FileFormat::Csv, -3.0, 0, 0);
        assert_eq!(v.size_mb, 0.0);
    }

    #[test]
    fn round_to_two_decimals() {
        assert_eq!(round2(1.23456), 1.23);
        assert_eq!(round2(0.005), 0.01);
    }

    #[tokio::test]
    async fn inspect_csv_counts_lines() {
        let mut tmp = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(tmp, "item,desc,qty").unwrap();
        writeln!(tmp, "1,PARAFUSO M8x30,100").unwrap();
        writeln!(tmp, "2,PORCA M8,100").unwrap();
        tmp.flush().unwrap();

        let meta = inspect_file(tmp.path(), &IngestConfig::default())
            .await
            .unwrap();
        assert_eq!(meta.format, FileFormat::Csv);
        assert_eq!(meta.line_count, 3);
        assert_eq!(meta.page_count, 0);
        assert!(meta.is_valid());
    }

    #[tokio::test]
    async fn inspect_rejects_over_line_limit() {
        let mut tmp = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        for i in 0..20 {
            writeln!(tmp, "{i},PARAFUSO,1").unwrap();
        }
        tmp.flush().unwrap();

        let config = IngestConfig::builder().max_line_count(10).build().unwrap();
        let meta = inspect_file(tmp.path(), &config).await.unwrap();
        assert!(!meta.is_valid());
        assert!(meta.validation_errors[0].contains("Line count 20"));
    }

    #[tokio::test]
    async fn inspect_missing_file() {
        let err = inspect_file(Path::new("/definitely/not/here.pdf"), &IngestConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::FileNotFound { .. }));
    }
}

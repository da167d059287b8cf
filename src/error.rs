//! Error types for the forjador-ingest library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IngestError`]: **Fatal**: the document (or the whole run) cannot
//!   proceed at all (missing file, file over the validation limits, a tier
//!   table that names an unknown parser). Returned as `Err(IngestError)` from
//!   the top-level `ingest*` functions. Configuration errors surface before
//!   any parser is invoked.
//!
//! * [`ParseFailure`]: **Non-fatal**: one parser invocation failed (pdfium
//!   missing, VLM timeout, unreadable spreadsheet). The retry orchestrator
//!   turns it into a zero-quality parse and moves on to the next fallback
//!   parser, so it never escapes the pipeline as an error. The message is
//!   kept on the attempt record for diagnostics.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the forjador-ingest library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file was inspected but breaks the configured validation limits.
    #[error("File '{path}' rejected: {}", .reasons.join("; "))]
    FileRejected { path: PathBuf, reasons: Vec<String> },

    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A tier id string did not name one of the eleven tiers.
    #[error("Unknown complexity tier '{0}' (expected tier_1 … tier_11)")]
    UnknownTier(String),

    /// A parser id string did not name a known parser.
    #[error("Unknown parser '{0}' (expected text_layer, vision or tabular)")]
    UnknownParser(String),

    /// The tier table routes to a parser that the registry cannot provide.
    #[error("Tier table references parser '{parser}' for {tier}, but no such parser is registered")]
    ParserNotRegistered { tier: String, parser: String },

    /// A tier table document could not be decoded or is incomplete.
    #[error("Invalid tier table: {0}")]
    InvalidTierTable(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// `true` for errors raised while validating configuration, i.e. before
    /// any document was touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            IngestError::InvalidConfig(_)
                | IngestError::UnknownTier(_)
                | IngestError::UnknownParser(_)
                | IngestError::ParserNotRegistered { .. }
                | IngestError::InvalidTierTable(_)
        )
    }
}

/// A non-fatal failure of a single parser invocation.
///
/// Stored on [`crate::output::AttemptRecord`] when an attempt fails. The
/// document continues with the next fallback parser.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ParseFailure {
    /// The parser cannot read this kind of file.
    #[error("{parser} cannot read '{format}' files")]
    UnsupportedFormat { parser: String, format: String },

    /// No pdfium shared library could be bound.
    #[error("pdfium library unavailable: {0}")]
    PdfiumUnavailable(String),

    /// pdfium loaded but rejected the document.
    #[error("PDF could not be opened: {0}")]
    PdfLoad(String),

    /// A page failed to rasterise.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// No vision provider is configured.
    #[error("Vision provider not configured: {0}")]
    ProviderUnavailable(String),

    /// The VLM returned an error.
    #[error("Vision call failed on image {image}: {detail}")]
    VisionFailed { image: usize, detail: String },

    /// The VLM call did not finish in time.
    #[error("Vision call on image {image} timed out after {secs}s")]
    Timeout { image: usize, secs: u64 },

    /// CSV or spreadsheet decoding failed.
    #[error("Tabular decode failed: {0}")]
    Tabular(String),

    /// Reading the file failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The registry has no parser of the requested kind.
    #[error("No '{0}' parser is registered")]
    NotRegistered(String),
}

impl From<std::io::Error> for ParseFailure {
    fn from(e: std::io::Error) -> Self {
        ParseFailure::Io(e.to_string())
    }
}

//! # forjador-ingest
//!
//! Turn purchase-order documents (PDF, scanned images, CSV, XLSX) into
//! quality-checked, record-safe text chunks ready for downstream
//! extraction.
//!
//! ## Why this crate?
//!
//! No single parser handles every purchase order well. A text-layer parse of
//! a clean PDF is fast and exact; a scanned fax needs a vision model; a CSV
//! export is best read as a table. This crate routes each document to the
//! parser most likely to succeed, scores what comes back, falls back to the
//! next parser when the score is too low, and finally cuts the text into
//! chunks that never split a line item in two.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Inspect   format, size, pages, lines; reject over-limit files
//!  ├─ 2. Classify  feature vector → one of eleven complexity tiers
//!  ├─ 3. Parse     tier's primary parser (text layer / vision / tabular)
//!  ├─ 4. Score     completeness · structure · confidence → overall
//!  ├─ 5. Gate      PASSED | RETRYING (next fallback) | EXHAUSTED
//!  └─ 6. Chunk     record-aware split with overlap + validation report
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use forjador_ingest::{ingest, IngestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::default();
//!     let outcome = ingest("pedido_4471.pdf", &config).await?;
//!     println!("{} via {} → {}", outcome.tier, outcome.content.parser_used, outcome.gate_state);
//!     for chunk in &outcome.chunks {
//!         println!("{}: {} chars", chunk.id, chunk.char_length);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `forjador` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! forjador-ingest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ingest;
pub mod output;
pub mod parsers;
pub mod pdfium;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder};
pub use error::{IngestError, ParseFailure};
pub use ingest::{
    ingest, ingest_from_bytes, ingest_sync, ingest_with_registry, inspect, write_outcome_json,
};
pub use output::{AttemptRecord, DocumentOutcome, IngestStats, InspectionReport};
pub use parsers::{DocumentParser, ParserOutput, ParserRegistry};
pub use pipeline::chunk::{
    chunk_context, chunk_text, detect_record_starts, validate_chunks, Chunk, ChunkReport,
    ChunkStrategy, Chunker,
};
pub use pipeline::features::{FeatureVector, FileFormat, FileMetadata};
pub use pipeline::gate::{GateDecision, GateState, QualityGate};
pub use pipeline::quality::QualityScore;
pub use pipeline::retry::{ExhaustionCause, ParsedContent, RetryOrchestrator, RetryOutcome};
pub use pipeline::tier::{classify, ComplexityTier, ParserKind, TierProfile, TierTable};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{
    ingest_batch, ingest_batch_with_registry, ingest_stream, ingest_stream_with_registry, BatchItem,
    OutcomeStream,
};

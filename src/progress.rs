//! Progress-callback trait for per-document ingest events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! events as documents move through the pipeline. The CLI uses this to
//! drive its progress bar; a service might forward events to a channel.
//!
//! # Example
//!
//! ```rust
//! use forjador_ingest::{IngestConfig, IngestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl IngestProgressCallback for Counter {
//!     fn on_document_complete(&self, _index: usize, _total: usize, _chunks: usize, _passed: bool) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = IngestConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::gate::GateState;
use crate::pipeline::tier::ParserKind;
use std::sync::Arc;

/// Called by the pipeline as it processes documents.
///
/// Implementations must be `Send + Sync`: a batch processes up to
/// `concurrency` documents at once, so every method except the batch
/// start/complete pair may be called concurrently. All methods default to
/// no-ops.
///
/// Document indices are 0-based positions in the batch; a single-document
/// ingest reports index 0 of 1.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once before the first document is inspected.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document starts inspection.
    fn on_document_start(&self, index: usize, total: usize, path: &str) {
        let _ = (index, total, path);
    }

    /// Called after every parser attempt has been scored and gated.
    ///
    /// * `attempt`: 0 for the primary parser, `n` for the n-th retry
    fn on_attempt_scored(
        &self,
        index: usize,
        attempt: u32,
        parser: ParserKind,
        overall: f64,
        state: GateState,
    ) {
        let _ = (index, attempt, parser, overall, state);
    }

    /// Called when a document has been chunked. `passed` is false when the
    /// quality gate ended exhausted.
    fn on_document_complete(&self, index: usize, total: usize, chunk_count: usize, passed: bool) {
        let _ = (index, total, chunk_count, passed);
    }

    /// Called when a document aborts with a fatal error.
    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Alias for the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

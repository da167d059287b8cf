//! Batch ingest: many documents, bounded concurrency.
//!
//! [`ingest_stream`] yields one [`BatchItem`] per document as each finishes,
//! with at most `config.concurrency` documents in flight. Items arrive in
//! completion order; sort by `index` if input order matters, or use
//! [`ingest_batch`] which does it for you.
//!
//! One failing document never stops the batch: its fatal error is carried
//! on its own item.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::ingest::process_document;
use crate::output::DocumentOutcome;
use crate::parsers::ParserRegistry;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{info, warn};

/// Result for one document of a batch.
#[derive(Debug)]
pub struct BatchItem {
    /// 0-based position in the input list.
    pub index: usize,
    pub source: PathBuf,
    pub result: Result<DocumentOutcome, IngestError>,
}

/// A boxed stream of batch results.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = BatchItem> + Send>>;

/// Ingest `paths` with the standard parsers, streaming outcomes as they
/// complete.
///
/// # Errors
/// Configuration errors only (a tier table that routes to a parser the
/// registry lacks). Per-document failures arrive on the stream.
pub async fn ingest_stream(
    paths: Vec<PathBuf>,
    config: &IngestConfig,
) -> Result<OutcomeStream, IngestError> {
    let registry = Arc::new(ParserRegistry::standard(config));
    ingest_stream_with_registry(paths, config, registry).await
}

/// [`ingest_stream`] with a caller-supplied parser registry.
pub async fn ingest_stream_with_registry(
    paths: Vec<PathBuf>,
    config: &IngestConfig,
    registry: Arc<ParserRegistry>,
) -> Result<OutcomeStream, IngestError> {
    registry.validate(&config.tier_table)?;

    let total = paths.len();
    let concurrency = config.concurrency.max(1);
    info!(
        "Starting batch ingest: {} documents, {} in flight",
        total, concurrency
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
        if total == 0 {
            cb.on_batch_complete(0, 0);
        }
    }

    let finished = Arc::new(AtomicUsize::new(0));
    let succeeded = Arc::new(AtomicUsize::new(0));
    let cfg = config.clone();

    let s = stream::iter(paths.into_iter().enumerate().map(move |(index, source)| {
        let cfg = cfg.clone();
        let registry = Arc::clone(&registry);
        let finished = Arc::clone(&finished);
        let succeeded = Arc::clone(&succeeded);
        async move {
            let result = process_document(&source, &cfg, registry, index, total).await;
            match &result {
                Ok(_) => {
                    succeeded.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => warn!("{} failed: {}", source.display(), e),
            }

            if finished.fetch_add(1, Ordering::SeqCst) + 1 == total {
                let ok = succeeded.load(Ordering::SeqCst);
                info!("Batch complete: {}/{} documents ingested", ok, total);
                if let Some(ref cb) = cfg.progress_callback {
                    cb.on_batch_complete(total, ok);
                }
            }

            BatchItem {
                index,
                source,
                result,
            }
        }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}

/// Ingest every path and return the items in input order.
pub async fn ingest_batch(
    paths: Vec<PathBuf>,
    config: &IngestConfig,
) -> Result<Vec<BatchItem>, IngestError> {
    let registry = Arc::new(ParserRegistry::standard(config));
    ingest_batch_with_registry(paths, config, registry).await
}

/// [`ingest_batch`] with a caller-supplied parser registry.
pub async fn ingest_batch_with_registry(
    paths: Vec<PathBuf>,
    config: &IngestConfig,
    registry: Arc<ParserRegistry>,
) -> Result<Vec<BatchItem>, IngestError> {
    let mut items: Vec<BatchItem> = ingest_stream_with_registry(paths, config, registry)
        .await?
        .collect()
        .await;
    items.sort_by_key(|i| i.index);
    Ok(items)
}

//! Single-document ingest entry points.
//!
//! [`ingest`] drives one file through the whole pipeline and returns a
//! [`DocumentOutcome`]. A document whose quality gate ends exhausted is
//! still returned (with a warning and its last parse chunked); only
//! inspection and configuration problems are `Err`.
//!
//! Use [`crate::stream::ingest_stream`] or [`crate::stream::ingest_batch`]
//! for many documents at once.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::output::{DocumentOutcome, IngestStats, InspectionReport};
use crate::parsers::ParserRegistry;
use crate::pipeline::chunk::validate_chunks;
use crate::pipeline::features::{inspect_file, FeatureVector};
use crate::pipeline::retry::RetryOrchestrator;
use crate::pipeline::tier::{classify, ComplexityTier};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Ingest one document with the standard parsers.
///
/// # Errors
/// Returns `Err(IngestError)` only for fatal errors:
/// - File not found / permission denied
/// - File rejected by the size or line-count limits
/// - Tier table routing to a parser that is not registered
pub async fn ingest(
    path: impl AsRef<Path>,
    config: &IngestConfig,
) -> Result<DocumentOutcome, IngestError> {
    let registry = Arc::new(ParserRegistry::standard(config));
    ingest_with_registry(path, config, registry).await
}

/// Ingest one document with a caller-supplied parser registry.
///
/// The registry is checked against `config.tier_table` before the file is
/// touched.
pub async fn ingest_with_registry(
    path: impl AsRef<Path>,
    config: &IngestConfig,
    registry: Arc<ParserRegistry>,
) -> Result<DocumentOutcome, IngestError> {
    registry.validate(&config.tier_table)?;
    process_document(path.as_ref(), config, registry, 0, 1).await
}

/// Synchronous wrapper around [`ingest`].
///
/// Creates a temporary tokio runtime internally.
pub fn ingest_sync(
    path: impl AsRef<Path>,
    config: &IngestConfig,
) -> Result<DocumentOutcome, IngestError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| IngestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(ingest(path, config))
}

/// Ingest a document held in memory.
///
/// `extension` selects the format ("pdf", "csv", "xlsx", "png", "jpg"); the
/// bytes are written to a managed tempfile that is removed on return.
pub async fn ingest_from_bytes(
    bytes: &[u8],
    extension: &str,
    config: &IngestConfig,
) -> Result<DocumentOutcome, IngestError> {
    let suffix = format!(".{}", extension.trim_start_matches('.'));
    let mut tmp = tempfile::Builder::new()
        .prefix("forjador-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| IngestError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| IngestError::Internal(format!("tempfile write: {e}")))?;
    // `tmp` is dropped (and the file deleted) when `ingest` returns
    ingest(tmp.path(), config).await
}

/// Inspect and classify a document without parsing it.
///
/// Does not require a vision provider or API key.
pub async fn inspect(
    path: impl AsRef<Path>,
    config: &IngestConfig,
) -> Result<InspectionReport, IngestError> {
    let metadata = inspect_file(path.as_ref(), config).await?;
    let features = FeatureVector::from_metadata(&metadata);
    let tier = route(&features, config);
    let profile = config.tier_table.profile(tier);
    Ok(InspectionReport {
        metadata,
        features,
        tier,
        tier_name: profile.display_name.clone(),
        primary_parser: profile.primary_parser,
        fallback_parsers: profile.fallback_parsers.clone(),
        expected_processing_seconds: profile.expected_processing_seconds,
    })
}

/// Write an outcome as pretty JSON via temp file + rename, so readers never
/// see a partial file.
pub fn write_outcome_json(outcome: &DocumentOutcome, path: &Path) -> Result<(), IngestError> {
    let write_err = |source: std::io::Error| IngestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let json = outcome
        .to_json_pretty()
        .map_err(|e| IngestError::Internal(format!("serialise outcome: {e}")))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(json.as_bytes()).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn route(features: &FeatureVector, config: &IngestConfig) -> ComplexityTier {
    match config.tier_override {
        Some(tier) => {
            debug!("Tier override in effect: {}", tier);
            tier
        }
        None => classify(features),
    }
}

/// Run one document through inspect → classify → orchestrate → chunk.
///
/// Fires document-level progress events; the registry must already be
/// validated against the tier table.
pub(crate) async fn process_document(
    path: &Path,
    config: &IngestConfig,
    registry: Arc<ParserRegistry>,
    index: usize,
    total: usize,
) -> Result<DocumentOutcome, IngestError> {
    let source = path.display().to_string();
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(index, total, &source);
    }

    let result = run_pipeline(path, &source, config, registry, index).await;

    if let Some(ref cb) = config.progress_callback {
        match &result {
            Ok(outcome) => cb.on_document_complete(index, total, outcome.chunks.len(), outcome.passed()),
            Err(e) => cb.on_document_error(index, total, &e.to_string()),
        }
    }
    result
}

async fn run_pipeline(
    path: &Path,
    source: &str,
    config: &IngestConfig,
    registry: Arc<ParserRegistry>,
    index: usize,
) -> Result<DocumentOutcome, IngestError> {
    let total_start = Instant::now();
    info!("Starting ingest: {}", source);

    // ── Step 1: Inspect and validate ─────────────────────────────────────
    let inspect_start = Instant::now();
    let metadata = inspect_file(path, config).await?;
    if !metadata.is_valid() {
        warn!("Rejecting {}: {}", source, metadata.validation_errors.join("; "));
        return Err(IngestError::FileRejected {
            path: path.to_path_buf(),
            reasons: metadata.validation_errors.clone(),
        });
    }
    let features = FeatureVector::from_metadata(&metadata);
    let inspect_duration_ms = inspect_start.elapsed().as_millis() as u64;

    // ── Step 2: Classify ─────────────────────────────────────────────────
    let tier = route(&features, config);
    let profile = config.tier_table.profile(tier);
    info!(
        "{} → {} ({}), primary parser {}",
        source, tier, profile.display_name, profile.primary_parser
    );

    // ── Step 3: Parse under the quality gate ─────────────────────────────
    let parse_start = Instant::now();
    let mut orchestrator =
        RetryOrchestrator::new(registry, Arc::clone(&config.tier_table), config.gate());
    if let Some(ref cb) = config.progress_callback {
        orchestrator = orchestrator.with_progress(Arc::clone(cb), index);
    }
    let run = orchestrator.run(path, tier).await;
    let parse_duration_ms = parse_start.elapsed().as_millis() as u64;

    let mut warnings = Vec::new();
    if run.exhaustion.is_some() {
        warnings.push(format!(
            "quality gate failed after {} retries",
            run.content.retry_count
        ));
    }

    // ── Step 4: Chunk the accepted (or last) text ────────────────────────
    let chunk_start = Instant::now();
    let chunker = config.chunker();
    let chunks = chunker.chunk(&run.content.raw_text);
    let chunk_report = validate_chunks(&chunks, config.chunk_size);
    let chunk_duration_ms = chunk_start.elapsed().as_millis() as u64;

    for &i in &chunk_report.oversized {
        warnings.push(format!(
            "chunk {} is {} chars, over 1.5 × chunk size {}",
            i, chunks[i].char_length, config.chunk_size
        ));
    }
    if !chunk_report.is_valid {
        warn!("Chunk validation failed for {}: {:?}", source, chunk_report);
    }

    let stats = IngestStats {
        attempts: run.attempts.len(),
        retries: run.content.retry_count as usize,
        accepted_chars: run.content.raw_text.chars().count(),
        chunk_count: chunks.len(),
        total_input_tokens: run.attempts.iter().map(|a| a.input_tokens).sum(),
        total_output_tokens: run.attempts.iter().map(|a| a.output_tokens).sum(),
        inspect_duration_ms,
        parse_duration_ms,
        chunk_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Ingest complete: {} {} after {} attempt(s), {} chunks, {}ms total",
        source, run.state, stats.attempts, stats.chunk_count, stats.total_duration_ms
    );

    Ok(DocumentOutcome {
        source: source.to_string(),
        tier_name: profile.display_name.clone(),
        metadata,
        features,
        tier,
        content: run.content,
        score: run.score,
        gate_state: run.state,
        exhaustion: run.exhaustion,
        attempts: run.attempts,
        chunks,
        chunk_report,
        warnings,
        stats,
    })
}

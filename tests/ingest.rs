//! Integration tests for the full ingest pipeline.
//!
//! Parsers other than the tabular one are scripted in memory so these run
//! without pdfium or a vision provider. Input files are real files in temp
//! directories, so inspection and routing run unmodified.

use async_trait::async_trait;
use forjador_ingest::parsers::TabularParser;
use forjador_ingest::{
    chunk_text, detect_record_starts, ingest_batch_with_registry, ingest_with_registry, inspect,
    ChunkStrategy, Chunker, ComplexityTier, DocumentParser, ExhaustionCause, GateState,
    IngestConfig, IngestError, IngestProgressCallback, ParseFailure, ParserKind, ParserOutput,
    ParserRegistry, TierTable,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// A parser that returns a fixed result and counts its calls.
struct Scripted {
    kind: ParserKind,
    reply: Result<(String, f64), ParseFailure>,
    calls: AtomicUsize,
}

impl Scripted {
    fn ok(kind: ParserKind, text: impl Into<String>, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            kind,
            reply: Ok((text.into(), confidence)),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(kind: ParserKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            reply: Err(ParseFailure::ProviderUnavailable("scripted".into())),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentParser for Scripted {
    fn kind(&self) -> ParserKind {
        self.kind
    }

    async fn parse(&self, _path: &Path) -> Result<ParserOutput, ParseFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .map(|(text, confidence)| ParserOutput::new(text, confidence))
    }
}

/// Route pipeline logs to the test harness; `RUST_LOG=forjador_ingest=debug`
/// shows every attempt.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

fn purchase_order_csv(rows: usize) -> String {
    let mut s = String::from("Item;Descricao;Material;Quantidade\n");
    for i in 1..=rows {
        s.push_str(&format!(
            "{i};PARAFUSO SEXTAVADO M8 x 30;aço inox classe 8.8;{}\n",
            i * 10
        ));
    }
    s
}

fn item_lines(n: usize) -> String {
    (1..=n)
        .map(|i| format!("Item {i}: PARAFUSO M8x30 - 100 UN"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text the default gate accepts: keywords, item markers, enough lines.
fn good_text() -> String {
    let mut s = String::from("PEDIDO DE COMPRA 4471\nMaterial: aço inox classe 8.8\n");
    for i in 1..=12 {
        s.push_str(&format!(
            "Item {i}: PARAFUSO SEXTAVADO M8 - quantidade {} UN\n",
            i * 10
        ));
    }
    s
}

// ── Routing and gating ───────────────────────────────────────────────────────

#[tokio::test]
async fn csv_is_read_by_the_tabular_parser_and_passes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "pedido.csv", &purchase_order_csv(25));

    let text_layer = Scripted::failing(ParserKind::TextLayer);
    let vision = Scripted::failing(ParserKind::Vision);
    let registry = ParserRegistry::new()
        .with(Arc::new(TabularParser::new()))
        .with(text_layer.clone())
        .with(vision.clone());

    let config = IngestConfig::builder()
        .chunk_size(500)
        .chunk_overlap(50)
        .build()
        .unwrap();
    let out = ingest_with_registry(&path, &config, Arc::new(registry))
        .await
        .unwrap();

    assert_eq!(out.tier, ComplexityTier::Tier1);
    assert_eq!(out.gate_state, GateState::Passed);
    assert_eq!(out.content.parser_used, ParserKind::Tabular);
    assert!(out.content.raw_text.starts_with("| Item | Descricao | Material | Quantidade |"));
    assert_eq!(text_layer.calls(), 0);
    assert_eq!(vision.calls(), 0);
    assert!(out.warnings.is_empty());

    // no record markers in a pipe table → separator splitting, round trip holds
    assert!(out.chunks.len() > 1);
    assert!(out.chunk_report.is_valid);
    let rebuilt: String = out.chunks.iter().map(|c| c.new_content()).collect();
    assert_eq!(rebuilt, out.content.raw_text);
}

#[tokio::test]
async fn unknown_extension_falls_back_from_vision_to_text_layer() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "pedido.dat", "binary-ish junk");

    let vision = Scripted::failing(ParserKind::Vision);
    let text_layer = Scripted::ok(ParserKind::TextLayer, good_text(), 0.95);
    let registry = ParserRegistry::new()
        .with(vision.clone())
        .with(text_layer.clone())
        .with(Scripted::failing(ParserKind::Tabular));

    let out = ingest_with_registry(&path, &IngestConfig::default(), Arc::new(registry))
        .await
        .unwrap();

    assert_eq!(out.tier, ComplexityTier::Tier11);
    assert_eq!(out.gate_state, GateState::Passed);
    assert_eq!(out.content.parser_used, ParserKind::TextLayer);
    assert_eq!(out.content.retry_count, 1);
    assert!(out.content.used_fallback);
    assert_eq!(out.attempts.len(), 2);
    assert!(out.attempts[0].failure.is_some());
    assert_eq!(vision.calls(), 1);
    assert_eq!(text_layer.calls(), 1);
    assert_eq!(out.stats.retries, 1);
}

#[tokio::test]
async fn exhausted_gate_is_a_warning_not_an_error() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "pedido.dat", "x");

    let registry = ParserRegistry::new()
        .with(Scripted::ok(ParserKind::Vision, "??? ~~~", 0.3))
        .with(Scripted::ok(ParserKind::TextLayer, "ab", 0.3))
        .with(Scripted::ok(ParserKind::Tabular, "Item 1: PORCA M8", 0.3));

    let out = ingest_with_registry(&path, &IngestConfig::default(), Arc::new(registry))
        .await
        .unwrap();

    assert_eq!(out.gate_state, GateState::Exhausted);
    assert_eq!(out.exhaustion, Some(ExhaustionCause::RetryBudget));
    assert_eq!(out.attempts.len(), 3);
    // the last parse is kept and chunked
    assert_eq!(out.content.parser_used, ParserKind::Tabular);
    assert_eq!(out.chunks.len(), 1);
    assert_eq!(out.chunks[0].text, "Item 1: PORCA M8");
    assert_eq!(out.warnings, vec!["quality gate failed after 2 retries".to_string()]);
}

#[tokio::test]
async fn pdf_without_pdfium_routes_to_tier_three() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "pedido.pdf", "%PDF-1.4 not really");

    let report = inspect(&path, &IngestConfig::default()).await.unwrap();
    assert_eq!(report.tier, ComplexityTier::Tier3);
    assert_eq!(report.primary_parser, ParserKind::TextLayer);
    assert!(!report.fallback_parsers.is_empty());
}

// ── Chunking through the pipeline ────────────────────────────────────────────

#[tokio::test]
async fn item_lines_are_chunked_without_splitting_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "pedido.pdf", "%PDF-1.4 not really");
    let text = item_lines(200);

    let registry = ParserRegistry::new()
        .with(Scripted::ok(ParserKind::TextLayer, text.clone(), 0.95))
        .with(Scripted::failing(ParserKind::Vision))
        .with(Scripted::failing(ParserKind::Tabular));

    let config = IngestConfig::builder()
        .chunk_size(1000)
        .chunk_overlap(100)
        .quality_threshold(0.0)
        .build()
        .unwrap();
    let out = ingest_with_registry(&path, &config, Arc::new(registry))
        .await
        .unwrap();

    assert!(out.chunks.len() > 1);
    for (i, c) in out.chunks.iter().enumerate() {
        assert_eq!(c.index, i);
        assert!(!c.text.is_empty());
        assert!(c.char_length <= 1000 + 100);
    }

    // every record line is wholly inside the new content of some chunk
    for i in 1..=200 {
        let line = format!("Item {i}: PARAFUSO M8x30 - 100 UN");
        let holders = out
            .chunks
            .iter()
            .filter(|c| c.new_content().contains(&line))
            .count();
        assert_eq!(holders, 1, "record {i} found in {holders} chunks");
    }
}

#[test]
fn single_short_record_is_one_chunk() {
    let text = "Item 1: PARAFUSO M8x30 - 100 UN";
    let chunks = chunk_text(text, 3500, 250);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].index, 0);
    assert_eq!(chunks[0].text, text);
    assert_eq!(chunks[0].overlap_with_previous, 0);
}

#[test]
fn detected_boundaries_cover_every_item() {
    let text = item_lines(10);
    // every item but the first starts after a newline
    assert_eq!(detect_record_starts(&text).len(), 9);
    match Chunker::default().plan(&text) {
        ChunkStrategy::Boundaries(bounds) => {
            assert_eq!(bounds.len(), 11);
            assert_eq!(bounds.first(), Some(&0));
            assert_eq!(bounds.last(), Some(&text.len()));
        }
        ChunkStrategy::Recursive => panic!("expected record boundaries"),
    }
}

// ── Configuration errors ─────────────────────────────────────────────────────

#[tokio::test]
async fn custom_table_needing_missing_parser_is_rejected_up_front() {
    let mut v = serde_json::Map::new();
    for (tier, profile) in TierTable::builtin().iter() {
        v.insert(tier.id(), serde_json::to_value(profile).unwrap());
    }
    v["tier_1"]["fallback_parsers"] = serde_json::json!(["vision"]);
    let table = TierTable::from_json_str(&serde_json::Value::Object(v).to_string()).unwrap();

    let config = IngestConfig::builder().tier_table(table).build().unwrap();
    let registry = ParserRegistry::new()
        .with(Arc::new(TabularParser::new()))
        .with(Scripted::failing(ParserKind::TextLayer));

    // the file does not exist: validation must fail before it is looked at
    let err = ingest_with_registry("/definitely/missing.csv", &config, Arc::new(registry))
        .await
        .unwrap_err();
    assert!(err.is_configuration(), "got {err}");
}

// ── Batches ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Events {
    batch_total: AtomicUsize,
    batch_success: AtomicUsize,
    errors: Mutex<Vec<usize>>,
    completes: AtomicUsize,
}

impl IngestProgressCallback for Events {
    fn on_batch_start(&self, total_documents: usize) {
        self.batch_total.store(total_documents, Ordering::SeqCst);
    }

    fn on_document_complete(&self, _index: usize, _total: usize, _chunks: usize, _passed: bool) {
        self.completes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_document_error(&self, index: usize, _total: usize, _error: &str) {
        self.errors.lock().unwrap().push(index);
    }

    fn on_batch_complete(&self, _total: usize, success_count: usize) {
        self.batch_success.store(success_count, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn batch_keeps_order_and_isolates_failures() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a.csv", &purchase_order_csv(5));
    let missing = dir.path().join("missing.csv");
    let c = write_file(dir.path(), "c.csv", &purchase_order_csv(8));

    let events = Arc::new(Events::default());
    let config = IngestConfig::builder()
        .concurrency(2)
        .progress_callback(events.clone())
        .build()
        .unwrap();
    let registry = ParserRegistry::new()
        .with(Arc::new(TabularParser::new()))
        .with(Scripted::failing(ParserKind::TextLayer))
        .with(Scripted::failing(ParserKind::Vision));

    let items = ingest_batch_with_registry(vec![a, missing, c], &config, Arc::new(registry))
        .await
        .unwrap();

    assert_eq!(items.len(), 3);
    assert_eq!(
        items.iter().map(|i| i.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(items[0].result.is_ok());
    assert!(matches!(
        items[1].result,
        Err(IngestError::FileNotFound { .. })
    ));
    assert!(items[2].result.is_ok());

    assert_eq!(events.batch_total.load(Ordering::SeqCst), 3);
    assert_eq!(events.batch_success.load(Ordering::SeqCst), 2);
    assert_eq!(events.completes.load(Ordering::SeqCst), 2);
    assert_eq!(*events.errors.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn empty_batch_is_fine() {
    let items = ingest_batch_with_registry(
        Vec::new(),
        &IngestConfig::default(),
        Arc::new(ParserRegistry::standard(&IngestConfig::default())),
    )
    .await
    .unwrap();
    assert!(items.is_empty());
}

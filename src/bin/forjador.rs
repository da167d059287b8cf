//! CLI binary for forjador-ingest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `IngestConfig`, runs the batch, and writes or prints one outcome per
//! input.

use anyhow::{Context, Result};
use clap::Parser;
use forjador_ingest::{
    ingest_stream, inspect, write_outcome_json, ComplexityTier, DocumentOutcome, GateState,
    IngestConfig, IngestProgressCallback, InspectionReport, ParserKind, ProgressCallback,
    TierTable,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished document. Documents
/// complete out of order when more than one is in flight.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-document display name and start time.
    docs: Mutex<HashMap<usize, (String, Instant)>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            docs: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn finish_doc(&self, index: usize) -> (String, f64) {
        self.docs
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|(name, t)| (name, t.elapsed().as_secs_f64()))
            .unwrap_or_else(|| (format!("#{index}"), 0.0))
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_documents as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Ingesting");
    }

    fn on_document_start(&self, index: usize, _total: usize, path: &str) {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string());
        self.bar.set_message(name.clone());
        if let Ok(mut m) = self.docs.lock() {
            m.insert(index, (name, Instant::now()));
        }
    }

    fn on_attempt_scored(
        &self,
        _index: usize,
        attempt: u32,
        parser: ParserKind,
        overall: f64,
        state: GateState,
    ) {
        if state == GateState::Retrying {
            self.bar.println(dim(&format!(
                "    attempt {attempt} with {parser} scored {overall:.3}, retrying"
            )));
        }
    }

    fn on_document_complete(&self, index: usize, total: usize, chunk_count: usize, passed: bool) {
        let (name, secs) = self.finish_doc(index);
        let mark = if passed { green("✓") } else { yellow("⚠") };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            mark,
            index + 1,
            total,
            name,
            dim(&format!("{chunk_count:>3} chunks")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        let (name, _) = self.finish_doc(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let first_line = error.lines().next().unwrap_or(error);
        let msg: String = if first_line.chars().count() > 80 {
            format!("{}\u{2026}", first_line.chars().take(79).collect::<String>())
        } else {
            first_line.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}",
            red("✗"),
            index + 1,
            total,
            name,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} documents ingested",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents ingested  ({} failed)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest one purchase order, print a summary
  forjador pedido_4471.pdf

  # Ingest a folder's worth, one JSON outcome per input
  forjador --output-dir out/ pedidos/*.pdf pedidos/*.csv

  # Full outcome as JSON on stdout
  forjador --json pedido_4471.pdf > outcome.json

  # Show the tier and parser chain without parsing (no API key needed)
  forjador --inspect-only pedido_4471.pdf

  # Force the scanned-PDF route and a stricter gate
  forjador --tier tier_7 --threshold 0.9 fax.pdf

TIERS:
  tier_1  Simple Structured CSV       tabular    → text_layer
  tier_2  Simple Excel Spreadsheet    tabular    → text_layer
  tier_3  Standard PDF with Text      text_layer → vision, tabular
  tier_4  PDF with Embedded Tables    text_layer → vision
  tier_5  PDF with Images/Charts      text_layer → vision
  tier_6  Multi-page Complex PDF      text_layer → vision
  tier_7  Scanned PDF (OCR Needed)    vision     → text_layer
  tier_8  Poor Quality Scanned PDF    vision     → text_layer
  tier_9  Handwritten Documents       vision
  tier_10 Mixed Format Documents      vision     → text_layer
  tier_11 Corrupted or Damaged Files  vision     → text_layer, tabular

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (vision parser)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (text layer and rasterisation)
  RUST_LOG                Log filter, e.g. forjador_ingest=debug
"#;

/// Parse, quality-gate and chunk purchase-order documents.
#[derive(Parser, Debug)]
#[command(
    name = "forjador",
    version,
    about = "Parse, quality-gate and chunk purchase-order documents",
    long_about = "Route each purchase-order document (PDF, PNG/JPG scan, CSV, XLSX) to the parser \
most likely to read it, score the result, fall back to other parsers when the score is too low, \
and split the accepted text into chunks that never break a line item.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Documents to ingest.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Write one `<file name>.json` outcome per input into this directory.
    #[arg(short, long, env = "FORJADOR_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Print outcomes as a JSON array on stdout.
    #[arg(long, env = "FORJADOR_JSON")]
    json: bool,

    /// Print features and routing only, no parsing.
    #[arg(long)]
    inspect_only: bool,

    /// Skip classification and route every input to this tier (e.g. tier_7).
    #[arg(long, env = "FORJADOR_TIER")]
    tier: Option<ComplexityTier>,

    /// JSON file replacing the built-in tier table.
    #[arg(long, env = "FORJADOR_TIER_TABLE")]
    tier_table: Option<PathBuf>,

    /// Minimum overall quality score (0–1).
    #[arg(long, env = "FORJADOR_THRESHOLD", default_value_t = 0.85)]
    threshold: f64,

    /// Fallback attempts after the primary parser.
    #[arg(long, env = "FORJADOR_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Maximum chunk size in characters.
    #[arg(long, env = "FORJADOR_CHUNK_SIZE", default_value_t = 3500)]
    chunk_size: usize,

    /// Characters repeated between consecutive chunks.
    #[arg(long, env = "FORJADOR_CHUNK_OVERLAP", default_value_t = 250)]
    chunk_overlap: usize,

    /// Documents processed concurrently.
    #[arg(short, long, env = "FORJADOR_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Vision model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// PDF pages sent to the vision parser.
    #[arg(long, env = "FORJADOR_MAX_VISION_PAGES", default_value_t = 10)]
    max_vision_pages: usize,

    /// Per vision call timeout in seconds.
    #[arg(long, env = "FORJADOR_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "FORJADOR_PASSWORD")]
    password: Option<String>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FORJADOR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FORJADOR_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, env = "FORJADOR_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the feedback; INFO logs would tear it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn IngestProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let mut reports = Vec::with_capacity(cli.inputs.len());
        for input in &cli.inputs {
            let report = inspect(input, &config)
                .await
                .with_context(|| format!("Failed to inspect {}", input.display()))?;
            if !cli.json {
                print_inspection(input, &report);
            }
            reports.push(report);
        }
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?
            );
        }
        return Ok(());
    }

    // ── Run the batch ────────────────────────────────────────────────────
    let total = cli.inputs.len();
    let mut stream = ingest_stream(cli.inputs.clone(), &config)
        .await
        .context("Invalid configuration")?;

    let mut json_items: Vec<(usize, serde_json::Value)> = Vec::new();
    let mut failures = 0usize;

    while let Some(item) = stream.next().await {
        match item.result {
            Ok(outcome) => {
                if let Some(ref dir) = cli.output_dir {
                    let target = dir.join(outcome_file_name(&item.source));
                    write_outcome_json(&outcome, &target)
                        .with_context(|| format!("Failed to write {}", target.display()))?;
                }
                if cli.json {
                    let value =
                        serde_json::to_value(&outcome).context("Failed to serialise outcome")?;
                    json_items.push((item.index, value));
                } else if !cli.quiet && !show_progress {
                    print_summary(&outcome);
                }
            }
            Err(e) => {
                failures += 1;
                if cli.json {
                    json_items.push((
                        item.index,
                        serde_json::json!({
                            "source": item.source.display().to_string(),
                            "error": e.to_string(),
                        }),
                    ));
                } else if !show_progress {
                    eprintln!("{} {}: {}", red("✗"), item.source.display(), e);
                }
            }
        }
    }

    if cli.json {
        json_items.sort_by_key(|(i, _)| *i);
        let values: Vec<serde_json::Value> = json_items.into_iter().map(|(_, v)| v).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&values).context("Failed to serialise outcomes")?
        );
    }

    if failures > 0 {
        anyhow::bail!("{} of {} documents failed", failures, total);
    }
    Ok(())
}

/// Map CLI args to `IngestConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .quality_threshold(cli.threshold)
        .max_retries(cli.max_retries)
        .chunk_size(cli.chunk_size)
        .chunk_overlap(cli.chunk_overlap)
        .concurrency(cli.concurrency)
        .max_vision_pages(cli.max_vision_pages)
        .api_timeout_secs(cli.api_timeout);

    if let Some(tier) = cli.tier {
        builder = builder.tier_override(tier);
    }
    if let Some(ref path) = cli.tier_table {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read tier table from {:?}", path))?;
        let table = TierTable::from_json_str(&json)
            .with_context(|| format!("Invalid tier table in {:?}", path))?;
        builder = builder.tier_table(table);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `po.pdf` → `po.pdf.json`, so `po.pdf` and `po.csv` never collide.
fn outcome_file_name(source: &Path) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    format!("{name}.json")
}

fn print_inspection(input: &Path, r: &InspectionReport) {
    let fallbacks: Vec<String> = r.fallback_parsers.iter().map(|p| p.to_string()).collect();
    println!("File:         {}", input.display());
    println!("Format:       {}", r.metadata.format);
    println!("Size:         {:.2} MB", r.metadata.size_mb);
    println!("Pages:        {}", r.metadata.page_count);
    println!("Lines:        {}", r.metadata.line_count);
    println!("Tier:         {} ({})", r.tier, r.tier_name);
    println!("Primary:      {}", r.primary_parser);
    println!(
        "Fallbacks:    {}",
        if fallbacks.is_empty() {
            "-".to_string()
        } else {
            fallbacks.join(", ")
        }
    );
    println!("Expected:     {:.0}s", r.expected_processing_seconds);
    for e in &r.metadata.validation_errors {
        println!("Invalid:      {}", e);
    }
    println!();
}

fn print_summary(o: &DocumentOutcome) {
    let mark = if o.passed() { green("✓") } else { yellow("⚠") };
    println!(
        "{} {}  {}  {} → {}  overall {:.3}  {} chunks  {}ms",
        mark,
        bold(&o.source),
        o.tier,
        o.content.parser_used,
        o.gate_state,
        o.score.overall,
        o.chunks.len(),
        o.stats.total_duration_ms,
    );
    for w in &o.warnings {
        println!("    {}", yellow(w));
    }
}

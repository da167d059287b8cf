//! The parse → score → gate loop with bounded fallback.
//!
//! ```text
//!   primary parser ──▶ score ──▶ gate ──PASSED──────────────▶ done
//!         ▲                        │
//!         │                        ├──EXHAUSTED (budget)────▶ done + warning
//!         │                        │
//!         └── fallback[retry] ◀────┴──RETRYING
//!                 │
//!                 └── none left ──▶ EXHAUSTED (fallback chain)
//! ```
//!
//! Each attempt produces a fresh [`ParsedContent`]; earlier attempts are
//! kept only as [`AttemptRecord`]s. A parser failure is scored as empty text
//! with zero confidence, so it flows through the gate like any other poor
//! parse instead of aborting the document.

use crate::error::ParseFailure;
use crate::output::AttemptRecord;
use crate::parsers::ParserRegistry;
use crate::pipeline::gate::{GateDecision, GateState, QualityGate};
use crate::pipeline::quality::{self, QualityScore};
use crate::pipeline::tier::{ComplexityTier, ParserKind, TierTable};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Text produced by one parser invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedContent {
    pub parser_used: ParserKind,
    pub raw_text: String,
    pub parser_confidence: f64,
    pub parse_duration_s: f64,
    pub retry_count: u32,
    pub used_fallback: bool,
}

/// Why the gate ended without passing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionCause {
    /// `max_retries` retries were spent.
    RetryBudget,
    /// The tier ran out of fallback parsers first.
    FallbackChain,
}

/// Final result of [`RetryOrchestrator::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// The last parse: accepted when `state` is `Passed`, best available otherwise.
    pub content: ParsedContent,
    pub score: QualityScore,
    pub decision: GateDecision,
    /// `Passed` or `Exhausted`; never `Retrying`.
    pub state: GateState,
    pub exhaustion: Option<ExhaustionCause>,
    pub attempts: Vec<AttemptRecord>,
}

/// Drives parsers for one tier until the gate passes or gives up.
#[derive(Clone)]
pub struct RetryOrchestrator {
    registry: Arc<ParserRegistry>,
    table: Arc<TierTable>,
    gate: QualityGate,
    progress: Option<(ProgressCallback, usize)>,
}

impl RetryOrchestrator {
    pub fn new(registry: Arc<ParserRegistry>, table: Arc<TierTable>, gate: QualityGate) -> Self {
        Self {
            registry,
            table,
            gate,
            progress: None,
        }
    }

    /// Report every scored attempt for the document at `doc_index`.
    pub fn with_progress(mut self, callback: ProgressCallback, doc_index: usize) -> Self {
        self.progress = Some((callback, doc_index));
        self
    }

    /// Run the loop for `path` routed to `tier`.
    ///
    /// Terminates after at most `max_retries + 1` parser invocations.
    pub async fn run(&self, path: &Path, tier: ComplexityTier) -> RetryOutcome {
        let profile = self.table.profile(tier);
        let mut parser = profile.primary_parser;
        let mut retry_count = 0u32;
        let mut attempts = Vec::new();

        loop {
            let (content, failure, tokens) = self.invoke(parser, path, retry_count).await;
            let score = quality::score(&content.raw_text, content.parser_confidence);
            let decision = self.gate.evaluate(&score, retry_count);

            let mut state = decision.state();
            let mut exhaustion = None;
            let mut next = None;
            match state {
                GateState::Passed => {}
                GateState::Exhausted => exhaustion = Some(ExhaustionCause::RetryBudget),
                GateState::Retrying => match profile.fallback_parsers.get(retry_count as usize) {
                    Some(&fallback) => next = Some(fallback),
                    None => {
                        state = GateState::Exhausted;
                        exhaustion = Some(ExhaustionCause::FallbackChain);
                    }
                },
            }

            debug!(
                "{} attempt {} with {}: completeness {:.2}, structure {:.2}, confidence {:.2}, overall {:.3} → {}",
                tier,
                retry_count,
                parser,
                score.completeness,
                score.structure,
                score.confidence,
                score.overall,
                state
            );
            if let Some((cb, idx)) = &self.progress {
                cb.on_attempt_scored(*idx, retry_count, parser, score.overall, state);
            }

            attempts.push(AttemptRecord {
                attempt: retry_count,
                parser,
                used_fallback: content.used_fallback,
                parse_duration_s: content.parse_duration_s,
                text_chars: content.raw_text.chars().count(),
                score,
                state,
                input_tokens: tokens.0,
                output_tokens: tokens.1,
                failure,
            });

            match (state, next) {
                (GateState::Retrying, Some(fallback)) => {
                    warn!(
                        "Quality {:.3} below {:.2} with {}; retrying with {} ({}/{})",
                        score.overall,
                        self.gate.threshold,
                        parser,
                        fallback,
                        retry_count + 1,
                        self.gate.max_retries
                    );
                    parser = fallback;
                    retry_count += 1;
                }
                _ => {
                    match exhaustion {
                        None => info!(
                            "Quality gate passed for {} with {} (overall {:.3})",
                            tier, parser, score.overall
                        ),
                        Some(ExhaustionCause::RetryBudget) => warn!(
                            "Quality gate exhausted for {} after {} retries (overall {:.3})",
                            tier, retry_count, score.overall
                        ),
                        Some(ExhaustionCause::FallbackChain) => warn!(
                            "No fallback parser left for {} after {} retries (overall {:.3})",
                            tier, retry_count, score.overall
                        ),
                    }
                    return RetryOutcome {
                        content,
                        score,
                        decision,
                        state,
                        exhaustion,
                        attempts,
                    };
                }
            }
        }
    }

    /// Invoke one parser, turning a failure into empty zero-confidence content.
    async fn invoke(
        &self,
        parser: ParserKind,
        path: &Path,
        retry_count: u32,
    ) -> (ParsedContent, Option<ParseFailure>, (usize, usize)) {
        let start = Instant::now();
        let result = self.registry.invoke(parser, path).await;
        let parse_duration_s = start.elapsed().as_secs_f64();

        let used_fallback = retry_count > 0;
        match result {
            Ok(out) => (
                ParsedContent {
                    parser_used: parser,
                    raw_text: out.text,
                    parser_confidence: out.confidence.clamp(0.0, 1.0),
                    parse_duration_s,
                    retry_count,
                    used_fallback,
                },
                None,
                (out.input_tokens, out.output_tokens),
            ),
            Err(e) => {
                warn!("{} parser failed on {}: {}", parser, path.display(), e);
                (
                    ParsedContent {
                        parser_used: parser,
                        raw_text: String::new(),
                        parser_confidence: 0.0,
                        parse_duration_s,
                        retry_count,
                        used_fallback,
                    },
                    Some(e),
                    (0, 0),
                )
            }
        }
    }
}

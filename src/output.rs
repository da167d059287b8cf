//! Result types returned by the ingest entry points.
//!
//! Everything here is `Serialize` so the CLI can write one JSON outcome per
//! document and a caller can diff two runs.

use crate::error::ParseFailure;
use crate::pipeline::chunk::{Chunk, ChunkReport};
use crate::pipeline::features::{FeatureVector, FileMetadata};
use crate::pipeline::gate::GateState;
use crate::pipeline::quality::QualityScore;
use crate::pipeline::retry::{ExhaustionCause, ParsedContent};
use crate::pipeline::tier::{ComplexityTier, ParserKind};
use serde::{Deserialize, Serialize};

/// One parser invocation as seen by the quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 0 for the primary parser, `n` for the n-th retry.
    pub attempt: u32,
    pub parser: ParserKind,
    pub used_fallback: bool,
    pub parse_duration_s: f64,
    pub text_chars: usize,
    pub score: QualityScore,
    pub state: GateState,
    /// VLM tokens spent, zero for local parsers.
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Set when the parser itself failed and was scored as empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ParseFailure>,
}

/// Timing and volume figures for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub attempts: usize,
    pub retries: usize,
    pub accepted_chars: usize,
    pub chunk_count: usize,
    pub total_input_tokens: usize,
    pub total_output_tokens: usize,
    pub inspect_duration_ms: u64,
    pub parse_duration_ms: u64,
    pub chunk_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything the pipeline learned and produced for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    /// Path as given by the caller.
    pub source: String,
    pub metadata: FileMetadata,
    pub features: FeatureVector,
    pub tier: ComplexityTier,
    pub tier_name: String,
    /// The accepted parse, or the last one when the gate ended exhausted.
    pub content: ParsedContent,
    pub score: QualityScore,
    pub gate_state: GateState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhaustion: Option<ExhaustionCause>,
    pub attempts: Vec<AttemptRecord>,
    pub chunks: Vec<Chunk>,
    pub chunk_report: ChunkReport,
    /// Non-fatal annotations for downstream consumers.
    pub warnings: Vec<String>,
    pub stats: IngestStats,
}

impl DocumentOutcome {
    /// `true` when the accepted content cleared the quality threshold.
    pub fn passed(&self) -> bool {
        self.gate_state == GateState::Passed
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Routing decision for a document without parsing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionReport {
    pub metadata: FileMetadata,
    pub features: FeatureVector,
    pub tier: ComplexityTier,
    pub tier_name: String,
    pub primary_parser: ParserKind,
    pub fallback_parsers: Vec<ParserKind>,
    pub expected_processing_seconds: f64,
}

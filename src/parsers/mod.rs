//! Parser collaborators: turn a file into text plus a confidence.
//!
//! The pipeline never calls a parser directly. It asks the
//! [`ParserRegistry`] for the parser a tier names, so tests (and callers
//! with their own extraction backends) can swap any of the three standard
//! parsers for their own [`DocumentParser`].
//!
//! ```text
//! TierTable ──names──▶ ParserKind ──registry──▶ Arc<dyn DocumentParser>
//! ```
//!
//! The registry is checked against the tier table before any document is
//! processed; a table that routes to an unregistered parser is a
//! configuration error, not a per-document failure.

pub mod tabular;
pub mod text_layer;
pub mod vision;

use crate::config::IngestConfig;
use crate::error::{IngestError, ParseFailure};
use crate::pipeline::tier::{ParserKind, TierTable};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub use tabular::TabularParser;
pub use text_layer::TextLayerParser;
pub use vision::VisionParser;

/// Text extracted by one parser invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserOutput {
    pub text: String,
    /// Parser-reported confidence in `[0, 1]`.
    pub confidence: f64,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl ParserOutput {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// A document-to-text extraction strategy.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Which tier-table slot this parser fills.
    fn kind(&self) -> ParserKind;

    /// Extract text from the file at `path`.
    async fn parse(&self, path: &Path) -> Result<ParserOutput, ParseFailure>;
}

/// Maps each [`ParserKind`] to the parser that serves it.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: BTreeMap<ParserKind, Arc<dyn DocumentParser>>,
}

impl fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("parsers", &self.parsers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ParserRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The text-layer, vision and tabular parsers, configured from `config`.
    pub fn standard(config: &IngestConfig) -> Self {
        Self::new()
            .with(Arc::new(TextLayerParser::new(config)))
            .with(Arc::new(VisionParser::new(config)))
            .with(Arc::new(TabularParser::new()))
    }

    /// Register a parser under its own kind, replacing any previous one.
    pub fn with(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.register(parser);
        self
    }

    pub fn register(&mut self, parser: Arc<dyn DocumentParser>) {
        self.parsers.insert(parser.kind(), parser);
    }

    pub fn get(&self, kind: ParserKind) -> Option<&Arc<dyn DocumentParser>> {
        self.parsers.get(&kind)
    }

    pub fn contains(&self, kind: ParserKind) -> bool {
        self.parsers.contains_key(&kind)
    }

    /// Check that every parser the table can route to is registered.
    ///
    /// # Errors
    /// [`IngestError::ParserNotRegistered`] naming the first tier that
    /// references a missing parser.
    pub fn validate(&self, table: &TierTable) -> Result<(), IngestError> {
        for (tier, profile) in table.iter() {
            if let Some(missing) = profile.parsers().find(|k| !self.contains(*k)) {
                return Err(IngestError::ParserNotRegistered {
                    tier: tier.to_string(),
                    parser: missing.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Run the parser registered for `kind`.
    pub async fn invoke(&self, kind: ParserKind, path: &Path) -> Result<ParserOutput, ParseFailure> {
        match self.get(kind) {
            Some(parser) => parser.parse(path).await,
            None => Err(ParseFailure::NotRegistered(kind.to_string())),
        }
    }
}

//! Pipeline stages for document ingestion.
//!
//! Each submodule implements one step and is testable on its own; only
//! [`retry`] knows about parsers, and it reaches them through
//! [`crate::parsers::ParserRegistry`].
//!
//! ## Data Flow
//!
//! ```text
//! features ──▶ tier ──▶ retry ─────────────────────▶ chunk
//! (inspect)  (classify)  │  parse ▶ quality ▶ gate  (record-aware split)
//!                        └──────◀── fallback ◀──┘
//! ```
//!
//! 1. [`features`]: inspect the file, validate limits, build the feature vector
//! 2. [`tier`]: route the feature vector to one of eleven complexity tiers
//! 3. [`retry`]: run the tier's parsers until the quality gate passes
//!    or the retry budget is spent
//! 4. [`quality`]: completeness / structure / confidence scoring
//! 5. [`gate`]: pass / retry / exhausted decision
//! 6. [`chunk`]: split accepted text without breaking purchase-order items
//! 7. [`postprocess`]: cleanup rules applied to vision output

pub mod chunk;
pub mod features;
pub mod gate;
pub mod postprocess;
pub mod quality;
pub mod retry;
pub mod tier;

//! Multi-dimensional quality scoring of parsed text.
//!
//! Three independent sub-scores feed one weighted score:
//!
//! | Dimension    | Baseline | Direction   | Weight |
//! |--------------|----------|-------------|--------|
//! | completeness | 0.0      | additive    | 0.4    |
//! | confidence   | parser   | as reported | 0.3    |
//! | structure    | 1.0      | subtractive | 0.3    |
//!
//! Completeness rewards text that looks like a purchase order (length,
//! domain vocabulary, line-item markers, line count). Structure penalises
//! the shapes broken extraction tends to produce: mostly blank lines,
//! shredded one-word lines, symbol soup, OCR filler tokens.
//!
//! Everything here is a pure function of its inputs.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const WEIGHT_COMPLETENESS: f64 = 0.4;
const WEIGHT_CONFIDENCE: f64 = 0.3;
const WEIGHT_STRUCTURE: f64 = 0.3;

/// Characters that do not count as "special" in the symbol-ratio check.
const PLAIN_PUNCTUATION: &str = " \n\t.,;:-";

const OCR_ARTIFACTS: [&str; 5] = ["###", "~~~", "***", "...", "???"];

// ── Regex patterns ───────────────────────────────────────────────────────

/// Item-type nouns, metric thread sizes, quantity words, material words,
/// class-code words. Each class present adds 0.1.
static KEYWORD_CLASSES: Lazy<[Regex; 5]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\b(?:parafuso|porca|arruela|bucha|chumbador)\b").unwrap(),
        Regex::new(r"(?i)\bM\d+\b").unwrap(),
        Regex::new(r"(?i)\b(?:quantidade|qtd|qty)\b").unwrap(),
        Regex::new(r"(?i)\b(?:material|aço|inox)\b").unwrap(),
        Regex::new(r"(?i)\b(?:classe|class)\b").unwrap(),
    ]
});

/// Numbered list entries, `Item N` headers, pipe-table cells.
static LINE_ITEM_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"(?m)^\s*\d+[.)]\s+").unwrap(),
        Regex::new(r"(?m)^\s*(?:Item|ITEM)\s+\d+").unwrap(),
        Regex::new(r"\|\s*\w+\s*\|").unwrap(),
    ]
});

/// The three sub-scores and their weighted combination, all in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub completeness: f64,
    pub structure: f64,
    pub confidence: f64,
    pub overall: f64,
}

impl QualityScore {
    /// Combine sub-scores; inputs are clamped to `[0, 1]`.
    pub fn from_parts(completeness: f64, confidence: f64, structure: f64) -> Self {
        let completeness = clamp_unit(completeness);
        let confidence = clamp_unit(confidence);
        let structure = clamp_unit(structure);
        Self {
            completeness,
            structure,
            confidence,
            overall: WEIGHT_COMPLETENESS * completeness
                + WEIGHT_CONFIDENCE * confidence
                + WEIGHT_STRUCTURE * structure,
        }
    }

    /// Score for a parse that produced nothing usable.
    pub fn zero() -> Self {
        Self::from_parts(0.0, 0.0, 0.0)
    }
}

/// Score a parser's text together with the confidence it reported.
pub fn score(text: &str, parser_confidence: f64) -> QualityScore {
    QualityScore::from_parts(completeness(text), parser_confidence, structure(text))
}

/// Additive completeness heuristic, capped at 1.0.
pub fn completeness(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    let mut s = 0.0;

    let len = text.chars().count();
    if len > 100 {
        s += 0.2;
    }
    if len > 500 {
        s += 0.1;
    }

    let keyword_hits = KEYWORD_CLASSES.iter().filter(|re| re.is_match(text)).count();
    s += (keyword_hits as f64 * 0.1).min(0.4);

    if LINE_ITEM_PATTERNS.iter().any(|re| re.is_match(text)) {
        s += 0.1;
    }

    let newlines = text.matches('\n').count();
    if newlines > 5 {
        s += 0.1;
    }
    if newlines > 20 {
        s += 0.1;
    }

    s.min(1.0)
}

/// Subtractive structure heuristic, floored at 0.0.
pub fn structure(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    let mut s = 1.0;

    let lines: Vec<&str> = text.split('\n').collect();
    let non_empty: Vec<&str> = lines.iter().copied().filter(|l| !l.trim().is_empty()).collect();

    let empty_ratio = 1.0 - non_empty.len() as f64 / lines.len() as f64;
    if empty_ratio > 0.7 {
        s -= 0.3;
    } else if empty_ratio > 0.5 {
        s -= 0.1;
    }

    if !non_empty.is_empty() {
        let total: usize = non_empty.iter().map(|l| l.chars().count()).sum();
        let avg = total as f64 / non_empty.len() as f64;
        if avg < 10.0 {
            s -= 0.2;
        } else if avg > 200.0 {
            s -= 0.1;
        }
    }

    let total_chars = text.chars().count();
    let special = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !PLAIN_PUNCTUATION.contains(*c))
        .count();
    let special_ratio = special as f64 / total_chars as f64;
    if special_ratio > 0.3 {
        s -= 0.3;
    } else if special_ratio > 0.2 {
        s -= 0.1;
    }

    let artifacts: usize = OCR_ARTIFACTS.iter().map(|a| text.matches(*a).count()).sum();
    if artifacts > 10 {
        s -= 0.2;
    }

    f64::max(s, 0.0)
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

//! Complexity tiers, the tier table, and the classifier that picks a tier.
//!
//! Eleven ordered tiers cover everything from a clean CSV export to a
//! damaged scan. Each tier names one primary parser and an ordered chain of
//! fallbacks; the retry orchestrator walks that chain when the quality gate
//! rejects a parse.
//!
//! The table is read-only after construction and shared through an `Arc`,
//! so concurrent documents read it without locking. A custom table may be
//! loaded from JSON; it is validated completely on load so that a typo in a
//! tier or parser id aborts the run before the first document is touched.

use crate::error::IngestError;
use crate::pipeline::features::{FeatureVector, FileFormat};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

// ── Parser identifiers ───────────────────────────────────────────────────

/// The parser strategies a tier can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// Layout-aware text-layer extraction (docling-equivalent).
    TextLayer,
    /// Vision-model OCR over page images.
    Vision,
    /// Spreadsheet / CSV reader.
    Tabular,
}

impl ParserKind {
    pub const ALL: [ParserKind; 3] = [ParserKind::TextLayer, ParserKind::Vision, ParserKind::Tabular];

    pub fn as_str(self) -> &'static str {
        match self {
            ParserKind::TextLayer => "text_layer",
            ParserKind::Vision => "vision",
            ParserKind::Tabular => "tabular",
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParserKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text_layer" | "docling" => Ok(ParserKind::TextLayer),
            "vision" | "gemini" => Ok(ParserKind::Vision),
            "tabular" | "pandas" => Ok(ParserKind::Tabular),
            _ => Err(IngestError::UnknownParser(s.to_string())),
        }
    }
}

// ── Tiers ────────────────────────────────────────────────────────────────

/// One of the eleven ordered complexity classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComplexityTier {
    #[serde(rename = "tier_1")]
    Tier1,
    #[serde(rename = "tier_2")]
    Tier2,
    #[serde(rename = "tier_3")]
    Tier3,
    #[serde(rename = "tier_4")]
    Tier4,
    #[serde(rename = "tier_5")]
    Tier5,
    #[serde(rename = "tier_6")]
    Tier6,
    #[serde(rename = "tier_7")]
    Tier7,
    #[serde(rename = "tier_8")]
    Tier8,
    #[serde(rename = "tier_9")]
    Tier9,
    #[serde(rename = "tier_10")]
    Tier10,
    #[serde(rename = "tier_11")]
    Tier11,
}

impl ComplexityTier {
    pub const ALL: [ComplexityTier; 11] = [
        ComplexityTier::Tier1,
        ComplexityTier::Tier2,
        ComplexityTier::Tier3,
        ComplexityTier::Tier4,
        ComplexityTier::Tier5,
        ComplexityTier::Tier6,
        ComplexityTier::Tier7,
        ComplexityTier::Tier8,
        ComplexityTier::Tier9,
        ComplexityTier::Tier10,
        ComplexityTier::Tier11,
    ];

    /// 1-based tier number.
    pub fn number(self) -> usize {
        self.index() + 1
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn id(self) -> String {
        format!("tier_{}", self.number())
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier_{}", self.number())
    }
}

impl FromStr for ComplexityTier {
    type Err = IngestError;

    /// Accepts `tier_7`, `tier7` and a bare `7`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        let digits = t
            .strip_prefix("tier_")
            .or_else(|| t.strip_prefix("tier"))
            .unwrap_or(&t);
        digits
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=11).contains(n))
            .map(|n| ComplexityTier::ALL[n - 1])
            .ok_or_else(|| IngestError::UnknownTier(s.to_string()))
    }
}

// ── Tier table ───────────────────────────────────────────────────────────

/// Static routing information for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierProfile {
    pub display_name: String,
    pub primary_parser: ParserKind,
    /// Tried in order, one per retry.
    pub fallback_parsers: Vec<ParserKind>,
    pub expected_processing_seconds: f64,
}

impl TierProfile {
    fn new(
        display_name: &str,
        primary_parser: ParserKind,
        fallback_parsers: &[ParserKind],
        expected_processing_seconds: f64,
    ) -> Self {
        Self {
            display_name: display_name.to_string(),
            primary_parser,
            fallback_parsers: fallback_parsers.to_vec(),
            expected_processing_seconds,
        }
    }

    /// Primary parser first, then every fallback.
    pub fn parsers(&self) -> impl Iterator<Item = ParserKind> + '_ {
        std::iter::once(self.primary_parser).chain(self.fallback_parsers.iter().copied())
    }
}

/// Complete, validated mapping from every tier to its profile.
#[derive(Debug, Clone, PartialEq)]
pub struct TierTable {
    profiles: Vec<TierProfile>,
}

static BUILTIN: Lazy<Arc<TierTable>> = Lazy::new(|| Arc::new(TierTable::builtin()));

impl Default for TierTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TierTable {
    /// The built-in routing table.
    pub fn builtin() -> Self {
        use ParserKind::{Tabular, TextLayer, Vision};
        let profiles = vec![
            TierProfile::new("Simple Structured CSV", Tabular, &[TextLayer], 1.0),
            TierProfile::new("Simple Excel Spreadsheet", Tabular, &[TextLayer], 2.0),
            TierProfile::new("Standard PDF with Text", TextLayer, &[Vision, Tabular], 3.0),
            TierProfile::new("PDF with Embedded Tables", TextLayer, &[Vision], 5.0),
            TierProfile::new("PDF with Images/Charts", TextLayer, &[Vision], 7.0),
            TierProfile::new("Multi-page Complex PDF", TextLayer, &[Vision], 10.0),
            TierProfile::new("Scanned PDF (OCR Needed)", Vision, &[TextLayer], 15.0),
            TierProfile::new("Poor Quality Scanned PDF", Vision, &[TextLayer], 20.0),
            TierProfile::new("Handwritten Documents", Vision, &[], 25.0),
            TierProfile::new("Mixed Format Documents", Vision, &[TextLayer], 25.0),
            TierProfile::new("Corrupted or Damaged Files", Vision, &[TextLayer, Tabular], 30.0),
        ];
        Self { profiles }
    }

    /// Process-wide handle to the built-in table.
    pub fn shared() -> Arc<TierTable> {
        Arc::clone(&BUILTIN)
    }

    /// Load a table from JSON of the form
    /// `{"tier_1": {"display_name": …, "primary_parser": "tabular", "fallback_parsers": […], "expected_processing_seconds": 1.0}, …}`.
    ///
    /// # Errors
    /// [`IngestError::InvalidTierTable`] for malformed JSON or a missing tier,
    /// [`IngestError::UnknownTier`] / [`IngestError::UnknownParser`] for ids
    /// that do not exist.
    pub fn from_json_str(json: &str) -> Result<Self, IngestError> {
        #[derive(Deserialize)]
        struct RawProfile {
            display_name: String,
            primary_parser: String,
            #[serde(default)]
            fallback_parsers: Vec<String>,
            #[serde(default)]
            expected_processing_seconds: f64,
        }

        let raw: BTreeMap<String, RawProfile> = serde_json::from_str(json)
            .map_err(|e| IngestError::InvalidTierTable(e.to_string()))?;

        let mut slots: Vec<Option<TierProfile>> = vec![None; ComplexityTier::ALL.len()];
        for (tier_id, p) in raw {
            let tier: ComplexityTier = tier_id.parse()?;
            let fallback_parsers = p
                .fallback_parsers
                .iter()
                .map(|s| s.parse())
                .collect::<Result<Vec<ParserKind>, _>>()?;
            slots[tier.index()] = Some(TierProfile {
                display_name: p.display_name,
                primary_parser: p.primary_parser.parse()?,
                fallback_parsers,
                expected_processing_seconds: p.expected_processing_seconds.max(0.0),
            });
        }

        let mut profiles = Vec::with_capacity(slots.len());
        for (tier, slot) in ComplexityTier::ALL.iter().zip(slots) {
            match slot {
                Some(p) => profiles.push(p),
                None => {
                    return Err(IngestError::InvalidTierTable(format!(
                        "missing entry for {tier}"
                    )))
                }
            }
        }
        Ok(Self { profiles })
    }

    pub fn profile(&self, tier: ComplexityTier) -> &TierProfile {
        &self.profiles[tier.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComplexityTier, &TierProfile)> {
        ComplexityTier::ALL.iter().copied().zip(self.profiles.iter())
    }

    /// Every parser the table can route to.
    pub fn referenced_parsers(&self) -> Vec<ParserKind> {
        let mut kinds: Vec<ParserKind> = self.profiles.iter().flat_map(|p| p.parsers()).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

// ── Classifier ───────────────────────────────────────────────────────────

/// Map a feature vector to a tier. First matching rule wins.
pub fn classify(features: &FeatureVector) -> ComplexityTier {
    use ComplexityTier::*;

    let size = features.size_mb;
    let pages = features.page_count;

    let tier = match features.format {
        FileFormat::Csv => Tier1,
        FileFormat::Xlsx if size < 5.0 && pages == 0 => Tier2,
        FileFormat::Xlsx => {
            if size > 10.0 {
                Tier4
            } else {
                Tier2
            }
        }
        _ if features.is_image_format => {
            if size > 5.0 {
                Tier8
            } else {
                Tier7
            }
        }
        FileFormat::Pdf => {
            if pages <= 5 && size < 2.0 {
                Tier3
            } else if pages <= 10 && size < 5.0 {
                Tier4
            } else if pages <= 20 && size > 5.0 {
                Tier5
            } else if pages > 20 {
                Tier6
            } else if size > 50.0 {
                Tier8
            } else if size > 20.0 {
                Tier7
            } else {
                Tier3
            }
        }
        _ => Tier11,
    };

    debug!(
        "Classified {} ({:.2} MB, {} pages) as {}",
        features.format, size, pages, tier
    );
    tier
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(format: FileFormat, size_mb: f64, pages: usize) -> FeatureVector {
        FeatureVector::new(format, size_mb, pages, 0)
    }

    #[test]
    fn csv_is_always_tier_1() {
        for (size, pages) in [(0.0, 0), (99.0, 0), (3.0, 400)] {
            assert_eq!(classify(&fv(FileFormat::Csv, size, pages)), ComplexityTier::Tier1);
        }
    }

    #[test]
    fn xlsx_rules() {
        assert_eq!(classify(&fv(FileFormat::Xlsx, 1.0, 0)), ComplexityTier::Tier2);
        assert_eq!(classify(&fv(FileFormat::Xlsx, 7.0, 0)), ComplexityTier::Tier2);
        assert_eq!(classify(&fv(FileFormat::Xlsx, 12.0, 0)), ComplexityTier::Tier4);
    }

    #[test]
    fn image_rules() {
        assert_eq!(classify(&fv(FileFormat::Png, 1.0, 0)), ComplexityTier::Tier7);
        assert_eq!(classify(&fv(FileFormat::Jpg, 6.0, 0)), ComplexityTier::Tier8);
    }

    #[test]
    fn pdf_rules_in_order() {
        assert_eq!(classify(&fv(FileFormat::Pdf, 1.5, 3)), ComplexityTier::Tier3);
        assert_eq!(classify(&fv(FileFormat::Pdf, 3.0, 8)), ComplexityTier::Tier4);
        assert_eq!(classify(&fv(FileFormat::Pdf, 8.0, 15)), ComplexityTier::Tier5);
        assert_eq!(classify(&fv(FileFormat::Pdf, 1.0, 40)), ComplexityTier::Tier6);
        // ≤ 20 pages but neither small nor > 5 MB
        assert_eq!(classify(&fv(FileFormat::Pdf, 4.0, 15)), ComplexityTier::Tier3);
    }

    #[test]
    fn pdf_zero_pages_falls_to_size_rules() {
        // page count unknown: the ≤ 5 / ≤ 10 / ≤ 20 branches decide on size alone
        assert_eq!(classify(&fv(FileFormat::Pdf, 60.0, 0)), ComplexityTier::Tier5);
    }

    #[test]
    fn unknown_format_is_tier_11() {
        let tier = classify(&fv(FileFormat::Unknown, 1.0, 0));
        assert_eq!(tier, ComplexityTier::Tier11);
        let profile = TierTable::builtin().profile(tier).clone();
        assert_eq!(profile.primary_parser, ParserKind::Vision);
        assert_eq!(profile.fallback_parsers.len(), 2);
    }

    #[test]
    fn tier_3_has_text_layer_primary_and_fallbacks() {
        let table = TierTable::builtin();
        let p = table.profile(ComplexityTier::Tier3);
        assert_eq!(p.primary_parser, ParserKind::TextLayer);
        assert!(!p.fallback_parsers.is_empty());
    }

    #[test]
    fn handwritten_tier_has_no_fallbacks() {
        let table = TierTable::builtin();
        assert!(table.profile(ComplexityTier::Tier9).fallback_parsers.is_empty());
    }

    #[test]
    fn tier_ids_round_trip() {
        for tier in ComplexityTier::ALL {
            assert_eq!(tier.id().parse::<ComplexityTier>().unwrap(), tier);
        }
        assert_eq!("7".parse::<ComplexityTier>().unwrap(), ComplexityTier::Tier7);
        assert!("tier_12".parse::<ComplexityTier>().is_err());
        assert!("tier_0".parse::<ComplexityTier>().is_err());
    }

    #[test]
    fn tier_serde_uses_snake_ids() {
        let json = serde_json::to_string(&ComplexityTier::Tier10).unwrap();
        assert_eq!(json, "\"tier_10\"");
    }

    #[test]
    fn parser_kind_parse() {
        assert_eq!("vision".parse::<ParserKind>().unwrap(), ParserKind::Vision);
        assert_eq!("docling".parse::<ParserKind>().unwrap(), ParserKind::TextLayer);
        assert!(matches!(
            "tesseract".parse::<ParserKind>(),
            Err(IngestError::UnknownParser(_))
        ));
    }

    fn builtin_as_json() -> serde_json::Value {
        let table = TierTable::builtin();
        let map: BTreeMap<String, &TierProfile> =
            table.iter().map(|(t, p)| (t.id(), p)).collect();
        serde_json::to_value(map).unwrap()
    }

    #[test]
    fn json_table_loads() {
        let json = builtin_as_json().to_string();
        let table = TierTable::from_json_str(&json).unwrap();
        assert_eq!(table, TierTable::builtin());
    }

    #[test]
    fn json_table_rejects_unknown_parser() {
        let mut v = builtin_as_json();
        v["tier_4"]["fallback_parsers"] = serde_json::json!(["tesseract"]);
        let err = TierTable::from_json_str(&v.to_string()).unwrap_err();
        assert!(matches!(err, IngestError::UnknownParser(ref p) if p == "tesseract"));
        assert!(err.is_configuration());
    }

    #[test]
    fn json_table_rejects_unknown_tier() {
        let mut v = builtin_as_json();
        v["tier_12"] = v["tier_1"].clone();
        let err = TierTable::from_json_str(&v.to_string()).unwrap_err();
        assert!(matches!(err, IngestError::UnknownTier(_)));
    }

    #[test]
    fn json_table_rejects_missing_tier() {
        let mut v = builtin_as_json();
        v.as_object_mut().unwrap().remove("tier_9");
        let err = TierTable::from_json_str(&v.to_string()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidTierTable(ref m) if m.contains("tier_9")));
    }

    #[test]
    fn referenced_parsers_covers_all_three() {
        assert_eq!(TierTable::builtin().referenced_parsers(), ParserKind::ALL.to_vec());
    }
}

//! Record-safe chunking of accepted text.
//!
//! Downstream extraction sees one chunk at a time, so a purchase-order line
//! item cut in half becomes two half-records. The chunker therefore picks
//! one of two strategies per call:
//!
//! * [`ChunkStrategy::Boundaries`]: record starts (`Item 3`, `12.`, `4)`,
//!   `[7]`, `SKU:` …) were found. Whole records are packed into chunks of at
//!   most `max_size` characters. Each new chunk opens with an overlap window
//!   made of whole records taken from just before it. A single record
//!   longer than `max_size` is emitted whole and logged, never split.
//! * [`ChunkStrategy::Recursive`]: no record starts. The text is split on
//!   the first separator of `"\n\n\n"`, `"\n\n"`, `"\n"`, `". "`, `"; "`,
//!   `", "`, `" "` that occurs, pieces are re-merged up to `max_size`, and
//!   only pieces still too long recurse into the next separator. Fixed-width
//!   character slices are the last resort. Chunk `i > 0` is then prefixed
//!   with the trailing `overlap` characters of raw segment `i − 1`.
//!
//! In both strategies the raw segments partition the input, so stripping
//! each chunk's `overlap_with_previous` leading characters and concatenating
//! gives back the input exactly.
//!
//! All sizes are counted in characters; slicing uses byte offsets that
//! always fall on character boundaries.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Chunk counts above this are logged as suspicious.
const MANY_CHUNKS: usize = 50;

/// Separator cascade for the recursive strategy, coarsest first.
const SEPARATORS: [&str; 7] = ["\n\n\n", "\n\n", "\n", ". ", "; ", ", ", " "];

/// Record-start markers. Each match starts at the newline before the record.
static RECORD_STARTS: Lazy<[Regex; 5]> = Lazy::new(|| {
    [
        Regex::new(r"\n\s*(?:Item|ITEM)\s+\d+").unwrap(),
        Regex::new(r"\n\s*\d+\.").unwrap(),
        Regex::new(r"\n\s*\d+\)").unwrap(),
        Regex::new(r"\n\s*\[\d+\]").unwrap(),
        Regex::new(r"\n\s*(?:SKU|Part|Material|Tipo|Código):").unwrap(),
    ]
});

/// One bounded slice of accepted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `chunk_0000`, `chunk_0001`, …
    pub id: String,
    pub index: usize,
    pub text: String,
    pub char_length: usize,
    /// Leading characters of `text` repeated from the previous chunk.
    pub overlap_with_previous: usize,
    pub starts_on_boundary: bool,
}

impl Chunk {
    fn new(index: usize, text: String, overlap_with_previous: usize, starts_on_boundary: bool) -> Self {
        Self {
            id: format!("chunk_{:04}", index),
            index,
            char_length: text.chars().count(),
            text,
            overlap_with_previous,
            starts_on_boundary,
        }
    }

    /// The part of `text` not repeated from the previous chunk.
    pub fn new_content(&self) -> &str {
        let cut = byte_offset_of_char(&self.text, self.overlap_with_previous);
        &self.text[cut..]
    }
}

/// How a given text will be segmented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Sorted, deduplicated byte offsets including `0` and `text.len()`.
    Boundaries(Vec<usize>),
    Recursive,
}

/// Splits text into [`Chunk`]s of at most `max_size` characters plus overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(3500, 250)
    }
}

impl Chunker {
    /// `max_size` is raised to 1; `overlap` is capped below `max_size`.
    pub fn new(max_size: usize, overlap: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            overlap: overlap.min(max_size - 1),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Choose the strategy for `text`.
    pub fn plan(&self, text: &str) -> ChunkStrategy {
        let starts = detect_record_starts(text);
        if starts.is_empty() {
            return ChunkStrategy::Recursive;
        }
        let mut bounds: BTreeSet<usize> = starts.into_iter().collect();
        bounds.insert(0);
        bounds.insert(text.len());
        ChunkStrategy::Boundaries(bounds.into_iter().collect())
    }

    /// Split `text` into ordered, non-empty chunks. Empty text yields none.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let chunks = match self.plan(text) {
            ChunkStrategy::Boundaries(bounds) => {
                debug!("Chunking on {} record boundaries", bounds.len().saturating_sub(2));
                self.pack_records(text, &bounds)
            }
            ChunkStrategy::Recursive => {
                debug!("No record boundaries; splitting on separators");
                self.split_with_overlap(text)
            }
        };

        for c in chunks.iter().filter(|c| c.char_length > self.max_size + self.overlap) {
            warn!(
                "{} holds a single record of {} chars (limit {}); kept whole",
                c.id, c.char_length, self.max_size
            );
        }
        if chunks.len() > MANY_CHUNKS {
            warn!("Text produced {} chunks (more than {})", chunks.len(), MANY_CHUNKS);
        }
        info!(
            "Chunked {} chars into {} chunks (max {}, overlap {})",
            text.chars().count(),
            chunks.len(),
            self.max_size,
            self.overlap
        );
        chunks
    }

    // ── Boundary strategy ────────────────────────────────────────────────

    fn pack_records(&self, text: &str, bounds: &[usize]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0usize;
        let mut current_overlap = 0usize;

        for pair in bounds.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let seg = &text[start..end];
            let seg_chars = seg.chars().count();

            if current_chars + seg_chars <= self.max_size {
                current.push_str(seg);
                current_chars += seg_chars;
                continue;
            }

            if !current.is_empty() {
                let index = chunks.len();
                chunks.push(Chunk::new(index, std::mem::take(&mut current), current_overlap, true));
            }

            let from = self.overlap_start(text, bounds, start, seg_chars);
            let window = &text[from..start];
            current_overlap = window.chars().count();
            current.push_str(window);
            current.push_str(seg);
            current_chars = current_overlap + seg_chars;
        }

        if !current.is_empty() {
            let index = chunks.len();
            chunks.push(Chunk::new(index, current, current_overlap, true));
        }
        chunks
    }

    /// Byte offset where the overlap window before `chunk_start` begins.
    ///
    /// Starts `overlap` characters back and snaps to the previous record
    /// start. When that would take the chunk past `max_size + overlap`, snaps
    /// forward to the next record start instead, and drops the window
    /// entirely when even that does not fit.
    fn overlap_start(&self, text: &str, bounds: &[usize], chunk_start: usize, seg_chars: usize) -> usize {
        if self.overlap == 0 || chunk_start == 0 {
            return chunk_start;
        }
        let limit = self.max_size + self.overlap;
        let target = nth_char_back(&text[..chunk_start], self.overlap);
        let fits = |from: usize| text[from..chunk_start].chars().count() + seg_chars <= limit;

        let back = bounds.iter().rev().copied().find(|&b| b <= target).unwrap_or(0);
        if fits(back) {
            return back;
        }
        bounds
            .iter()
            .copied()
            .find(|&b| b >= target && b < chunk_start)
            .filter(|&b| fits(b))
            .unwrap_or(chunk_start)
    }

    // ── Recursive strategy ───────────────────────────────────────────────

    fn split_with_overlap(&self, text: &str) -> Vec<Chunk> {
        let segments = self.split_recursive(text, &SEPARATORS);

        segments
            .iter()
            .enumerate()
            .map(|(i, seg)| {
                if i == 0 {
                    return Chunk::new(0, (*seg).to_string(), 0, true);
                }
                let prev = segments[i - 1];
                let tail = &prev[nth_char_back(prev, self.overlap)..];
                let starts_on_boundary = SEPARATORS.iter().any(|s| prev.ends_with(*s));
                Chunk::new(
                    i,
                    format!("{tail}{seg}"),
                    tail.chars().count(),
                    starts_on_boundary,
                )
            })
            .collect()
    }

    /// Raw segments whose concatenation is exactly `text`.
    fn split_recursive<'a>(&self, text: &'a str, separators: &[&str]) -> Vec<&'a str> {
        if text.chars().count() <= self.max_size {
            return vec![text];
        }
        let Some((&sep, rest)) = separators.split_first() else {
            return self.slice_fixed(text);
        };
        if !text.contains(sep) {
            return self.split_recursive(text, rest);
        }

        let mut out = Vec::new();
        for piece in self.merge_pieces(text, sep) {
            if piece.chars().count() > self.max_size {
                out.extend(self.split_recursive(piece, rest));
            } else {
                out.push(piece);
            }
        }
        out
    }

    /// Split after every `sep` and greedily re-merge neighbours up to
    /// `max_size`. Pieces are contiguous sub-slices of `text`.
    fn merge_pieces<'a>(&self, text: &'a str, sep: &str) -> Vec<&'a str> {
        let mut merged = Vec::new();
        let (mut start, mut len) = (0usize, 0usize);
        let mut pos = 0usize;

        for piece in text.split_inclusive(sep) {
            let piece_chars = piece.chars().count();
            if len > 0 && len + piece_chars > self.max_size {
                merged.push(&text[start..pos]);
                start = pos;
                len = 0;
            }
            pos += piece.len();
            len += piece_chars;
        }
        if pos > start {
            merged.push(&text[start..pos]);
        }
        merged
    }

    /// Consecutive slices of `max_size − overlap` characters.
    fn slice_fixed<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let step = self.max_size - self.overlap;
        let mut out = Vec::new();
        let mut start = 0usize;
        let mut count = 0usize;
        for (idx, _) in text.char_indices() {
            if count == step {
                out.push(&text[start..idx]);
                start = idx;
                count = 0;
            }
            count += 1;
        }
        if start < text.len() {
            out.push(&text[start..]);
        }
        out
    }
}

/// Chunk `text` with the given limits.
pub fn chunk_text(text: &str, max_size: usize, overlap: usize) -> Vec<Chunk> {
    Chunker::new(max_size, overlap).chunk(text)
}

/// Byte offsets of every record-start marker, sorted and deduplicated.
pub fn detect_record_starts(text: &str) -> Vec<usize> {
    let starts: BTreeSet<usize> = RECORD_STARTS
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.start()))
        .collect();
    starts.into_iter().collect()
}

/// Byte offset of the `n`-th character counted back from the end of `s`
/// (0 when `s` has fewer than `n` characters).
fn nth_char_back(s: &str, n: usize) -> usize {
    if n == 0 {
        return s.len();
    }
    s.char_indices().rev().nth(n - 1).map(|(i, _)| i).unwrap_or(0)
}

fn byte_offset_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

// ── Validation and context helpers ───────────────────────────────────────

/// Sanity report over a chunk sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub total_chunks: usize,
    pub empty_chunks: Vec<usize>,
    pub duplicate_ids: Vec<String>,
    pub min_size: usize,
    pub max_size: usize,
    pub avg_size: f64,
    /// Indices of chunks longer than 1.5 × the configured chunk size.
    pub oversized: Vec<usize>,
    pub is_valid: bool,
}

/// Check a chunk sequence for empty chunks, duplicate ids and outliers.
///
/// Oversized chunks are reported but do not make the sequence invalid;
/// they are the expected result of a single long record.
pub fn validate_chunks(chunks: &[Chunk], chunk_size: usize) -> ChunkReport {
    if chunks.is_empty() {
        return ChunkReport {
            is_valid: true,
            ..Default::default()
        };
    }

    let empty_chunks: Vec<usize> = chunks
        .iter()
        .filter(|c| c.text.trim().is_empty())
        .map(|c| c.index)
        .collect();

    let mut seen = HashSet::new();
    let mut duplicate_ids = Vec::new();
    for c in chunks {
        if !seen.insert(c.id.as_str()) && !duplicate_ids.contains(&c.id) {
            duplicate_ids.push(c.id.clone());
        }
    }

    let sizes: Vec<usize> = chunks.iter().map(|c| c.char_length).collect();
    let limit = chunk_size as f64 * 1.5;
    let oversized: Vec<usize> = chunks
        .iter()
        .filter(|c| c.char_length as f64 > limit)
        .map(|c| c.index)
        .collect();

    ChunkReport {
        total_chunks: chunks.len(),
        is_valid: empty_chunks.is_empty() && duplicate_ids.is_empty(),
        empty_chunks,
        duplicate_ids,
        min_size: sizes.iter().copied().min().unwrap_or(0),
        max_size: sizes.iter().copied().max().unwrap_or(0),
        avg_size: sizes.iter().sum::<usize>() as f64 / sizes.len() as f64,
        oversized,
    }
}

/// Chunk `index` together with up to `radius` neighbours on each side,
/// joined by a horizontal rule. Empty for an out-of-range index.
pub fn chunk_context(chunks: &[Chunk], index: usize, radius: usize) -> String {
    if index >= chunks.len() {
        return String::new();
    }
    let from = index.saturating_sub(radius);
    let to = (index + radius).min(chunks.len() - 1);
    chunks[from..=to]
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_lines(n: usize) -> String {
        (1..=n)
            .map(|i| format!("Item {i}: PARAFUSO M8x30 - 100 UN"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn reassemble(chunks: &[Chunk]) -> String {
        chunks.iter().map(Chunk::new_content).collect()
    }

    fn assert_well_formed(chunks: &[Chunk]) {
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert_eq!(c.id, format!("chunk_{i:04}"));
            assert!(!c.text.is_empty());
            assert_eq!(c.char_length, c.text.chars().count());
        }
        assert_eq!(chunks.first().map(|c| c.overlap_with_previous), Some(0));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 3500, 250).is_empty());
    }

    #[test]
    fn single_short_record_is_one_chunk() {
        let text = "Item 1: PARAFUSO M8x30 - 100 UN";
        let chunks = chunk_text(text, 3500, 250);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].overlap_with_previous, 0);
        assert_eq!(chunks[0].char_length, 31);
    }

    #[test]
    fn two_hundred_items_split_on_records() {
        let text = item_lines(200);
        let chunker = Chunker::new(1000, 100);
        assert!(matches!(chunker.plan(&text), ChunkStrategy::Boundaries(_)));

        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        assert_well_formed(&chunks);
        assert_eq!(reassemble(&chunks), text);
        for c in &chunks {
            assert!(c.char_length <= 1000 + 100, "{} is {} chars", c.id, c.char_length);
            assert!(c.starts_on_boundary);
        }
    }

    #[test]
    fn records_are_never_split() {
        let text = item_lines(120);
        let chunks = chunk_text(&text, 700, 80);
        for c in chunks.iter().skip(1) {
            // new content always begins at a record start
            assert!(c.new_content().starts_with("\nItem "), "{:?}", &c.text[..20]);
            // the overlap window is whole records too
            assert!(c.overlap_with_previous == 0 || c.text.starts_with("\nItem "));
        }
        let mut starts_seen = 0;
        for c in &chunks {
            starts_seen += c.new_content().matches("Item ").count();
        }
        assert_eq!(starts_seen, 120);
    }

    #[test]
    fn boundary_list_includes_ends_and_is_deduped() {
        let text = "Header\n1. Item 1 one\n[2] two";
        match Chunker::default().plan(text) {
            ChunkStrategy::Boundaries(b) => {
                assert_eq!(b.first(), Some(&0));
                assert_eq!(b.last(), Some(&text.len()));
                assert!(b.windows(2).all(|w| w[0] < w[1]));
                assert_eq!(b.len(), 4);
            }
            other => panic!("expected boundaries, got {other:?}"),
        }
    }

    #[test]
    fn oversized_record_is_kept_whole() {
        let long = "x".repeat(500);
        let text = format!("Item 1: short\nItem 2: {long}\nItem 3: short");
        let chunks = chunk_text(&text, 100, 20);
        assert_well_formed(&chunks);
        assert_eq!(reassemble(&chunks), text);
        let big: Vec<&Chunk> = chunks.iter().filter(|c| c.char_length > 120).collect();
        assert_eq!(big.len(), 1);
        assert!(big[0].text.contains(&long));
        assert_eq!(big[0].new_content(), format!("\nItem 2: {long}"));
    }

    #[test]
    fn overlap_window_respects_size_bound() {
        // records of ~60 chars, max 100: backward snap would exceed 100 + 30
        let text = (1..=10)
            .map(|i| format!("Item {i}: {}", "y".repeat(50)))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_text(&text, 100, 30);
        assert_eq!(reassemble(&chunks), text);
        for c in &chunks {
            assert!(c.char_length <= 130, "{} is {}", c.id, c.char_length);
        }
    }

    #[test]
    fn field_labels_are_boundaries() {
        let text = "Pedido\nSKU: 123\nMaterial: aço\nCódigo: 9";
        assert_eq!(detect_record_starts(text).len(), 3);
    }

    #[test]
    fn recursive_round_trip_on_paragraphs() {
        let para = "Condições gerais de fornecimento aplicáveis a este pedido. ".repeat(8);
        let text = [para.as_str(); 6].join("\n\n");
        let chunker = Chunker::new(300, 40);
        assert_eq!(chunker.plan(&text), ChunkStrategy::Recursive);

        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        assert_well_formed(&chunks);
        assert_eq!(reassemble(&chunks), text);
        for c in &chunks {
            assert!(c.char_length <= 340);
        }
    }

    #[test]
    fn overlap_is_tail_of_previous_raw_segment() {
        let text = "alpha beta gamma delta ".repeat(40);
        let chunks = chunk_text(&text, 100, 15);
        for pair in chunks.windows(2) {
            let prev_raw = pair[0].new_content();
            let overlap: String = pair[1].text.chars().take(pair[1].overlap_with_previous).collect();
            assert!(prev_raw.ends_with(&overlap));
            assert_eq!(pair[1].overlap_with_previous, 15);
        }
    }

    #[test]
    fn unbroken_text_falls_back_to_fixed_slices() {
        let text = "é".repeat(250);
        let chunks = chunk_text(&text, 100, 10);
        assert_well_formed(&chunks);
        assert_eq!(reassemble(&chunks), text);
        // 90-char raw slices: 90 + 90 + 70
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].char_length, 100);
        assert!(!chunks[1].starts_on_boundary);
        assert!(chunks.iter().all(|c| c.char_length <= 110));
    }

    #[test]
    fn zero_overlap_has_no_prefixes() {
        let text = "word ".repeat(100);
        let chunks = chunk_text(&text, 50, 0);
        assert!(chunks.iter().all(|c| c.overlap_with_previous == 0));
        assert_eq!(chunks.iter().map(|c| c.text.as_str()).collect::<String>(), text);
    }

    #[test]
    fn overlap_is_capped_below_size() {
        let c = Chunker::new(10, 50);
        assert_eq!(c.overlap(), 9);
        assert_eq!(Chunker::new(0, 0).max_size(), 1);
    }

    #[test]
    fn validate_reports_outliers() {
        let chunks = vec![
            Chunk::new(0, "a".repeat(10), 0, true),
            Chunk::new(1, "b".repeat(200), 0, true),
            Chunk::new(2, "  ".into(), 0, false),
        ];
        let report = validate_chunks(&chunks, 100);
        assert_eq!(report.total_chunks, 3);
        assert_eq!(report.empty_chunks, vec![2]);
        assert_eq!(report.oversized, vec![1]);
        assert_eq!(report.min_size, 2);
        assert_eq!(report.max_size, 200);
        assert!((report.avg_size - 212.0 / 3.0).abs() < 1e-9);
        assert!(!report.is_valid);
    }

    #[test]
    fn validate_detects_duplicate_ids() {
        let mut b = Chunk::new(1, "b".into(), 0, true);
        b.id = "chunk_0000".into();
        let report = validate_chunks(&[Chunk::new(0, "a".into(), 0, true), b], 100);
        assert_eq!(report.duplicate_ids, vec!["chunk_0000".to_string()]);
        assert!(!report.is_valid);
    }

    #[test]
    fn validate_empty_sequence_is_valid() {
        assert!(validate_chunks(&[], 3500).is_valid);
    }

    #[test]
    fn context_joins_neighbours() {
        let chunks: Vec<Chunk> = ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::new(i, t.to_string(), 0, true))
            .collect();
        assert_eq!(chunk_context(&chunks, 1, 1), "a\n\n---\n\nb\n\n---\n\nc");
        assert_eq!(chunk_context(&chunks, 0, 0), "a");
        assert_eq!(chunk_context(&chunks, 3, 5), "a\n\n---\n\nb\n\n---\n\nc\n\n---\n\nd");
        assert_eq!(chunk_context(&chunks, 9, 1), "");
    }
}

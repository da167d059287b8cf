//! Deterministic cleanup of parser text before it is scored.
//!
//! Vision models occasionally wrap their answer in code fences, emit CRLF,
//! or pad pages with page-number footers. Left in place these shift the
//! structure score and can put a fence or a footer in the middle of a
//! chunk. Every rule here is a pure `&str → String` pass.
//!
//! Rules (applied in order):
//! 1. Strip outer markdown fences
//! 2. Normalise line endings (CRLF / CR → LF)
//! 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 4. Trim trailing whitespace per line
//! 5. Drop page-number footer lines ("Page 2 of 5", "Página 2 de 5", "- 2 -")
//! 6. Insert a missing separator row after a pipe-table header
//! 7. Collapse 4+ consecutive newlines to 3
//! 8. Trim leading and trailing blank lines

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to raw parser output.
pub fn clean_text(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = drop_page_footers(&s);
    let s = fix_table_header(&s);
    let s = collapse_blank_lines(&s);
    s.trim_matches('\n').to_string()
}

// ── Rule 1 ───────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|text)?\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2 ───────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3 ───────────────────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 4 ───────────────────────────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5 ───────────────────────────────────────────────────────────────

static RE_PAGE_FOOTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:(?:page|p[áa]gina|p[áa]g\.?)\s*\d+\s*(?:of|de|/)\s*\d+|-\s*\d+\s*-)\s*$")
        .unwrap()
});

fn drop_page_footers(input: &str) -> String {
    input
        .split('\n')
        .filter(|line| !RE_PAGE_FOOTER.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6 ───────────────────────────────────────────────────────────────

/// A table whose first row is not followed by a separator gets one, so
/// downstream table parsers see a header.
fn fix_table_header(input: &str) -> String {
    let lines: Vec<&str> = input.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);

    for (i, line) in lines.iter().enumerate() {
        out.push((*line).to_string());
        let starts_table = is_table_row(line)
            && !is_separator_row(line)
            && (i == 0 || !is_table_row(lines[i - 1]));
        if !starts_table {
            continue;
        }
        if let Some(next) = lines.get(i + 1) {
            if is_table_row(next) && !is_separator_row(next) {
                let cols = line.trim().matches('|').count().saturating_sub(1).max(1);
                out.push(format!("|{}", " --- |".repeat(cols)));
            }
        }
    }

    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

// ── Rule 7 ───────────────────────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").into_owned()
}

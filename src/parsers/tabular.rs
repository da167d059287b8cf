//! CSV / XLSX parser: renders every sheet as a pipe table.
//!
//! Spreadsheets carry their structure explicitly, so this parser reports
//! full confidence; whether the *content* looks like a purchase order is
//! left to the quality scorer.
//!
//! CSV exports from Brazilian ERPs are frequently `;`-separated and
//! latin-1 encoded. The delimiter is sniffed from the first line and
//! cells are decoded lossily rather than rejected.

use crate::error::ParseFailure;
use crate::parsers::{DocumentParser, ParserOutput};
use crate::pipeline::features::FileFormat;
use crate::pipeline::tier::ParserKind;
use async_trait::async_trait;
use calamine::Reader;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

const TABULAR_CONFIDENCE: f64 = 1.0;

/// Reads CSV with the `csv` crate and XLSX with `calamine`.
#[derive(Debug, Clone, Default)]
pub struct TabularParser;

impl TabularParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentParser for TabularParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Tabular
    }

    async fn parse(&self, path: &Path) -> Result<ParserOutput, ParseFailure> {
        let format = FileFormat::from_path(path);
        let path = path.to_path_buf();

        let text = match format {
            FileFormat::Csv => {
                spawn(move || read_csv_rows(&path).map(|rows| render_pipe_table(&rows))).await?
            }
            FileFormat::Xlsx => {
                spawn(move || {
                    let sheets = read_workbook(&path)?;
                    let single = sheets.len() == 1;
                    let rendered: Vec<String> = sheets
                        .iter()
                        .filter(|(_, rows)| !rows.is_empty())
                        .map(|(name, rows)| {
                            if single {
                                render_pipe_table(rows)
                            } else {
                                format!("## {}\n\n{}", name, render_pipe_table(rows))
                            }
                        })
                        .collect();
                    Ok(rendered.join("\n\n"))
                })
                .await?
            }
            other => {
                return Err(ParseFailure::UnsupportedFormat {
                    parser: ParserKind::Tabular.to_string(),
                    format: other.to_string(),
                })
            }
        };

        info!("Tabular parser produced {} chars", text.chars().count());
        Ok(ParserOutput::new(text, TABULAR_CONFIDENCE))
    }
}

async fn spawn<F>(f: F) -> Result<String, ParseFailure>
where
    F: FnOnce() -> Result<String, ParseFailure> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ParseFailure::Tabular(format!("decode task panicked: {e}")))?
}

/// Pick `;`, tab or `,` by whichever occurs most in the first line.
fn sniff_delimiter(path: &Path) -> Result<u8, ParseFailure> {
    let mut first = Vec::new();
    BufReader::new(std::fs::File::open(path)?).read_until(b'\n', &mut first)?;
    let count = |b: u8| first.iter().filter(|&&c| c == b).count();
    let (semi, tab, comma) = (count(b';'), count(b'\t'), count(b','));
    Ok(if semi > comma && semi >= tab {
        b';'
    } else if tab > comma {
        b'\t'
    } else {
        b','
    })
}

/// All CSV records, header row included, as lossily-decoded strings.
pub(crate) fn read_csv_rows(path: &Path) -> Result<Vec<Vec<String>>, ParseFailure> {
    let delimiter = sniff_delimiter(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| ParseFailure::Tabular(e.to_string()))?;

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|e| ParseFailure::Tabular(e.to_string()))?;
        rows.push(
            record
                .iter()
                .map(|cell| String::from_utf8_lossy(cell).trim().to_string())
                .collect(),
        );
    }
    debug!("Read {} CSV rows (delimiter {:?})", rows.len(), delimiter as char);
    Ok(rows)
}

/// Every worksheet as `(name, rows)`, in workbook order.
pub(crate) fn read_workbook(path: &Path) -> Result<Vec<(String, Vec<Vec<String>>)>, ParseFailure> {
    let mut workbook =
        calamine::open_workbook_auto(path).map_err(|e| ParseFailure::Tabular(e.to_string()))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ParseFailure::Tabular(format!("sheet '{name}': {e}")))?;
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string().trim().to_string()).collect())
            .collect();
        debug!("Sheet '{}': {} rows", name, rows.len());
        sheets.push((name, rows));
    }
    Ok(sheets)
}

/// Render rows as a pipe table; the first row is the header.
///
/// Rows with no content are dropped, short rows are padded.
pub fn render_pipe_table(rows: &[Vec<String>]) -> String {
    let rows: Vec<&Vec<String>> = rows
        .iter()
        .filter(|r| r.iter().any(|c| !c.is_empty()))
        .collect();
    let Some(width) = rows.iter().map(|r| r.len()).max() else {
        return String::new();
    };

    let line = |row: &Vec<String>| {
        let cells: Vec<String> = (0..width)
            .map(|i| escape_cell(row.get(i).map(String::as_str).unwrap_or("")))
            .collect();
        format!("| {} |", cells.join(" | "))
    };

    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(line(rows[0]));
    out.push(format!("|{}", " --- |".repeat(width)));
    out.extend(rows[1..].iter().map(|r| line(*r)));
    out.join("\n")
}

fn escape_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Tab-separated plain text of a workbook, used by the text-layer parser.
pub(crate) fn workbook_as_text(path: &Path) -> Result<String, ParseFailure> {
    let sheets = read_workbook(path)?;
    let mut out = Vec::new();
    for (_, rows) in sheets {
        for row in rows {
            if row.iter().any(|c| !c.is_empty()) {
                out.push(row.join("\t"));
            }
        }
    }
    Ok(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        tmp.write_all(content.as_bytes()).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    #[test]
    fn pipe_table_pads_and_skips_blank_rows() {
        let rows = vec![
            vec!["item".to_string(), "desc".to_string(), "qty".to_string()],
            vec!["".to_string(), "".to_string()],
            vec!["1".to_string(), "PORCA M8".to_string()],
        ];
        let table = render_pipe_table(&rows);
        assert_eq!(
            table,
            "| item | desc | qty |\n| --- | --- | --- |\n| 1 | PORCA M8 |  |"
        );
    }

    #[test]
    fn pipe_table_escapes_pipes_and_newlines() {
        let rows = vec![vec!["a|b".to_string(), "x\ny".to_string()]];
        assert_eq!(render_pipe_table(&rows), "| a\\|b | x y |\n| --- | --- |");
    }

    #[test]
    fn empty_rows_render_empty() {
        assert_eq!(render_pipe_table(&[]), "");
    }

    #[test]
    fn semicolon_delimiter_is_sniffed() {
        let tmp = csv_file("item;descricao;qtd\n1;PARAFUSO M8x30, zincado;100\n");
        let rows = read_csv_rows(tmp.path()).unwrap();
        assert_eq!(rows[1], vec!["1", "PARAFUSO M8x30, zincado", "100"]);
    }

    #[test]
    fn latin1_bytes_do_not_fail() {
        let mut tmp = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        tmp.write_all(b"item,material\n1,a\xe7o\n").unwrap();
        tmp.flush().unwrap();
        let rows = read_csv_rows(tmp.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[1][1].starts_with('a'));
    }

    #[tokio::test]
    async fn csv_parses_with_full_confidence() {
        let tmp = csv_file("item,desc,qty\n1,PARAFUSO M8x30,100\n2,PORCA M8,100\n");
        let out = TabularParser::new().parse(tmp.path()).await.unwrap();
        assert_eq!(out.confidence, 1.0);
        assert!(out.text.starts_with("| item | desc | qty |"));
        assert!(out.text.contains("| 2 | PORCA M8 | 100 |"));
    }

    #[tokio::test]
    async fn pdf_is_unsupported() {
        let err = TabularParser::new()
            .parse(Path::new("order.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ParseFailure::UnsupportedFormat { .. }));
    }
}

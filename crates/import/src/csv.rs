use std::collections::HashMap;
use thiserror::Error;

use crate::format::Encoding;

/// The physical properties needed to read a file's header and rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dialect {
    pub encoding: Encoding,
    pub delimiter: u8,
    pub header_skip_lines: usize,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            encoding: Encoding::Utf8,
            delimiter: b',',
            header_skip_lines: 0,
        }
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("File is not valid UTF-8 (first bad byte at offset {0})")]
    InvalidUtf8(usize),
}

/// One data row, keyed by header name. `line` is the 1-based line in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub line: u64,
    cells: HashMap<String, String>,
}

impl RawRow {
    pub fn from_pairs<I, K, V>(line: u64, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut cells = HashMap::new();
        for (k, v) in pairs {
            // Repeated header names keep the leftmost column.
            cells.entry(k.into()).or_insert_with(|| v.into());
        }
        Self { line, cells }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.values().all(|v| v.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRow {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DelimitedTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub malformed: Vec<MalformedRow>,
}

pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<String, CsvError> {
    match encoding {
        Encoding::Utf8 => {
            let text =
                std::str::from_utf8(bytes).map_err(|e| CsvError::InvalidUtf8(e.valid_up_to()))?;
            Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
        }
        Encoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        Encoding::Windows1252 => Ok(bytes.iter().map(|&b| windows_1252_char(b)).collect()),
    }
}

fn windows_1252_char(b: u8) -> char {
    const HIGH: [char; 32] = [
        '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}',
        '\u{2021}', '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}',
        '\u{017D}', '\u{008F}', '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
        '\u{2022}', '\u{2013}', '\u{2014}', '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}',
        '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
    ];
    match b {
        0x80..=0x9F => HIGH[usize::from(b - 0x80)],
        _ => char::from(b),
    }
}

/// Drops the first `n` lines (preamble such as account name or balance).
fn skip_lines(text: &str, n: usize) -> &str {
    let mut rest = text;
    for _ in 0..n {
        match rest.find('\n') {
            Some(idx) => rest = &rest[idx + 1..],
            None => return "",
        }
    }
    rest
}

fn reader<'a>(text: &'a str, dialect: Dialect) -> csv::Reader<&'a [u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(dialect.delimiter)
        .from_reader(skip_lines(text, dialect.header_skip_lines).as_bytes())
}

pub fn read_headers(text: &str, dialect: Dialect) -> Result<Vec<String>, CsvError> {
    let mut reader = reader(text, dialect);
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

pub fn read_table(text: &str, dialect: Dialect) -> Result<DelimitedTable, CsvError> {
    let mut reader = reader(text, dialect);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let offset = dialect.header_skip_lines as u64;

    let mut rows = Vec::new();
    let mut malformed = Vec::new();
    for result in reader.records() {
        match result {
            Ok(record) => {
                let line = record.position().map_or(0, |p| p.line()) + offset;
                let pairs = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.as_str(), v));
                rows.push(RawRow::from_pairs(line, pairs));
            }
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line()) + offset;
                malformed.push(MalformedRow {
                    line,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(DelimitedTable {
        headers,
        rows,
        malformed,
    })
}

//! Named import formats, their versioned column layouts, and version
//! resolution from a file's header row.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::csv::{self as delimited, CsvError, Dialect};

/// Logical transaction fields a format version can map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    DateValue,
    Amount,
    Description,
    Iban,
    Bic,
    RecipientApplicant,
    Account,
}

impl FieldName {
    pub const ALL: [FieldName; 7] = [
        FieldName::DateValue,
        FieldName::Amount,
        FieldName::Description,
        FieldName::Iban,
        FieldName::Bic,
        FieldName::RecipientApplicant,
        FieldName::Account,
    ];

    pub fn key(self) -> &'static str {
        match self {
            FieldName::DateValue => "date_value",
            FieldName::Amount => "amount",
            FieldName::Description => "description",
            FieldName::Iban => "iban",
            FieldName::Bic => "bic",
            FieldName::RecipientApplicant => "recipient_applicant",
            FieldName::Account => "account",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone)]
pub struct RegexSource {
    pub column: String,
    pub pattern: Regex,
}

/// How a logical field is pulled out of a raw row.
#[derive(Debug, Clone)]
pub enum ColumnSpec {
    Direct(String),
    /// First non-empty column, in order.
    NamesFallback(Vec<String>),
    /// All non-empty columns joined with `separator`.
    Join { names: Vec<String>, separator: String },
    /// First match of each pattern in its column, non-empty matches joined with `" | "`.
    RegexSources(Vec<RegexSource>),
    Absent,
}

static ABSENT: ColumnSpec = ColumnSpec::Absent;

impl ColumnSpec {
    pub fn is_absent(&self) -> bool {
        matches!(self, ColumnSpec::Absent)
    }

    /// Physical columns this spec may read from.
    pub fn source_columns(&self) -> Vec<&str> {
        match self {
            ColumnSpec::Direct(name) => vec![name.as_str()],
            ColumnSpec::NamesFallback(names) | ColumnSpec::Join { names, .. } => {
                names.iter().map(String::as_str).collect()
            }
            ColumnSpec::RegexSources(sources) => {
                sources.iter().map(|s| s.column.as_str()).collect()
            }
            ColumnSpec::Absent => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
    Windows1252,
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(Encoding::Latin1),
            "windows-1252" | "cp1252" => Ok(Encoding::Windows1252),
            other => Err(format!("Unknown encoding: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecimalSeparator {
    #[default]
    Dot,
    Comma,
}

impl DecimalSeparator {
    pub fn as_char(self) -> char {
        match self {
            DecimalSeparator::Dot => '.',
            DecimalSeparator::Comma => ',',
        }
    }

    /// The grouping character that goes with this decimal separator.
    pub fn thousands_char(self) -> char {
        match self {
            DecimalSeparator::Dot => ',',
            DecimalSeparator::Comma => '.',
        }
    }
}

impl FromStr for DecimalSeparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "." => Ok(DecimalSeparator::Dot),
            "," => Ok(DecimalSeparator::Comma),
            other => Err(format!("Unsupported decimal separator: '{other}'")),
        }
    }
}

/// One concrete column layout of an [`ImportFormat`].
#[derive(Debug, Clone)]
pub struct FormatVersion {
    pub name: String,
    pub encoding: Encoding,
    pub delimiter: u8,
    pub decimal_separator: DecimalSeparator,
    /// chrono strftime pattern, e.g. `%d.%m.%Y`.
    pub date_format: String,
    pub header_skip_lines: usize,
    /// Used for version detection only.
    pub expected_headers: HashSet<String>,
    pub columns: BTreeMap<FieldName, ColumnSpec>,
}

impl FormatVersion {
    pub fn column(&self, field: FieldName) -> &ColumnSpec {
        self.columns.get(&field).unwrap_or(&ABSENT)
    }

    pub fn dialect(&self) -> Dialect {
        Dialect {
            encoding: self.encoding,
            delimiter: self.delimiter,
            header_skip_lines: self.header_skip_lines,
        }
    }

    fn matches_headers(&self, headers: &HashSet<String>) -> bool {
        self.expected_headers.iter().all(|h| headers.contains(h))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unknown import format: {0}")]
    FormatNotFound(String),
    #[error("No version of format '{format}' is usable (available: {})", .available.join(", "))]
    VersionNotFound { format: String, available: Vec<String> },
}

/// A named, logically stable import format with one or more versions.
#[derive(Debug, Clone)]
pub struct ImportFormat {
    pub name: String,
    pub versions: Vec<FormatVersion>,
    pub default_version: Option<String>,
}

impl ImportFormat {
    pub fn version(&self, name: &str) -> Option<&FormatVersion> {
        self.versions.iter().find(|v| v.name == name)
    }

    pub fn version_names(&self) -> Vec<String> {
        self.versions.iter().map(|v| v.name.clone()).collect()
    }

    fn is_default(&self, version: &FormatVersion) -> bool {
        self.default_version.as_deref() == Some(version.name.as_str())
    }

    /// Picks the version whose expected headers all occur in `headers`.
    ///
    /// The largest qualifying header set wins; equal sizes prefer the default
    /// version, then declaration order. Without any qualifying version the
    /// default version is used, then the first declared one.
    pub fn resolve_version(
        &self,
        headers: &HashSet<String>,
    ) -> Result<&FormatVersion, FormatError> {
        self.select(|v| v.matches_headers(headers))
    }

    /// Resolves the version for raw file content. Each version reads the
    /// header row with its own encoding, delimiter and skip count.
    pub fn resolve_for_bytes(&self, bytes: &[u8]) -> Result<&FormatVersion, FormatError> {
        let mut seen: HashMap<Dialect, HashSet<String>> = HashMap::new();
        self.select(|v| {
            let headers = seen
                .entry(v.dialect())
                .or_insert_with(|| header_set(bytes, v.dialect()).unwrap_or_default());
            v.matches_headers(headers)
        })
    }

    fn select<F>(&self, mut qualifies: F) -> Result<&FormatVersion, FormatError>
    where
        F: FnMut(&FormatVersion) -> bool,
    {
        let mut best: Option<&FormatVersion> = None;
        for version in &self.versions {
            if !qualifies(version) {
                continue;
            }
            best = match best {
                None => Some(version),
                Some(current) => {
                    let (new_len, cur_len) =
                        (version.expected_headers.len(), current.expected_headers.len());
                    if new_len > cur_len || (new_len == cur_len && self.is_default(version)) {
                        Some(version)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        if let Some(version) = best {
            tracing::debug!(format = %self.name, version = %version.name, "header match");
            return Ok(version);
        }

        let fallback = self
            .default_version
            .as_deref()
            .and_then(|name| self.version(name))
            .or_else(|| self.versions.first());

        match fallback {
            Some(version) => {
                tracing::debug!(
                    format = %self.name,
                    version = %version.name,
                    "no version matched the header row, using fallback"
                );
                Ok(version)
            }
            None => Err(FormatError::VersionNotFound {
                format: self.name.clone(),
                available: self.version_names(),
            }),
        }
    }
}

fn header_set(bytes: &[u8], dialect: Dialect) -> Result<HashSet<String>, CsvError> {
    let text = delimited::decode(bytes, dialect.encoding)?;
    Ok(delimited::read_headers(&text, dialect)?.into_iter().collect())
}

/// All formats known to one run. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    formats: BTreeMap<String, ImportFormat>,
}

impl FormatRegistry {
    pub fn new(formats: impl IntoIterator<Item = ImportFormat>) -> Self {
        Self {
            formats: formats.into_iter().map(|f| (f.name.clone(), f)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&ImportFormat, FormatError> {
        self.formats
            .get(name)
            .ok_or_else(|| FormatError::FormatNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    pub fn resolve_version(
        &self,
        format_name: &str,
        headers: &HashSet<String>,
    ) -> Result<&FormatVersion, FormatError> {
        self.get(format_name)?.resolve_version(headers)
    }
}

use regex::Regex;
use std::collections::BTreeMap;

use crate::csv::RawRow;
use crate::format::{ColumnSpec, FieldName, FormatVersion};

const REGEX_JOINER: &str = " | ";

/// Pulls one logical field out of `row`. Returns an empty string when the
/// field is absent or no source column produced a value.
pub fn extract(row: &RawRow, spec: &ColumnSpec) -> String {
    match spec {
        ColumnSpec::Direct(name) => cell(row, name).to_string(),
        ColumnSpec::NamesFallback(names) => names
            .iter()
            .map(|n| cell(row, n))
            .find(|v| !v.is_empty())
            .unwrap_or_default()
            .to_string(),
        ColumnSpec::Join { names, separator } => names
            .iter()
            .map(|n| cell(row, n))
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(separator),
        ColumnSpec::RegexSources(sources) => sources
            .iter()
            .filter_map(|s| first_match(&s.pattern, cell(row, &s.column)))
            .filter(|m| !m.is_empty())
            .collect::<Vec<_>>()
            .join(REGEX_JOINER),
        ColumnSpec::Absent => String::new(),
    }
}

/// Extracts every field the version maps. Absent fields are left out.
pub fn extract_all(row: &RawRow, version: &FormatVersion) -> BTreeMap<FieldName, String> {
    version
        .columns
        .iter()
        .filter(|(_, spec)| !spec.is_absent())
        .map(|(field, spec)| (*field, extract(row, spec)))
        .collect()
}

fn cell<'a>(row: &'a RawRow, column: &str) -> &'a str {
    row.get(column).map(str::trim).unwrap_or_default()
}

/// The first capture group that took part in the match, or the whole match
/// when the pattern has no groups.
fn first_match<'a>(pattern: &Regex, text: &'a str) -> Option<&'a str> {
    let caps = pattern.captures(text)?;
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().trim())
}

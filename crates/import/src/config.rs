//! The declarative configuration document: format definitions, automation
//! rules and a few run settings, loaded once into immutable structures.

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::format::{
    ColumnSpec, DecimalSeparator, Encoding, FieldName, FormatRegistry, FormatVersion,
    ImportFormat, RegexSource,
};
use crate::gate::LockScope;
use crate::rules::{AutomationRule, CategoryRuleEngine};

/// Fields every version has to map.
const REQUIRED_FIELDS: [FieldName; 2] = [FieldName::DateValue, FieldName::Amount];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Format '{format}': {reason}")]
    InvalidFormat { format: String, reason: String },
    #[error("Format '{format}', version '{version}': {reason}")]
    InvalidVersion {
        format: String,
        version: String,
        reason: String,
    },
}

#[derive(Debug, Deserialize, Default)]
struct ConfigDocument {
    #[serde(default)]
    database: Option<PathBuf>,
    #[serde(default)]
    import: ImportSection,
    #[serde(default)]
    formats: BTreeMap<String, FormatEntry>,
    #[serde(default)]
    rules: Vec<AutomationRule>,
}

#[derive(Debug, Deserialize, Default)]
struct ImportSection {
    #[serde(default)]
    lock_scope: LockScope,
}

#[derive(Debug, Deserialize)]
struct FormatEntry {
    #[serde(default)]
    default_version: Option<String>,
    #[serde(default)]
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    name: String,
    #[serde(default = "default_encoding")]
    encoding: String,
    #[serde(default = "default_delimiter")]
    delimiter: String,
    #[serde(default = "default_decimal_separator")]
    decimal_separator: String,
    #[serde(default = "default_date_format")]
    date_format: String,
    #[serde(default)]
    header_skip_lines: usize,
    #[serde(default)]
    expected_headers: Vec<String>,
    #[serde(default)]
    columns: BTreeMap<FieldName, ColumnEntry>,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_decimal_separator() -> String {
    ".".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

/// `amount = "Betrag"` or `description = { join = ["A", "B"], separator = " / " }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ColumnEntry {
    Name(String),
    Table(ColumnTable),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ColumnTable {
    #[serde(default)]
    column: Option<String>,
    #[serde(default)]
    names: Option<Vec<String>>,
    #[serde(default)]
    join: Option<Vec<String>>,
    #[serde(default)]
    separator: Option<String>,
    #[serde(default)]
    regex: Option<Vec<RegexEntry>>,
}

#[derive(Debug, Deserialize)]
struct RegexEntry {
    column: String,
    pattern: String,
}

/// A loaded configuration snapshot.
#[derive(Debug, Default)]
pub struct ImportConfig {
    pub database: Option<PathBuf>,
    pub lock_scope: LockScope,
    pub registry: FormatRegistry,
    pub rules: CategoryRuleEngine,
}

impl ImportConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        // A relative database path is relative to the config file.
        if let (Some(db), Some(dir)) = (config.database.as_mut(), path.parent()) {
            if db.is_relative() {
                *db = dir.join(&*db);
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let doc: ConfigDocument = toml::from_str(content)?;

        let formats = doc
            .formats
            .into_iter()
            .map(|(name, entry)| build_format(name, entry))
            .collect::<Result<Vec<_>, _>>()?;

        let rules = CategoryRuleEngine::new(doc.rules);
        tracing::debug!(
            formats = formats.len(),
            rules = rules.len(),
            warnings = rules.warnings().len(),
            "configuration loaded"
        );

        Ok(Self {
            database: doc.database,
            lock_scope: doc.import.lock_scope,
            registry: FormatRegistry::new(formats),
            rules,
        })
    }
}

fn build_format(name: String, entry: FormatEntry) -> Result<ImportFormat, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidFormat {
        format: name.clone(),
        reason,
    };

    if entry.versions.is_empty() {
        return Err(invalid("no versions declared".to_string()));
    }

    let mut seen = HashSet::new();
    for version in &entry.versions {
        if !seen.insert(version.name.as_str()) {
            return Err(invalid(format!("version '{}' declared twice", version.name)));
        }
    }
    if let Some(default) = entry.default_version.as_deref() {
        if !seen.contains(default) {
            return Err(invalid(format!("default_version '{default}' is not declared")));
        }
    }

    let versions = entry
        .versions
        .into_iter()
        .map(|v| build_version(&name, v))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ImportFormat {
        name,
        versions,
        default_version: entry.default_version,
    })
}

fn build_version(format: &str, entry: VersionEntry) -> Result<FormatVersion, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidVersion {
        format: format.to_string(),
        version: entry.name.clone(),
        reason,
    };

    let encoding: Encoding = entry.encoding.parse().map_err(invalid)?;
    let decimal_separator: DecimalSeparator = entry.decimal_separator.parse().map_err(invalid)?;
    let delimiter = match entry.delimiter.as_bytes() {
        [b] if b.is_ascii() => *b,
        _ => {
            return Err(invalid(format!(
                "delimiter must be a single ASCII character, got '{}'",
                entry.delimiter
            )))
        }
    };

    let mut columns = BTreeMap::new();
    for (field, column) in &entry.columns {
        let spec = column_spec(column).map_err(|reason| invalid(format!("{field}: {reason}")))?;
        columns.insert(*field, spec);
    }
    for field in REQUIRED_FIELDS {
        if columns.get(&field).map_or(true, ColumnSpec::is_absent) {
            return Err(invalid(format!("column for '{field}' is required")));
        }
    }

    Ok(FormatVersion {
        name: entry.name.clone(),
        encoding,
        delimiter,
        decimal_separator,
        date_format: entry.date_format.clone(),
        header_skip_lines: entry.header_skip_lines,
        expected_headers: entry.expected_headers.iter().cloned().collect(),
        columns,
    })
}

/// Applies the strategy precedence join > regex > names > column.
fn column_spec(entry: &ColumnEntry) -> Result<ColumnSpec, String> {
    let table = match entry {
        ColumnEntry::Name(name) => return Ok(ColumnSpec::Direct(name.clone())),
        ColumnEntry::Table(table) => table,
    };

    if table.separator.is_some() && table.join.is_none() {
        return Err("`separator` is only valid together with `join`".to_string());
    }
    if let Some(names) = &table.join {
        return Ok(ColumnSpec::Join {
            names: names.clone(),
            separator: table.separator.clone().unwrap_or_else(|| " ".to_string()),
        });
    }
    if let Some(sources) = &table.regex {
        let compiled = sources
            .iter()
            .map(|s| {
                Regex::new(&s.pattern)
                    .map(|pattern| RegexSource {
                        column: s.column.clone(),
                        pattern,
                    })
                    .map_err(|e| format!("invalid pattern '{}': {e}", s.pattern))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ColumnSpec::RegexSources(compiled));
    }
    if let Some(names) = &table.names {
        return Ok(ColumnSpec::NamesFallback(names.clone()));
    }
    match &table.column {
        Some(name) => Ok(ColumnSpec::Direct(name.clone())),
        None => Ok(ColumnSpec::Absent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPARKASSE: &str = r#"
        database = "tally.db"

        [import]
        lock_scope = "account"

        [formats.sparkasse]
        default_version = "v1"

        [[formats.sparkasse.versions]]
        name = "v1"
        encoding = "iso-8859-1"
        delimiter = ";"
        decimal_separator = ","
        date_format = "%d.%m.%Y"
        expected_headers = ["Valuta", "Betrag"]

        [formats.sparkasse.versions.columns]
        date_value = "Valuta"
        amount = "Betrag"
        description = { join = ["Buchungstext", "Verwendungszweck"], separator = " / " }
        recipient_applicant = { names = ["Empfaenger", "Auftraggeber"] }
        iban = { regex = [{ column = "Details", pattern = 'IBAN: (\w+)' }] }

        [[formats.sparkasse.versions]]
        name = "v2"
        delimiter = ";"
        decimal_separator = ","
        date_format = "%d.%m.%Y"
        expected_headers = ["Valuta", "Betrag", "IBAN"]

        [formats.sparkasse.versions.columns]
        date_value = "Valuta"
        amount = { column = "Betrag" }
        iban = "IBAN"

        [[rules]]
        id = 1
        name = "Groceries"
        category_id = 3
        priority = 5

        [[rules.conditions]]
        id = 1
        type = "contains"
        field = "recipient_applicant"
        value = "REWE"
    "#;

    #[test]
    fn loads_formats_rules_and_settings() {
        let config = ImportConfig::from_toml_str(SPARKASSE).unwrap();
        assert_eq!(config.lock_scope, LockScope::Account);
        assert_eq!(config.database, Some(PathBuf::from("tally.db")));
        assert_eq!(config.rules.len(), 1);

        let format = config.registry.get("sparkasse").unwrap();
        assert_eq!(format.version_names(), vec!["v1", "v2"]);
        assert_eq!(format.default_version.as_deref(), Some("v1"));

        let v1 = format.version("v1").unwrap();
        assert_eq!(v1.encoding, Encoding::Latin1);
        assert_eq!(v1.delimiter, b';');
        assert_eq!(v1.decimal_separator, DecimalSeparator::Comma);
        assert!(matches!(v1.column(FieldName::DateValue), ColumnSpec::Direct(c) if c == "Valuta"));
        assert!(matches!(
            v1.column(FieldName::Description),
            ColumnSpec::Join { separator, .. } if separator == " / "
        ));
        assert!(matches!(
            v1.column(FieldName::RecipientApplicant),
            ColumnSpec::NamesFallback(n) if n.len() == 2
        ));
        assert!(matches!(v1.column(FieldName::Iban), ColumnSpec::RegexSources(s) if s.len() == 1));
        assert!(v1.column(FieldName::Bic).is_absent());

        let v2 = format.version("v2").unwrap();
        assert_eq!(v2.encoding, Encoding::Utf8);
        assert!(matches!(v2.column(FieldName::Amount), ColumnSpec::Direct(c) if c == "Betrag"));
    }

    #[test]
    fn join_wins_over_other_strategies_in_one_entry() {
        let entry: ColumnEntry = toml::from_str::<BTreeMap<String, ColumnEntry>>(
            r#"x = { column = "A", names = ["B"], join = ["C", "D"] }"#,
        )
        .unwrap()
        .remove("x")
        .unwrap();
        assert!(matches!(
            column_spec(&entry).unwrap(),
            ColumnSpec::Join { separator, .. } if separator == " "
        ));

        let entry: ColumnEntry = toml::from_str::<BTreeMap<String, ColumnEntry>>(
            r#"x = { column = "A", names = ["B"], regex = [{ column = "C", pattern = "\\d+" }] }"#,
        )
        .unwrap()
        .remove("x")
        .unwrap();
        assert!(matches!(column_spec(&entry).unwrap(), ColumnSpec::RegexSources(_)));

        let entry: ColumnEntry = toml::from_str::<BTreeMap<String, ColumnEntry>>(
            r#"x = { column = "A", names = ["B"] }"#,
        )
        .unwrap()
        .remove("x")
        .unwrap();
        assert!(matches!(column_spec(&entry).unwrap(), ColumnSpec::NamesFallback(_)));
    }

    #[test]
    fn separator_without_join_is_rejected() {
        let config = single_version(
            "date_value = \"Datum\"\n\
             amount = \"Betrag\"\n\
             description = { names = [\"Zweck\", \"Text\"], separator = \" / \" }",
            "",
        );
        let err = ImportConfig::from_toml_str(&config).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVersion { ref reason, .. } if reason.contains("separator")
        ));
    }

    fn single_version(columns: &str, extra: &str) -> String {
        format!(
            r#"
            [formats.bank]
            {extra}
            [[formats.bank.versions]]
            name = "v1"
            [formats.bank.versions.columns]
            {columns}
            "#
        )
    }

    #[test]
    fn rejects_missing_required_column() {
        let err = ImportConfig::from_toml_str(&single_version(r#"date_value = "Datum""#, ""))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVersion { ref reason, .. } if reason.contains("amount")
        ));
    }

    #[test]
    fn rejects_unknown_default_version() {
        let err = ImportConfig::from_toml_str(&single_version(
            "date_value = \"Datum\"\namount = \"Betrag\"",
            "default_version = \"v9\"",
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFormat { .. }));
    }

    #[test]
    fn rejects_bad_regex_and_delimiter() {
        let err = ImportConfig::from_toml_str(&single_version(
            "date_value = \"Datum\"\namount = { regex = [{ column = \"X\", pattern = \"(\" }] }",
            "",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));

        let doc = single_version("date_value = \"Datum\"\namount = \"Betrag\"", "")
            .replace("name = \"v1\"", "name = \"v1\"\ndelimiter = \";;\"");
        let err = ImportConfig::from_toml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("delimiter"));
    }

    #[test]
    fn rejects_unknown_field_name() {
        let err = ImportConfig::from_toml_str(&single_version(
            "date_value = \"Datum\"\namount = \"Betrag\"\nsaldo = \"Saldo\"",
            "",
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn empty_document_is_valid() {
        let config = ImportConfig::from_toml_str("").unwrap();
        assert_eq!(config.lock_scope, LockScope::Global);
        assert!(config.rules.is_empty());
        assert_eq!(config.registry.names().count(), 0);
    }

    #[test]
    fn load_resolves_database_relative_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"database = \"books.db\"\n").unwrap();

        let config = ImportConfig::load(&path).unwrap();
        assert_eq!(config.database, Some(dir.path().join("books.db")));

        let missing = ImportConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}

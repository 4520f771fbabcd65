use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tally_core::{
    AccountId, CategoryId, ImportBatch, InsertOutcome, StoreError, TransactionId,
    TransactionRecord, TransactionStore,
};
use thiserror::Error;

use crate::config::ImportConfig;
use crate::csv::{self as delimited, CsvError};
use crate::format::{FormatError, FormatRegistry, FormatVersion};
use crate::gate::ImportGate;
use crate::normalize::{self, HeaderValidationError};
use crate::rules::CategoryRuleEngine;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Unknown import format: {0}")]
    FormatNotFound(String),
    #[error("No version of format '{format}' is usable (available: {})", .available.join(", "))]
    VersionNotFound { format: String, available: Vec<String> },
    #[error(transparent)]
    HeaderValidation(#[from] HeaderValidationError),
    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot read file: {0}")]
    Csv(#[from] CsvError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<FormatError> for ImportError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::FormatNotFound(name) => ImportError::FormatNotFound(name),
            FormatError::VersionNotFound { format, available } => {
                ImportError::VersionNotFound { format, available }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowErrorDetail {
    /// 1-based line in the source file; 0 for file-level errors.
    pub row: u64,
    pub reason: String,
}

/// Outcome of one file import. Always returned, even when every row failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub imported: usize,
    pub duplicates: usize,
    pub errors: usize,
    /// Newly imported rows that automation assigned a category to.
    pub categorized: usize,
    pub warnings: Vec<String>,
    pub error_details: Vec<RowErrorDetail>,
    pub version: Option<String>,
    /// Set when the whole file was rejected before the row loop.
    pub file_error: Option<String>,
}

impl ImportStats {
    fn row_error(&mut self, row: u64, reason: String) {
        tracing::warn!(row, "{reason}");
        self.errors += 1;
        self.error_details.push(RowErrorDetail { row, reason });
    }

    fn file_failed(&mut self, err: &ImportError) {
        tracing::warn!("file rejected: {err}");
        self.errors += 1;
        self.error_details.push(RowErrorDetail {
            row: 0,
            reason: err.to_string(),
        });
        self.file_error = Some(err.to_string());
    }

    pub fn is_file_error(&self) -> bool {
        self.file_error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Run the category rules on newly inserted rows.
    pub apply_automation: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            apply_automation: true,
        }
    }
}

/// Which version a file would be imported with, and whether its header fits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionPreview {
    pub format: String,
    pub version: String,
    pub headers: Vec<String>,
    /// Empty when every mapped field has a source column.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecategorizeStats {
    pub examined: usize,
    pub categorized: usize,
    pub warnings: Vec<String>,
}

/// Orchestrates: resolve version → validate header → per row
/// (extract → normalize → insert-if-absent → categorize) → finalize.
pub struct ImportPipeline<S: TransactionStore> {
    store: Arc<S>,
    registry: Arc<FormatRegistry>,
    rules: Arc<CategoryRuleEngine>,
    gate: Arc<ImportGate>,
}

impl<S: TransactionStore> ImportPipeline<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<FormatRegistry>,
        rules: Arc<CategoryRuleEngine>,
        gate: Arc<ImportGate>,
    ) -> Self {
        Self {
            store,
            registry,
            rules,
            gate,
        }
    }

    pub fn from_config(store: Arc<S>, config: ImportConfig) -> Self {
        Self::new(
            store,
            Arc::new(config.registry),
            Arc::new(config.rules),
            Arc::new(ImportGate::new(config.lock_scope)),
        )
    }

    pub fn rules(&self) -> &CategoryRuleEngine {
        &self.rules
    }

    /// Import a file on disk.
    pub async fn import_file(
        &self,
        path: &Path,
        format_name: &str,
        account: AccountId,
        options: ImportOptions,
    ) -> Result<ImportStats, ImportError> {
        // Fail on configuration problems before touching the file.
        self.registry.get(format_name)?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.import_bytes(&file_name, &bytes, format_name, account, options)
            .await
    }

    /// Import raw file content (e.g. an upload). `file_name` is only logged.
    pub async fn import_bytes(
        &self,
        file_name: &str,
        data: &[u8],
        format_name: &str,
        account: AccountId,
        options: ImportOptions,
    ) -> Result<ImportStats, ImportError> {
        let format = self.registry.get(format_name)?;
        if !self.store.account_exists(account).await? {
            return Err(ImportError::UnknownAccount(account));
        }

        let _permit = self.gate.acquire(account).await;
        tracing::info!(file = file_name, format = format_name, %account, "import started");

        let mut stats = ImportStats::default();
        if options.apply_automation {
            stats.warnings.extend(self.rules.warnings().iter().cloned());
        }

        match format.resolve_for_bytes(data) {
            Ok(version) => {
                stats.version = Some(version.name.clone());
                self.import_rows(data, version, account, options, &mut stats)
                    .await?;
            }
            Err(e) => stats.file_failed(&e.into()),
        }

        self.store
            .record_import(&ImportBatch {
                file_name: file_name.to_string(),
                account_id: account,
                format: format_name.to_string(),
                version: stats.version.clone(),
                imported: stats.imported,
                duplicates: stats.duplicates,
                errors: stats.errors,
            })
            .await?;

        tracing::info!(
            file = file_name,
            imported = stats.imported,
            duplicates = stats.duplicates,
            errors = stats.errors,
            categorized = stats.categorized,
            "import finished"
        );
        Ok(stats)
    }

    async fn import_rows(
        &self,
        data: &[u8],
        version: &FormatVersion,
        account: AccountId,
        options: ImportOptions,
        stats: &mut ImportStats,
    ) -> Result<(), ImportError> {
        // 1. Decode and split with the version's dialect.
        let text = delimited::decode(data, version.encoding)?;
        let table = delimited::read_table(&text, version.dialect())?;

        // 2. A structurally wrong mapping rejects the whole file.
        if let Err(e) = normalize::validate_headers(version, &table.headers) {
            stats.file_failed(&e.into());
            return Ok(());
        }

        for bad in table.malformed {
            stats.row_error(bad.line, bad.reason);
        }

        // 3. Row loop, in file order.
        for row in table.rows.iter().filter(|r| !r.is_blank()) {
            let record = match normalize::normalize(row, version, account) {
                Ok(record) => record,
                Err(e) => {
                    stats.row_error(row.line, e.to_string());
                    continue;
                }
            };

            match self.store.insert_transaction_if_absent(&record).await? {
                InsertOutcome::Duplicate => stats.duplicates += 1,
                InsertOutcome::Inserted(id) => {
                    stats.imported += 1;
                    if options.apply_automation {
                        if let Some(category) = self.categorize_existing(&record) {
                            if self.assign_category(id, category, &mut stats.warnings).await? {
                                stats.categorized += 1;
                            }
                        }
                    }
                }
            }
        }

        stats.error_details.sort_by_key(|d| d.row);
        Ok(())
    }

    /// Rule engine lookup for a single record. Side-effect free.
    pub fn categorize_existing(&self, record: &TransactionRecord) -> Option<CategoryId> {
        self.rules.categorize(record)
    }

    /// A rule pointing at a missing category leaves the row uncategorized
    /// with one warning per category; any other store failure is fatal.
    async fn assign_category(
        &self,
        transaction: TransactionId,
        category: CategoryId,
        warnings: &mut Vec<String>,
    ) -> Result<bool, ImportError> {
        match self.store.set_category(transaction, category).await {
            Ok(()) => Ok(true),
            Err(StoreError::UnknownCategory(missing)) => {
                let warning = format!(
                    "Category {missing} does not exist; matching rows left uncategorized"
                );
                if !warnings.contains(&warning) {
                    tracing::warn!("{warning}");
                    warnings.push(warning);
                }
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Assigns categories to stored transactions that have none.
    pub async fn recategorize_uncategorized(
        &self,
        account: Option<AccountId>,
    ) -> Result<RecategorizeStats, ImportError> {
        let pending = self.store.uncategorized_transactions(account).await?;
        let mut stats = RecategorizeStats {
            examined: pending.len(),
            ..Default::default()
        };
        for tx in &pending {
            if let Some(category) = self.categorize_existing(&tx.record) {
                if self.assign_category(tx.id, category, &mut stats.warnings).await? {
                    stats.categorized += 1;
                }
            }
        }
        tracing::info!(
            examined = stats.examined,
            categorized = stats.categorized,
            "retroactive categorization finished"
        );
        Ok(stats)
    }

    /// Reads only what is needed to pick a version; nothing is written.
    pub async fn resolve_file_version(
        &self,
        path: &Path,
        format_name: &str,
    ) -> Result<VersionPreview, ImportError> {
        let format = self.registry.get(format_name)?;
        let bytes = tokio::fs::read(path).await?;
        let version = format.resolve_for_bytes(&bytes)?;

        let text = delimited::decode(&bytes, version.encoding)?;
        let headers = delimited::read_headers(&text, version.dialect())?;
        let missing = match normalize::validate_headers(version, &headers) {
            Ok(()) => Vec::new(),
            Err(e) => e.missing.iter().map(ToString::to_string).collect(),
        };

        Ok(VersionPreview {
            format: format.name.clone(),
            version: version.name.clone(),
            headers,
            missing,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

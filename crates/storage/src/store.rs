use chrono::NaiveDate;
use std::path::Path;
use tally_core::{
    AccountId, CategoryId, ImportBatch, InsertOutcome, Money, StoreError, StoredTransaction,
    TransactionId, TransactionRecord, TransactionStore,
};

use crate::db::{create_db, DbPool};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

type TransactionRow = (
    i64,
    i64,
    NaiveDate,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<i64>,
);

fn from_row(r: TransactionRow) -> StoredTransaction {
    StoredTransaction {
        id: TransactionId(r.0),
        record: TransactionRecord {
            account_id: AccountId(r.1),
            date_value: r.2,
            amount: Money::from_cents(r.3),
            description: r.4,
            iban: r.5,
            bic: r.6,
            recipient_applicant: r.7,
            account_number: r.8,
            fingerprint: r.9,
        },
        category_id: r.10.map(CategoryId),
    }
}

/// SQLite-backed [`TransactionStore`]. Uniqueness of `(account_id,
/// fingerprint)` is enforced by the schema, so concurrent writers cannot both
/// insert the same transaction.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        Ok(Self::new(create_db(path).await?))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl TransactionStore for SqliteStore {
    async fn account_exists(&self, account: AccountId) -> Result<bool, StoreError> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT id FROM accounts WHERE id = ?")
            .bind(account.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.is_some())
    }

    async fn insert_transaction_if_absent(
        &self,
        record: &TransactionRecord,
    ) -> Result<InsertOutcome, StoreError> {
        let cents = record
            .amount
            .to_cents()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO transactions
                (account_id, date_value, amount_cents, description, iban, bic,
                 recipient_applicant, account_number, fingerprint)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (account_id, fingerprint) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.account_id.0)
        .bind(record.date_value)
        .bind(cents)
        .bind(&record.description)
        .bind(&record.iban)
        .bind(&record.bic)
        .bind(&record.recipient_applicant)
        .bind(&record.account_number)
        .bind(&record.fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::UnknownAccount(record.account_id)
            }
            _ => backend(e),
        })?;

        Ok(match row {
            Some((id,)) => InsertOutcome::Inserted(TransactionId(id)),
            None => InsertOutcome::Duplicate,
        })
    }

    async fn set_category(
        &self,
        transaction: TransactionId,
        category: CategoryId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE transactions SET category_id = ? WHERE id = ?")
            .bind(category.0)
            .bind(transaction.0)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    StoreError::UnknownCategory(category)
                }
                _ => backend(e),
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownTransaction(transaction));
        }
        Ok(())
    }

    async fn uncategorized_transactions(
        &self,
        account: Option<AccountId>,
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, account_id, date_value, amount_cents, description, iban, bic,
                   recipient_applicant, account_number, fingerprint, category_id
            FROM transactions
            WHERE category_id IS NULL AND (?1 IS NULL OR account_id = ?1)
            ORDER BY id
            "#,
        )
        .bind(account.map(|a| a.0))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn record_import(&self, batch: &ImportBatch) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO import_batches \
             (file_name, account_id, format, version, imported, duplicates, errors) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&batch.file_name)
        .bind(batch.account_id.0)
        .bind(&batch.format)
        .bind(&batch.version)
        .bind(batch.imported as i64)
        .bind(batch.duplicates as i64)
        .bind(batch.errors as i64)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tally_core::{AccountId, CategoryId, ImportBatch};

pub type DbPool = Pool<Sqlite>;

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    // Applied to every pooled connection.
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000));
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // (account_id, fingerprint) is the dedup key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            date_value TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            description TEXT NOT NULL,
            iban TEXT,
            bic TEXT,
            recipient_applicant TEXT,
            account_number TEXT,
            fingerprint TEXT NOT NULL,
            category_id INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (account_id, fingerprint),
            FOREIGN KEY (account_id) REFERENCES accounts(id),
            FOREIGN KEY (category_id) REFERENCES categories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_uncategorized \
         ON transactions(account_id) WHERE category_id IS NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            account_id INTEGER NOT NULL,
            format TEXT NOT NULL,
            version TEXT,
            imported INTEGER NOT NULL DEFAULT 0,
            duplicates INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            imported_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryRecord {
    pub id: CategoryId,
    pub name: String,
}

pub async fn create_account(pool: &DbPool, name: &str) -> Result<AccountId, sqlx::Error> {
    let result = sqlx::query("INSERT INTO accounts (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(AccountId(result.last_insert_rowid()))
}

pub async fn get_all_accounts(pool: &DbPool) -> Result<Vec<AccountRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM accounts ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, name)| AccountRecord {
            id: AccountId(id),
            name,
        })
        .collect())
}

pub async fn create_category(pool: &DbPool, name: &str) -> Result<CategoryId, sqlx::Error> {
    let result = sqlx::query("INSERT INTO categories (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(CategoryId(result.last_insert_rowid()))
}

pub async fn get_all_categories(pool: &DbPool) -> Result<Vec<CategoryRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM categories ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, name)| CategoryRecord {
            id: CategoryId(id),
            name,
        })
        .collect())
}

/// Most recent first.
pub async fn get_import_batches(
    pool: &DbPool,
    limit: i64,
) -> Result<Vec<ImportBatch>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, i64, String, Option<String>, i64, i64, i64)>(
        "SELECT file_name, account_id, format, version, imported, duplicates, errors \
         FROM import_batches ORDER BY id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| ImportBatch {
            file_name: r.0,
            account_id: AccountId(r.1),
            format: r.2,
            version: r.3,
            imported: r.4 as usize,
            duplicates: r.5 as usize,
            errors: r.6 as usize,
        })
        .collect())
}

pub mod db;
pub mod store;

pub use db::{
    create_account, create_category, create_db, get_all_accounts, get_all_categories,
    get_import_batches, AccountRecord, CategoryRecord, DbPool,
};
pub use store::SqliteStore;

pub mod config;
pub mod csv;
pub mod dedup;
pub mod extract;
pub mod format;
pub mod gate;
pub mod logic;
pub mod normalize;
pub mod pipeline;
pub mod rules;

pub use config::{ConfigError, ImportConfig};
pub use format::{ColumnSpec, FieldName, FormatError, FormatRegistry, FormatVersion, ImportFormat};
pub use gate::{ImportGate, LockScope};
pub use normalize::{HeaderValidationError, RowError};
pub use pipeline::{
    ImportError, ImportOptions, ImportPipeline, ImportStats, RecategorizeStats, RowErrorDetail,
    VersionPreview,
};
pub use rules::{AutomationRule, CategoryRuleEngine, Condition, ConditionField, ConditionType};

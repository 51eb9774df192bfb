/// Fatal merge errors. Per-row problems (unresolvable conflicts, dangling
/// references) are not errors; they are collected in the
/// [`MergeReport`](crate::report::MergeReport).
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Nothing to merge.
    #[error("no input sources")]
    NoSources,

    /// Two sources do not share the same table/column/foreign-key structure.
    #[error("schema mismatch between '{left}' and '{right}': {detail}")]
    SchemaMismatch {
        left: String,
        right: String,
        detail: String,
    },

    /// The schema itself is inconsistent (dangling foreign key, duplicate table).
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Foreign keys form a cycle; no parent-before-child order exists.
    #[error("foreign-key cycle involving: {0}")]
    DependencyCycle(String),

    /// A table was remapped before one of the tables it references.
    #[error("table '{table}' remapped before its parent '{parent}'")]
    OutOfOrder { table: String, parent: String },

    /// A table's key map was sealed twice.
    #[error("table '{0}' already remapped")]
    AlreadyRemapped(String),

    /// TOML parse / deserialization error in merge rules.
    #[error("rules parse error: {0}")]
    ConfigParse(String),

    /// Merge rules name columns that do not exist, or are contradictory.
    #[error("rules validation error: {0}")]
    ConfigValidation(String),

    /// A merged row violates a schema constraint. Indicates an engine defect.
    #[error("constraint violation in '{table}': {detail}")]
    ConstraintViolation { table: String, detail: String },
}

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::MergeError;
use crate::schema::Schema;

/// Built-in rules for the JW Library user-data schema.
pub const JW_LIBRARY_RULES: &str = include_str!("../rules/jwlibrary.toml");

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Per-table identity and conflict rules, looked up by table name.
///
/// Tables without an entry use [`TableRule::default`]: identity by content
/// (plus the schema's unique constraints) and `fill_missing` on conflict.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tables: BTreeMap<String, TableRule>,
    #[serde(default)]
    pub media: MediaConfig,
}

impl MergeConfig {
    pub fn from_toml(s: &str) -> Result<Self, MergeError> {
        let config: MergeConfig = toml::from_str(s).map_err(|e| MergeError::ConfigParse(e.to_string()))?;
        config.validate_self()?;
        Ok(config)
    }

    /// The embedded JW Library rules.
    pub fn jw_library() -> Result<Self, MergeError> {
        Self::from_toml(JW_LIBRARY_RULES)
    }

    pub fn rule(&self, table: &str) -> Option<&TableRule> {
        self.tables.get(table)
    }

    /// Checks that do not need a schema.
    fn validate_self(&self) -> Result<(), MergeError> {
        for (table, rule) in &self.tables {
            if rule.on_conflict == ConflictPolicy::Newest && rule.modified.is_none() {
                return Err(MergeError::ConfigValidation(format!(
                    "{table}: on_conflict = \"newest\" requires `modified`"
                )));
            }
            if rule.on_conflict == ConflictPolicy::DiffText && rule.text_columns.is_empty() {
                return Err(MergeError::ConfigValidation(format!(
                    "{table}: on_conflict = \"diff_text\" requires `text_columns`"
                )));
            }
            if rule.identity.iter().any(Vec::is_empty) {
                return Err(MergeError::ConfigValidation(format!(
                    "{table}: empty identity key (use `singleton = true` instead)"
                )));
            }
        }
        for column in &self.media.columns {
            if column.split_once('.').is_none() {
                return Err(MergeError::ConfigValidation(format!(
                    "media column '{column}' must be written as Table.Column"
                )));
            }
        }
        Ok(())
    }

    /// Check every referenced column against a schema.
    ///
    /// Rules for tables that do not exist are returned as warnings, since one
    /// rules file serves several schema versions. Unknown columns in a table
    /// that does exist are an error.
    pub fn validate(&self, schema: &Schema) -> Result<Vec<String>, MergeError> {
        let mut warnings = Vec::new();
        for (name, rule) in &self.tables {
            let Some(table) = schema.table(name) else {
                warnings.push(format!("rules for table '{name}' ignored: not in schema"));
                continue;
            };
            for column in rule.columns() {
                if table.column_index(column).is_none() {
                    return Err(MergeError::ConfigValidation(format!(
                        "{name}: unknown column '{column}'"
                    )));
                }
            }
            if let Some(seq) = &rule.sequence {
                let is_integer = table
                    .column_index(&seq.column)
                    .map(|i| table.columns[i].affinity() == crate::schema::Affinity::Integer)
                    .unwrap_or(false);
                if !is_integer {
                    return Err(MergeError::ConfigValidation(format!(
                        "{name}: sequence column '{}' must be an INTEGER column",
                        seq.column
                    )));
                }
            }
        }
        for entry in &self.media.columns {
            let Some((t, c)) = entry.split_once('.') else { continue };
            match schema.table(t) {
                Some(table) if table.column_index(c).is_none() => {
                    return Err(MergeError::ConfigValidation(format!(
                        "media column '{entry}' does not exist"
                    )));
                }
                None => warnings.push(format!("media column '{entry}' ignored: not in schema")),
                _ => {}
            }
        }
        Ok(warnings)
    }
}

// ---------------------------------------------------------------------------
// Table rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableRule {
    /// Natural keys: each inner list is one column set that identifies a
    /// logical record.
    pub identity: Vec<Vec<String>>,
    /// Treat NULL = NULL when comparing natural keys.
    pub match_nulls: bool,
    /// Columns left out of the content comparison.
    pub ignore: Vec<String>,
    /// Modification timestamp; the greater value survives.
    pub modified: Option<String>,
    pub on_conflict: ConflictPolicy,
    /// Columns combined as a line diff under `diff_text`.
    pub text_columns: Vec<String>,
    /// The table holds exactly one logical row.
    pub singleton: bool,
    pub sequence: Option<SequenceRule>,
    pub trim_text: bool,
    pub blank_is_null: bool,
}

impl Default for TableRule {
    fn default() -> Self {
        Self {
            identity: Vec::new(),
            match_nulls: false,
            ignore: Vec::new(),
            modified: None,
            on_conflict: ConflictPolicy::FillMissing,
            text_columns: Vec::new(),
            singleton: false,
            sequence: None,
            trim_text: true,
            blank_is_null: true,
        }
    }
}

impl TableRule {
    /// Every column name the rule mentions.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self.identity.iter().flatten().map(String::as_str).collect();
        cols.extend(self.ignore.iter().map(String::as_str));
        cols.extend(self.text_columns.iter().map(String::as_str));
        cols.extend(self.modified.as_deref());
        if let Some(seq) = &self.sequence {
            cols.push(&seq.column);
            cols.extend(seq.scope.iter().map(String::as_str));
        }
        cols
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fill gaps; disagreeing non-null values make the conflict unresolvable.
    #[default]
    FillMissing,
    /// The row with the greater `modified` value wins.
    Newest,
    /// The row already merged wins; gaps are filled.
    KeepExisting,
    /// Differing text columns become a line diff of older → newer.
    DiffText,
    /// Never merge; the candidate is skipped.
    Skip,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FillMissing => write!(f, "fill_missing"),
            Self::Newest => write!(f, "newest"),
            Self::KeepExisting => write!(f, "keep_existing"),
            Self::DiffText => write!(f, "diff_text"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// An ordinal column renumbered when two distinct rows collide within a
/// scope, e.g. tag positions per tag.
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceRule {
    pub column: String,
    #[serde(default)]
    pub scope: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaConfig {
    /// `Table.Column` entries holding archive file names.
    #[serde(default)]
    pub columns: Vec<String>,
}

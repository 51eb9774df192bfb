//! Static description of the tables being merged.
//!
//! A [`Schema`] is read once per source and must be structurally identical
//! across all sources. Foreign keys drive both the processing order
//! ([`Schema::dependency_order`]) and key rewriting.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::MergeError;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// SQLite type affinity derived from a declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    Integer,
    Real,
    Text,
    Blob,
    Numeric,
}

impl Affinity {
    /// Affinity rules from the SQLite documentation, section 3.1.
    pub fn from_decl(decl: &str) -> Self {
        let d = decl.to_ascii_uppercase();
        if d.contains("INT") {
            Affinity::Integer
        } else if d.contains("CHAR") || d.contains("CLOB") || d.contains("TEXT") {
            Affinity::Text
        } else if d.is_empty() || d.contains("BLOB") {
            Affinity::Blob
        } else if d.contains("REAL") || d.contains("FLOA") || d.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    /// Whether a STRICT table column of this affinity stores `value`
    /// as is. Non-STRICT tables hold any storage class in any column.
    pub fn accepts_strict(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Affinity::Integer, Value::Integer(_)) => true,
            (Affinity::Integer, _) => false,
            (Affinity::Real, Value::Integer(_) | Value::Real(_)) => true,
            (Affinity::Real, _) => false,
            (Affinity::Text, Value::Blob(_)) => false,
            (Affinity::Blob, Value::Blob(_)) => true,
            (Affinity::Blob, _) => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

impl Column {
    pub fn new(name: &str, decl_type: &str) -> Self {
        Self {
            name: name.to_string(),
            decl_type: decl_type.to_string(),
            not_null: false,
            primary_key: false,
        }
    }

    pub fn integer_key(name: &str) -> Self {
        Self::new(name, "INTEGER").primary()
    }

    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn affinity(&self) -> Affinity {
        Affinity::from_decl(&self.decl_type)
    }

    /// Whether SQLite would store `value` in this column. Only STRICT
    /// tables check types (the rowid alias is checked per table).
    pub fn accepts(&self, value: &Value, strict: bool) -> bool {
        if !strict || self.decl_type.eq_ignore_ascii_case("ANY") {
            return true;
        }
        self.affinity().accepts_strict(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub column: String,
    pub target_table: String,
    pub target_column: String,
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// How a table's rows are keyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind {
    /// Single INTEGER primary key, reassigned densely on merge.
    Surrogate(usize),
    /// Any other primary key; values survive the merge unchanged.
    Natural(Vec<usize>),
    /// No declared primary key.
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub foreign_keys: Vec<ForeignKey>,
    /// UNIQUE constraints other than the primary key, by column name.
    pub unique: Vec<Vec<String>>,
    /// Original CREATE TABLE statement, when loaded from a database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Declared `STRICT`: column types are enforced on insert.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub strict: bool,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            unique: Vec::new(),
            sql: None,
            strict: false,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn foreign_key(mut self, column: &str, target_table: &str, target_column: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            target_table: target_table.to_string(),
            target_column: target_column.to_string(),
        });
        self
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique.push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn key_kind(&self) -> KeyKind {
        let pk: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        match pk.as_slice() {
            [] => KeyKind::None,
            [only] if self.columns[*only].affinity() == Affinity::Integer => KeyKind::Surrogate(*only),
            _ => KeyKind::Natural(pk),
        }
    }

    pub fn surrogate_index(&self) -> Option<usize> {
        match self.key_kind() {
            KeyKind::Surrogate(i) => Some(i),
            _ => None,
        }
    }

    /// Name of the single primary-key column, if there is exactly one.
    pub fn primary_key_column(&self) -> Option<&str> {
        let mut pk = self.columns.iter().filter(|c| c.primary_key);
        match (pk.next(), pk.next()) {
            (Some(c), None) => Some(&c.name),
            _ => None,
        }
    }

    /// Original key of a row as authored in its source.
    ///
    /// Single-column keys use the key value itself; composite or missing
    /// keys fall back to the 1-based row ordinal.
    pub fn key_of(&self, values: &[Value], ordinal: usize) -> Value {
        match self.key_kind() {
            KeyKind::Surrogate(i) => values[i].clone(),
            KeyKind::Natural(cols) if cols.len() == 1 => values[cols[0]].clone(),
            _ => Value::Integer(ordinal as i64 + 1),
        }
    }

    /// Distinct tables this table references, excluding itself.
    pub fn parents(&self) -> BTreeSet<&str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.target_table.as_str())
            .filter(|t| *t != self.name)
            .collect()
    }

    /// First structural difference against another table, if any.
    ///
    /// Compares columns (name, type, constraints) and foreign keys; the raw
    /// CREATE statement is not compared.
    pub fn structure_difference(&self, other: &Table) -> Option<String> {
        if self.columns.len() != other.columns.len() {
            return Some(format!(
                "table '{}' has {} columns vs {}",
                self.name,
                self.columns.len(),
                other.columns.len()
            ));
        }
        for (a, b) in self.columns.iter().zip(&other.columns) {
            if a.name != b.name {
                return Some(format!("table '{}': column '{}' vs '{}'", self.name, a.name, b.name));
            }
            if a != b {
                return Some(format!(
                    "table '{}': column '{}' declared differently ({} vs {})",
                    self.name, a.name, a.decl_type, b.decl_type
                ));
            }
        }
        if self.foreign_keys != other.foreign_keys {
            return Some(format!("table '{}': foreign keys differ", self.name));
        }
        let mine: BTreeSet<&Vec<String>> = self.unique.iter().collect();
        let theirs: BTreeSet<&Vec<String>> = other.unique.iter().collect();
        if mine != theirs {
            return Some(format!("table '{}': unique constraints differ", self.name));
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct Schema {
    pub tables: Vec<Table>,
    /// CREATE INDEX statements (explicit indexes only).
    pub indexes: Vec<String>,
    /// CREATE TRIGGER statements.
    pub triggers: Vec<String>,
    pub user_version: i64,
}

impl Schema {
    /// Build a schema, checking that every foreign key points at an existing
    /// table and column.
    pub fn new(tables: Vec<Table>) -> Result<Self, MergeError> {
        let schema = Self {
            tables,
            ..Self::default()
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), MergeError> {
        let mut seen = BTreeSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(MergeError::InvalidSchema(format!("duplicate table '{}'", table.name)));
            }
        }
        for table in &self.tables {
            for fk in &table.foreign_keys {
                if table.column_index(&fk.column).is_none() {
                    return Err(MergeError::InvalidSchema(format!(
                        "{}.{}: foreign-key column does not exist",
                        table.name, fk.column
                    )));
                }
                let target = self.table(&fk.target_table).ok_or_else(|| {
                    MergeError::InvalidSchema(format!(
                        "{}.{} references unknown table '{}'",
                        table.name, fk.column, fk.target_table
                    ))
                })?;
                if target.column_index(&fk.target_column).is_none() {
                    return Err(MergeError::InvalidSchema(format!(
                        "{}.{} references unknown column {}.{}",
                        table.name, fk.column, fk.target_table, fk.target_column
                    )));
                }
            }
            for unique in &table.unique {
                if let Some(missing) = unique.iter().find(|c| table.column_index(c).is_none()) {
                    return Err(MergeError::InvalidSchema(format!(
                        "{}: unique constraint names unknown column '{missing}'",
                        table.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn with_user_version(mut self, user_version: i64) -> Self {
        self.user_version = user_version;
        self
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Column indices of `table` that some foreign key points at.
    pub fn referenced_columns(&self, table: &Table) -> Vec<usize> {
        let mut cols: Vec<usize> = self
            .tables
            .iter()
            .flat_map(|t| &t.foreign_keys)
            .filter(|fk| fk.target_table == table.name)
            .filter_map(|fk| table.column_index(&fk.target_column))
            .collect();
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    /// Tables in parent-before-child order. Ties keep schema order, so the
    /// result is deterministic. Self references and cycles are rejected.
    pub fn dependency_order(&self) -> Result<Vec<&Table>, MergeError> {
        if let Some(t) = self
            .tables
            .iter()
            .find(|t| t.foreign_keys.iter().any(|fk| fk.target_table == t.name))
        {
            return Err(MergeError::DependencyCycle(t.name.clone()));
        }

        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut order: Vec<&Table> = Vec::with_capacity(self.tables.len());

        while order.len() < self.tables.len() {
            let next = self.tables.iter().find(|t| {
                !placed.contains(t.name.as_str()) && t.parents().iter().all(|p| placed.contains(p))
            });
            match next {
                Some(t) => {
                    placed.insert(t.name.as_str());
                    order.push(t);
                }
                None => {
                    let stuck: Vec<&str> = self
                        .tables
                        .iter()
                        .map(|t| t.name.as_str())
                        .filter(|n| !placed.contains(n))
                        .collect();
                    return Err(MergeError::DependencyCycle(stuck.join(", ")));
                }
            }
        }
        Ok(order)
    }

    /// Fails with `SchemaMismatch` unless both schemas have the same tables,
    /// columns, keys and user version.
    pub fn check_compatible(&self, other: &Schema, left: &str, right: &str) -> Result<(), MergeError> {
        let mismatch = |detail: String| MergeError::SchemaMismatch {
            left: left.to_string(),
            right: right.to_string(),
            detail,
        };

        if self.user_version != other.user_version {
            return Err(mismatch(format!(
                "user_version {} vs {}",
                self.user_version, other.user_version
            )));
        }

        let mine: BTreeSet<&str> = self.tables.iter().map(|t| t.name.as_str()).collect();
        let theirs: BTreeSet<&str> = other.tables.iter().map(|t| t.name.as_str()).collect();
        if let Some(missing) = mine.symmetric_difference(&theirs).next() {
            return Err(mismatch(format!("table '{missing}' is not present in both")));
        }

        for table in &self.tables {
            // Presence established above
            if let Some(theirs) = other.table(&table.name) {
                if let Some(detail) = table.structure_difference(theirs) {
                    return Err(mismatch(detail));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> Table {
        Table::new("Location")
            .column(Column::integer_key("LocationId"))
            .column(Column::new("BookNumber", "INTEGER"))
    }

    fn note() -> Table {
        Table::new("Note")
            .column(Column::integer_key("NoteId"))
            .column(Column::new("LocationId", "INTEGER"))
            .foreign_key("LocationId", "Location", "LocationId")
    }

    fn tag_map() -> Table {
        Table::new("TagMap")
            .column(Column::integer_key("TagMapId"))
            .column(Column::new("NoteId", "INTEGER"))
            .foreign_key("NoteId", "Note", "NoteId")
    }

    #[test]
    fn affinity_rules() {
        assert_eq!(Affinity::from_decl("INTEGER"), Affinity::Integer);
        assert_eq!(Affinity::from_decl("bigint"), Affinity::Integer);
        assert_eq!(Affinity::from_decl("VARCHAR(40)"), Affinity::Text);
        assert_eq!(Affinity::from_decl("DOUBLE"), Affinity::Real);
        assert_eq!(Affinity::from_decl(""), Affinity::Blob);
        assert_eq!(Affinity::from_decl("DATETIME"), Affinity::Numeric);
        assert!(!Affinity::Integer.accepts_strict(&Value::text("7")));
        assert!(Affinity::Real.accepts_strict(&Value::Integer(7)));
        assert!(Affinity::Text.accepts_strict(&Value::Null));
    }

    #[test]
    fn only_strict_tables_check_types() {
        let count = Column::new("Count", "INTEGER");
        assert!(count.accepts(&Value::real(2.5), false));
        assert!(count.accepts(&Value::text("n/a"), false));
        assert!(!count.accepts(&Value::real(2.5), true));
        assert!(count.accepts(&Value::Integer(2), true));
        assert!(Column::new("Any", "ANY").accepts(&Value::Blob(vec![1]), true));
    }

    #[test]
    fn dependency_order_puts_parents_first() {
        let schema = Schema::new(vec![tag_map(), note(), location()]).unwrap();
        let order: Vec<&str> = schema.dependency_order().unwrap().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(order, vec!["Location", "Note", "TagMap"]);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let t = Table::new("Tree")
            .column(Column::integer_key("Id"))
            .column(Column::new("ParentId", "INTEGER"))
            .foreign_key("ParentId", "Tree", "Id");
        let schema = Schema::new(vec![t]).unwrap();
        assert!(matches!(schema.dependency_order(), Err(MergeError::DependencyCycle(_))));
    }

    #[test]
    fn unknown_fk_target_rejected() {
        let err = Schema::new(vec![note()]).unwrap_err();
        assert!(matches!(err, MergeError::InvalidSchema(_)));
    }

    #[test]
    fn key_kinds() {
        assert_eq!(location().key_kind(), KeyKind::Surrogate(0));
        let map = Table::new("Map")
            .column(Column::new("A", "INTEGER").primary())
            .column(Column::new("B", "INTEGER").primary());
        assert_eq!(map.key_kind(), KeyKind::Natural(vec![0, 1]));
        let text = Table::new("M").column(Column::new("identifier", "TEXT").primary());
        assert_eq!(text.key_kind(), KeyKind::Natural(vec![0]));
        assert_eq!(text.key_of(&[Value::text("v1")], 4), Value::text("v1"));
        assert_eq!(map.key_of(&[Value::Integer(1), Value::Integer(2)], 4), Value::Integer(5));
    }

    #[test]
    fn compatibility_detects_column_change() {
        let a = Schema::new(vec![location(), note()]).unwrap();
        let mut changed = note();
        changed.columns[1].decl_type = "TEXT".into();
        let b = Schema::new(vec![location(), changed]).unwrap();
        let err = a.check_compatible(&b, "a", "b").unwrap_err();
        assert!(matches!(err, MergeError::SchemaMismatch { .. }));
        assert!(a.check_compatible(&a.clone(), "a", "a2").is_ok());
    }

    #[test]
    fn referenced_columns_lists_targets() {
        let schema = Schema::new(vec![location(), note(), tag_map()]).unwrap();
        let loc = schema.table("Location").unwrap();
        assert_eq!(schema.referenced_columns(loc), vec![0]);
        let tm = schema.table("TagMap").unwrap();
        assert!(schema.referenced_columns(tm).is_empty());
    }
}

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::error::MergeError;
use crate::remap::KeyMap;
use crate::report::MergeReport;
use crate::schema::{Schema, Table};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Position of a source in the input list. Doubles as its origin tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SourceId(pub usize);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row as loaded from a source, in schema column order.
#[derive(Debug, Clone)]
pub struct Row {
    pub origin: SourceId,
    pub original_key: Value,
    pub values: Vec<Value>,
}

/// One table's rows from one source.
#[derive(Debug, Clone)]
pub struct Relation {
    pub table: String,
    pub rows: Vec<Row>,
}

impl Relation {
    /// Tag raw rows with their origin and original key.
    pub fn new(table: &Table, origin: SourceId, rows: Vec<Vec<Value>>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(ordinal, values)| Row {
                origin,
                original_key: table.key_of(&values, ordinal),
                values,
            })
            .collect();
        Self::from_rows(&table.name, rows)
    }

    pub fn from_rows(table: &str, rows: Vec<Row>) -> Self {
        Self {
            table: table.to_string(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A fully loaded input database.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: SourceId,
    pub label: String,
    pub schema: Schema,
    pub relations: HashMap<String, Relation>,
}

impl Source {
    pub fn new(id: SourceId, label: impl Into<String>, schema: Schema) -> Self {
        Self {
            id,
            label: label.into(),
            schema,
            relations: HashMap::new(),
        }
    }

    /// Add rows for a table declared in this source's schema.
    pub fn add_rows(&mut self, table: &str, rows: Vec<Vec<Value>>) -> Result<(), MergeError> {
        let def = self
            .schema
            .table(table)
            .ok_or_else(|| MergeError::InvalidSchema(format!("unknown table '{table}'")))?;
        if let Some(bad) = rows.iter().find(|r| r.len() != def.columns.len()) {
            return Err(MergeError::InvalidSchema(format!(
                "{table}: row has {} values, table has {} columns",
                bad.len(),
                def.columns.len()
            )));
        }
        let relation = Relation::new(def, self.id, rows);
        self.relations.insert(table.to_string(), relation);
        Ok(())
    }

    pub fn relation(&self, table: &str) -> Option<&Relation> {
        self.relations.get(table)
    }

    pub fn row_count(&self) -> usize {
        self.relations.values().map(Relation::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One source row folded into a merged row.
#[derive(Debug, Clone, Serialize)]
pub struct Contribution {
    pub origin: SourceId,
    pub original_key: Value,
    /// Original values of the table's referenced columns, used to build the
    /// key map when the table is sealed.
    #[serde(skip)]
    pub referenced: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct MergedRow {
    pub values: Vec<Value>,
    pub contributions: Vec<Contribution>,
}

impl MergedRow {
    pub fn has_origin(&self, origin: SourceId) -> bool {
        self.contributions.iter().any(|c| c.origin == origin)
    }

    /// `origin:key` pairs, e.g. `0:5 1:9`.
    pub fn provenance(&self) -> String {
        self.contributions
            .iter()
            .map(|c| format!("{}:{}", c.origin, c.original_key))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct MergedTable {
    pub name: String,
    pub rows: Vec<MergedRow>,
}

impl MergedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub sources: Vec<String>,
}

/// Everything the writer needs: the shared schema, merged tables in
/// dependency order, sealed key maps and the run report.
#[derive(Debug)]
pub struct MergeResult {
    pub schema: Schema,
    pub tables: Vec<MergedTable>,
    pub key_maps: BTreeMap<String, KeyMap>,
    pub report: MergeReport,
}

impl MergeResult {
    pub fn table(&self, name: &str) -> Option<&MergedTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Merged rows of a table as plain value vectors.
    pub fn rows(&self, name: &str) -> Vec<&[Value]> {
        self.table(name)
            .map(|t| t.rows.iter().map(|r| r.values.as_slice()).collect())
            .unwrap_or_default()
    }
}

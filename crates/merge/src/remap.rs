//! Original-key → merged-key translation.
//!
//! Every table that other tables reference gets a [`KeyMap`] once all of its
//! rows are merged. Children are rewritten against the sealed maps of their
//! parents, so a table may only be remapped after every parent is sealed.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::MergeError;
use crate::model::{Row, SourceId};
use crate::schema::Table;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Key map
// ---------------------------------------------------------------------------

/// Per-column translation of original values to merged values.
///
/// A column is mapped when it is the table's single primary key or the target
/// of some foreign key. Values of source rows that were skipped are kept as
/// tombstones so children can tell a cascade from an orphan.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    pub table: String,
    primary: Option<String>,
    columns: HashMap<String, HashMap<(SourceId, Value), Value>>,
    skipped: HashMap<String, HashSet<(SourceId, Value)>>,
}

impl KeyMap {
    pub fn new(table: &Table) -> Self {
        Self {
            table: table.name.clone(),
            primary: table.primary_key_column().map(str::to_string),
            ..Self::default()
        }
    }

    pub fn insert(&mut self, column: &str, origin: SourceId, original: Value, merged: Value) {
        if original.is_null() {
            return;
        }
        self.columns
            .entry(column.to_string())
            .or_default()
            .insert((origin, original), merged);
    }

    pub fn mark_skipped(&mut self, column: &str, origin: SourceId, original: Value) {
        if original.is_null() {
            return;
        }
        self.skipped
            .entry(column.to_string())
            .or_default()
            .insert((origin, original));
    }

    pub fn get(&self, column: &str, origin: SourceId, original: &Value) -> Option<&Value> {
        self.columns.get(column)?.get(&(origin, original.clone()))
    }

    /// Lookup by the table's single primary key.
    pub fn get_key(&self, origin: SourceId, original: &Value) -> Option<&Value> {
        self.get(self.primary.as_deref()?, origin, original)
    }

    pub fn was_skipped(&self, column: &str, origin: SourceId, original: &Value) -> bool {
        self.skipped
            .get(column)
            .is_some_and(|s| s.contains(&(origin, original.clone())))
    }

    /// Number of mapped primary-key values.
    pub fn len(&self) -> usize {
        self.primary
            .as_deref()
            .and_then(|p| self.columns.get(p))
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Remapper
// ---------------------------------------------------------------------------

/// A foreign key whose value has no mapping in the parent's key map.
#[derive(Debug, Clone, PartialEq)]
pub struct Dangling {
    pub column: String,
    pub target_table: String,
    pub value: Value,
    /// The parent row existed in the source but was skipped by this merge.
    pub cascade: bool,
}

/// Holds the sealed key maps and enforces parent-before-child processing.
#[derive(Debug, Default)]
pub struct KeyRemapper {
    maps: BTreeMap<String, KeyMap>,
}

impl KeyRemapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start remapping `table`. Every parent must already be sealed.
    pub fn begin(&mut self, table: &Table) -> Result<(), MergeError> {
        if self.maps.contains_key(&table.name) {
            return Err(MergeError::AlreadyRemapped(table.name.clone()));
        }
        if let Some(parent) = table.parents().into_iter().find(|p| !self.maps.contains_key(*p)) {
            return Err(MergeError::OutOfOrder {
                table: table.name.clone(),
                parent: parent.to_string(),
            });
        }
        Ok(())
    }

    /// New surrogate key for the merged row at `index`: keys are dense and
    /// 1-based in merged order.
    pub fn assign(&self, _table: &Table, index: usize) -> Value {
        Value::Integer(index as i64 + 1)
    }

    pub fn lookup(&self, table: &str, origin: SourceId, key: &Value) -> Option<&Value> {
        self.maps.get(table)?.get_key(origin, key)
    }

    pub fn lookup_column(&self, table: &str, column: &str, origin: SourceId, value: &Value) -> Option<&Value> {
        self.maps.get(table)?.get(column, origin, value)
    }

    /// Copy of `row.values` with every foreign key rewritten to merged keys.
    ///
    /// NULL foreign keys stay NULL. The first value without a mapping is
    /// returned as [`Dangling`].
    pub fn rewrite(&self, table: &Table, row: &Row) -> Result<Vec<Value>, Dangling> {
        let mut values = row.values.clone();
        for fk in &table.foreign_keys {
            let Some(col) = table.column_index(&fk.column) else { continue };
            let original = &row.values[col];
            if original.is_null() {
                continue;
            }
            match self.lookup_column(&fk.target_table, &fk.target_column, row.origin, original) {
                Some(merged) => values[col] = merged.clone(),
                None => {
                    let cascade = self
                        .maps
                        .get(&fk.target_table)
                        .is_some_and(|m| m.was_skipped(&fk.target_column, row.origin, original));
                    return Err(Dangling {
                        column: fk.column.clone(),
                        target_table: fk.target_table.clone(),
                        value: original.clone(),
                        cascade,
                    });
                }
            }
        }
        Ok(values)
    }

    /// Finish a table: its children may now be remapped.
    pub fn seal(&mut self, map: KeyMap) {
        self.maps.insert(map.table.clone(), map);
    }

    pub fn into_maps(self) -> BTreeMap<String, KeyMap> {
        self.maps
    }
}

//! Post-merge constraint checks.
//!
//! The merged tables must satisfy the schema before anything is written.
//! A failure here means the engine produced an invalid row; it is reported
//! as [`MergeError::ConstraintViolation`] rather than left to the database.

use std::collections::{HashMap, HashSet};

use crate::error::MergeError;
use crate::model::MergedTable;
use crate::schema::{Schema, Table};
use crate::value::Value;

pub fn check_constraints(schema: &Schema, tables: &[MergedTable]) -> Result<(), MergeError> {
    let by_name: HashMap<&str, &MergedTable> = tables.iter().map(|t| (t.name.as_str(), t)).collect();
    for merged in tables {
        let table = schema.table(&merged.name).ok_or_else(|| violation(&merged.name, "table not in schema".into()))?;
        check_columns(table, merged)?;
        check_unique(table, merged)?;
        check_foreign_keys(schema, table, merged, &by_name)?;
    }
    Ok(())
}

fn violation(table: &str, detail: String) -> MergeError {
    MergeError::ConstraintViolation {
        table: table.to_string(),
        detail,
    }
}

fn check_columns(table: &Table, merged: &MergedTable) -> Result<(), MergeError> {
    // INTEGER PRIMARY KEY aliases the rowid and only holds integers
    let rowid = table
        .surrogate_index()
        .filter(|&i| table.columns[i].decl_type.eq_ignore_ascii_case("INTEGER"));
    for (n, row) in merged.rows.iter().enumerate() {
        if row.values.len() != table.columns.len() {
            return Err(violation(
                &table.name,
                format!("row {} has {} values", n + 1, row.values.len()),
            ));
        }
        for (i, (column, value)) in table.columns.iter().zip(&row.values).enumerate() {
            if column.not_null && value.is_null() {
                return Err(violation(&table.name, format!("row {}: {} is NULL", n + 1, column.name)));
            }
            let accepted = if Some(i) == rowid {
                matches!(value, Value::Null | Value::Integer(_))
            } else {
                column.accepts(value, table.strict)
            };
            if !accepted {
                return Err(violation(
                    &table.name,
                    format!(
                        "row {}: {} holds {} value in {} column",
                        n + 1,
                        column.name,
                        value.type_name(),
                        column.decl_type
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn check_unique(table: &Table, merged: &MergedTable) -> Result<(), MergeError> {
    let pk: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.primary_key)
        .map(|(i, _)| i)
        .collect();
    let mut sets: Vec<Vec<usize>> = Vec::new();
    if !pk.is_empty() {
        sets.push(pk);
    }
    for unique in &table.unique {
        sets.push(unique.iter().filter_map(|c| table.column_index(c)).collect());
    }

    for set in sets {
        let mut seen: HashSet<Vec<&Value>> = HashSet::new();
        for row in &merged.rows {
            let key: Vec<&Value> = set.iter().map(|&i| &row.values[i]).collect();
            // SQL: NULLs never collide
            if key.iter().any(|v| v.is_null()) {
                continue;
            }
            if !seen.insert(key.clone()) {
                let names: Vec<&str> = set.iter().map(|&i| table.columns[i].name.as_str()).collect();
                let shown: Vec<String> = key.iter().map(|v| v.to_string()).collect();
                return Err(violation(
                    &table.name,
                    format!("duplicate ({}) = ({})", names.join(", "), shown.join(", ")),
                ));
            }
        }
    }
    Ok(())
}

fn check_foreign_keys(
    schema: &Schema,
    table: &Table,
    merged: &MergedTable,
    tables: &HashMap<&str, &MergedTable>,
) -> Result<(), MergeError> {
    for fk in &table.foreign_keys {
        let Some(col) = table.column_index(&fk.column) else { continue };
        let target_idx = schema
            .table(&fk.target_table)
            .and_then(|t| t.column_index(&fk.target_column));
        let targets: HashSet<&Value> = match (tables.get(fk.target_table.as_str()), target_idx) {
            (Some(target), Some(idx)) => target.rows.iter().map(|r| &r.values[idx]).collect(),
            _ => HashSet::new(),
        };
        for (n, row) in merged.rows.iter().enumerate() {
            let value = &row.values[col];
            if !value.is_null() && !targets.contains(value) {
                return Err(violation(
                    &table.name,
                    format!(
                        "row {}: {} = {} has no match in {}.{}",
                        n + 1,
                        fk.column,
                        value,
                        fk.target_table,
                        fk.target_column
                    ),
                ));
            }
        }
    }
    Ok(())
}

//! Debug artifacts: a plain-text schema dump and a workbook with one sheet
//! per merged table.

use std::fmt::Write as _;
use std::path::Path;

use rust_xlsxwriter::{Format, Workbook};

use jwlmerge_engine::{MergeResult, Schema, Value};

use crate::error::IoError;

/// Excel's sheet-name limit.
const MAX_SHEET_NAME: usize = 31;

pub fn schema_dump(schema: &Schema) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "user_version = {}", schema.user_version);
    for table in &schema.tables {
        let _ = writeln!(out, "\n{}", table.name);
        for column in &table.columns {
            let _ = writeln!(
                out,
                "  {:<28} {:<12} pk={} notnull={}",
                column.name,
                column.decl_type,
                u8::from(column.primary_key),
                u8::from(column.not_null)
            );
        }
        for fk in &table.foreign_keys {
            let _ = writeln!(out, "  fk {} -> {}.{}", fk.column, fk.target_table, fk.target_column);
        }
        for unique in &table.unique {
            let _ = writeln!(out, "  unique ({})", unique.join(", "));
        }
        if let Some(sql) = &table.sql {
            let _ = writeln!(out, "  {sql}");
        }
    }
    for sql in schema.indexes.iter().chain(&schema.triggers) {
        let _ = writeln!(out, "\n{sql}");
    }
    out
}

pub fn write_schema_dump(schema: &Schema, path: &Path) -> Result<(), IoError> {
    std::fs::write(path, schema_dump(schema))?;
    Ok(())
}

fn sheet_name(table: &str) -> String {
    table
        .chars()
        .map(|c| if "[]:*?/\\".contains(c) { '_' } else { c })
        .take(MAX_SHEET_NAME)
        .collect()
}

/// One sheet per merged table: a bold header row, every column, and an
/// `_origins` column listing the `source:key` pairs folded into each row.
pub fn write_workbook(result: &MergeResult, path: &Path) -> Result<(), IoError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    for merged in &result.tables {
        let Some(table) = result.schema.table(&merged.name) else { continue };
        let worksheet = workbook.add_worksheet().set_name(sheet_name(&merged.name))?;

        let origins_col = table.columns.len() as u16;
        for (c, column) in table.columns.iter().enumerate() {
            worksheet.write_string_with_format(0, c as u16, &column.name, &header)?;
        }
        worksheet.write_string_with_format(0, origins_col, "_origins", &header)?;

        for (r, row) in merged.rows.iter().enumerate() {
            let r = r as u32 + 1;
            for (c, value) in row.values.iter().enumerate() {
                let c = c as u16;
                match value {
                    Value::Null => {}
                    Value::Integer(i) => {
                        worksheet.write_number(r, c, *i as f64)?;
                    }
                    Value::Real(f) => {
                        worksheet.write_number(r, c, f.0)?;
                    }
                    Value::Text(s) => {
                        worksheet.write_string(r, c, s)?;
                    }
                    Value::Blob(_) => {
                        worksheet.write_string(r, c, value.to_string())?;
                    }
                }
            }
            worksheet.write_string(r, origins_col, row.provenance())?;
        }
    }

    workbook.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jwlmerge_engine::{Column, MergeConfig, Source, SourceId, Table};
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new(vec![Table::new("PlaylistItemIndependentMediaMap")
            .column(Column::integer_key("Id"))
            .column(Column::new("Label", "TEXT").required())])
        .unwrap()
    }

    #[test]
    fn dump_lists_columns_and_keys() {
        let dump = schema_dump(&schema());
        assert!(dump.contains("PlaylistItemIndependentMediaMap"));
        assert!(dump.contains("pk=1"));
        assert!(dump.contains("notnull=1"));
    }

    #[test]
    fn long_table_names_are_truncated() {
        assert_eq!(sheet_name("PlaylistItemIndependentMediaMap").len(), 31);
        assert_eq!(sheet_name("a/b"), "a_b");
    }

    #[test]
    fn workbook_is_written() {
        let mut source = Source::new(SourceId(0), "a", schema());
        source
            .add_rows(
                "PlaylistItemIndependentMediaMap",
                vec![vec![Value::Integer(1), Value::text("walk")], vec![Value::Integer(2), Value::text("run")]],
            )
            .unwrap();
        let result = jwlmerge_engine::run(&MergeConfig::default(), &[source]).unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merged.xlsx");
        write_workbook(&result, &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}

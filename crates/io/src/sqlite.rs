//! SQLite user-data databases: schema introspection, row loading and the
//! merged-database writer.

use std::path::Path;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags, ToSql};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use jwlmerge_engine::schema::{Column, ForeignKey};
use jwlmerge_engine::{MergeError, MergeResult, Schema, Source, SourceId, Table, Value};

use crate::error::IoError;

// ============================================================================
// Values
// ============================================================================

fn value_from_ref(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// Binds an engine value as a statement parameter.
struct SqlValue<'a>(&'a Value);

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self.0 {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(r) => ValueRef::Real(r.0),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

// ============================================================================
// Loading
// ============================================================================

/// Read tables, columns, keys, unique constraints, indexes, triggers and
/// `user_version` from an open database.
pub fn load_schema(conn: &Connection) -> Result<Schema, IoError> {
    let mut stmt = conn.prepare(
        "SELECT type, name, sql FROM sqlite_master \
         WHERE name NOT LIKE 'sqlite_%' ORDER BY rowid",
    )?;
    let objects = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut tables = Vec::new();
    let mut indexes = Vec::new();
    let mut triggers = Vec::new();
    for (kind, name, sql) in objects {
        match (kind.as_str(), sql) {
            ("table", sql) => {
                let mut table = load_table(conn, &name)?;
                table.strict = sql.as_deref().is_some_and(is_strict);
                table.sql = sql;
                tables.push(table);
            }
            // Automatic indexes have no SQL; they come back with the table
            ("index", Some(sql)) => indexes.push(sql),
            ("trigger", Some(sql)) => triggers.push(sql),
            _ => {}
        }
    }

    resolve_foreign_keys(&mut tables);

    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let mut schema = Schema::new(tables)?.with_user_version(user_version);
    schema.indexes = indexes;
    schema.triggers = triggers;
    Ok(schema)
}

fn load_table(conn: &Connection, name: &str) -> Result<Table, IoError> {
    let mut table = Table::new(name);

    let mut stmt = conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")?;
    table.columns = stmt
        .query_map([name], |row| {
            Ok(Column {
                name: row.get(0)?,
                decl_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? > 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare("SELECT \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq")?;
    table.foreign_keys = stmt
        .query_map([name], |row| {
            Ok(ForeignKey {
                target_table: row.get(0)?,
                column: row.get(1)?,
                // NULL means the target's primary key; filled in later
                target_column: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare("SELECT name, origin FROM pragma_index_list(?1) WHERE \"unique\" = 1 ORDER BY seq")?;
    let unique_indexes = stmt
        .query_map([name], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    for (index, origin) in unique_indexes {
        if origin == "pk" {
            continue;
        }
        let columns = info
            .query_map([&index], |row| row.get::<_, Option<String>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        // Expression indexes have unnamed columns
        if let Some(columns) = columns.into_iter().collect::<Option<Vec<String>>>() {
            if !table.unique.contains(&columns) {
                table.unique.push(columns);
            }
        }
    }

    Ok(table)
}

/// Canonicalize target table names and fill implicit target columns.
fn resolve_foreign_keys(tables: &mut [Table]) {
    let targets: Vec<(String, Option<String>)> = tables
        .iter()
        .map(|t| (t.name.clone(), t.primary_key_column().map(str::to_string)))
        .collect();
    for table in tables.iter_mut() {
        for fk in &mut table.foreign_keys {
            if let Some((name, pk)) = targets.iter().find(|(n, _)| n.eq_ignore_ascii_case(&fk.target_table)) {
                fk.target_table = name.clone();
                if fk.target_column.is_empty() {
                    fk.target_column = pk.clone().unwrap_or_else(|| "rowid".to_string());
                }
            }
        }
    }
}

/// Table options follow the closing parenthesis: `) STRICT, WITHOUT ROWID`.
fn is_strict(create_sql: &str) -> bool {
    create_sql
        .rsplit(')')
        .next()
        .is_some_and(|options| options.split(',').any(|o| o.trim().eq_ignore_ascii_case("STRICT")))
}

/// Load one database file as a merge source.
pub fn load_source(path: &Path, id: SourceId, label: &str) -> Result<Source, IoError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let schema = load_schema(&conn)?;
    let mut source = Source::new(id, label, schema.clone());

    for table in &schema.tables {
        let columns: Vec<String> = table.columns.iter().map(|c| quote(&c.name)).collect();
        let sql = format!("SELECT {} FROM {}", columns.join(", "), quote(&table.name));
        let mut stmt = conn.prepare(&sql)?;
        let width = table.columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(value_from_ref))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        debug!(source = label, table = %table.name, rows = rows.len(), "loaded");
        source.add_rows(&table.name, rows)?;
    }

    info!(source = label, tables = schema.tables.len(), rows = source.row_count(), "source loaded");
    Ok(source)
}

// ============================================================================
// Writing
// ============================================================================

/// CREATE TABLE statement for tables built without one.
pub fn create_table_sql(table: &Table) -> String {
    let pk: Vec<&Column> = table.columns.iter().filter(|c| c.primary_key).collect();
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut def = quote(&c.name);
            if !c.decl_type.is_empty() {
                def.push(' ');
                def.push_str(&c.decl_type);
            }
            if c.not_null {
                def.push_str(" NOT NULL");
            }
            if pk.len() == 1 && c.primary_key {
                def.push_str(" PRIMARY KEY");
            }
            def
        })
        .collect();
    if pk.len() > 1 {
        let cols: Vec<String> = pk.iter().map(|c| quote(&c.name)).collect();
        parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }
    for unique in &table.unique {
        let cols: Vec<String> = unique.iter().map(|c| quote(c)).collect();
        parts.push(format!("UNIQUE ({})", cols.join(", ")));
    }
    for fk in &table.foreign_keys {
        parts.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            quote(&fk.column),
            quote(&fk.target_table),
            quote(&fk.target_column)
        ));
    }
    format!("CREATE TABLE {} ({})", quote(&table.name), parts.join(", "))
}

fn constraint_error(table: &str, err: rusqlite::Error) -> IoError {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
            IoError::Merge(MergeError::ConstraintViolation {
                table: table.to_string(),
                detail: msg.unwrap_or_else(|| e.to_string()),
            })
        }
        other => IoError::Sqlite(other),
    }
}

/// Write a merged result as a new database at `path`.
///
/// The database is built in a temporary file next to `path` and moved into
/// place only after every row is inserted and the foreign-key check passes.
pub fn write_database(result: &MergeResult, path: &Path) -> Result<(), IoError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut conn = Connection::open(tmp.path())?;
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        let tx = conn.transaction()?;
        let schema = &result.schema;

        for table in &schema.tables {
            let sql = table.sql.clone().unwrap_or_else(|| create_table_sql(table));
            tx.execute_batch(&sql)?;
        }

        for merged in &result.tables {
            let Some(table) = schema.table(&merged.name) else { continue };
            let columns: Vec<String> = table.columns.iter().map(|c| quote(&c.name)).collect();
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(&table.name),
                columns.join(", "),
                placeholders.join(", ")
            );
            let mut stmt = tx.prepare(&sql)?;
            for row in &merged.rows {
                stmt.execute(params_from_iter(row.values.iter().map(SqlValue)))
                    .map_err(|e| constraint_error(&table.name, e))?;
            }
            debug!(table = %table.name, rows = merged.rows.len(), "written");
        }

        {
            let mut check = tx.prepare("PRAGMA foreign_key_check")?;
            let mut rows = check.query([])?;
            if let Some(row) = rows.next()? {
                let table: String = row.get(0)?;
                let parent: String = row.get(2)?;
                return Err(IoError::Merge(MergeError::ConstraintViolation {
                    detail: format!("foreign key into '{parent}' has no match"),
                    table,
                }));
            }
        }

        for sql in schema.indexes.iter().chain(&schema.triggers) {
            tx.execute_batch(sql)?;
        }
        tx.pragma_update(None, "user_version", schema.user_version)?;
        tx.commit()?;
    }
    tmp.persist(path)?;
    info!(path = %path.display(), tables = result.tables.len(), "database written");
    Ok(())
}

//! `jwlmerge inspect`: what a backup archive holds.

use std::path::PathBuf;

use serde::Serialize;

use jwlmerge_engine::SourceId;
use jwlmerge_io::Archive;

use crate::CliError;

#[derive(Serialize)]
struct Inspection {
    archive: String,
    name: String,
    creation_date: String,
    device_name: String,
    schema_version: i64,
    user_version: i64,
    /// Tables in the order they are merged, parents first.
    tables: Vec<TableInfo>,
    media_files: Vec<String>,
}

#[derive(Serialize)]
struct TableInfo {
    name: String,
    rows: usize,
    references: Vec<String>,
}

pub fn cmd_inspect(path: PathBuf, json: bool) -> Result<(), CliError> {
    let archive = Archive::open(&path)?;
    let source = archive.load_source(SourceId(0))?;
    let order = source.schema.dependency_order()?;

    let tables = order
        .iter()
        .map(|table| TableInfo {
            name: table.name.clone(),
            rows: source.relation(&table.name).map(|r| r.len()).unwrap_or(0),
            references: table.parents().into_iter().map(str::to_string).collect(),
        })
        .collect();

    let manifest = &archive.manifest;
    let inspection = Inspection {
        archive: archive.label.clone(),
        name: manifest.name.clone(),
        creation_date: manifest.creation_date.clone(),
        device_name: manifest.user_data_backup.device_name.clone(),
        schema_version: manifest.user_data_backup.schema_version,
        user_version: source.schema.user_version,
        tables,
        media_files: archive.entries.clone(),
    };

    if json {
        let json_str = serde_json::to_string_pretty(&inspection)
            .map_err(|e| CliError::other(format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
        return Ok(());
    }

    println!("archive:        {}", inspection.archive);
    println!("name:           {}", inspection.name);
    println!("created:        {}", inspection.creation_date);
    println!("device:         {}", inspection.device_name);
    println!("schema version: {} (user_version {})", inspection.schema_version, inspection.user_version);
    println!();
    println!("{:<32} {:>8}  references", "table", "rows");
    for table in &inspection.tables {
        println!("{:<32} {:>8}  {}", table.name, table.rows, table.references.join(", "));
    }
    println!();
    println!("{} media/base files", inspection.media_files.len());
    Ok(())
}

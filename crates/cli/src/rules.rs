//! `jwlmerge rules`: show or validate merge rules.

use std::path::PathBuf;

use jwlmerge_engine::config::JW_LIBRARY_RULES;
use jwlmerge_engine::{MergeConfig, SourceId};
use jwlmerge_io::Archive;

use crate::CliError;

pub fn cmd_rules(check: Option<PathBuf>, against: Option<PathBuf>) -> Result<(), CliError> {
    let Some(path) = check else {
        print!("{JW_LIBRARY_RULES}");
        return Ok(());
    };

    let text = std::fs::read_to_string(&path)
        .map_err(|e| CliError::rules(format!("cannot read rules {}: {e}", path.display())))?;
    let config = MergeConfig::from_toml(&text)?;

    let Some(archive_path) = against else {
        eprintln!("{}: {} table rules, ok", path.display(), config.tables.len());
        return Ok(());
    };

    let archive = Archive::open(&archive_path)?;
    let source = archive.load_source(SourceId(0))?;
    let warnings = config.validate(&source.schema)?;
    for warning in &warnings {
        eprintln!("warning: {warning}");
    }
    eprintln!(
        "{}: {} table rules, valid for {} ({} warnings)",
        path.display(),
        config.tables.len(),
        archive.label,
        warnings.len(),
    );
    Ok(())
}

use std::collections::BTreeMap;

use crate::config::MediaConfig;
use crate::model::{MergeResult, SourceId};

/// An archive member the merged database refers to, and the sources that
/// can supply it (the surviving row's origin first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub file_name: String,
    pub origins: Vec<SourceId>,
}

/// Every file name held in a configured media column of the merged output,
/// sorted by name.
pub fn media_references(result: &MergeResult, media: &MediaConfig) -> Vec<MediaReference> {
    let mut found: BTreeMap<String, Vec<SourceId>> = BTreeMap::new();
    for entry in &media.columns {
        let Some((table_name, column)) = entry.split_once('.') else { continue };
        let (Some(table), Some(merged)) = (result.schema.table(table_name), result.table(table_name)) else {
            continue;
        };
        let Some(col) = table.column_index(column) else { continue };
        for row in &merged.rows {
            let Some(name) = row.values[col].as_str().map(str::trim).filter(|n| !n.is_empty()) else {
                continue;
            };
            let origins = found.entry(name.to_string()).or_default();
            for c in &row.contributions {
                if !origins.contains(&c.origin) {
                    origins.push(c.origin);
                }
            }
        }
    }
    found
        .into_iter()
        .map(|(file_name, origins)| MediaReference { file_name, origins })
        .collect()
}

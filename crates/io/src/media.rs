//! Which files go into the merged archive, and from where.

use std::collections::HashMap;

use tracing::warn;

use jwlmerge_engine::media::MediaReference;
use jwlmerge_engine::SourceId;

use crate::archive::Archive;
use crate::error::IoError;
use crate::manifest::sha256_hex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub name: String,
    pub origin: SourceId,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MediaPlan {
    pub files: Vec<PlannedFile>,
    /// Referenced by the merged database but found in no archive.
    pub missing: Vec<String>,
    /// Same name, different content across archives; the first copy is kept.
    pub diverging: Vec<String>,
    /// Copies skipped because an identical file was already planned.
    pub deduplicated: usize,
}

impl MediaPlan {
    pub fn entries(&self) -> Vec<(String, Vec<u8>)> {
        self.files.iter().map(|f| (f.name.clone(), f.bytes.clone())).collect()
    }
}

/// Base files (`.png` thumbnails and the like) carried over from the first
/// archive.
pub fn base_files(first: &Archive) -> Result<Vec<PlannedFile>, IoError> {
    let mut files = Vec::new();
    for name in first.entries.iter().filter(|n| n.to_ascii_lowercase().ends_with(".png")) {
        if let Some(bytes) = first.read_entry(name)? {
            files.push(PlannedFile {
                name: name.clone(),
                origin: SourceId(0),
                bytes,
            });
        }
    }
    Ok(files)
}

/// Resolve every media reference to one copy of the file.
///
/// Each file is taken from the first of its origins that holds it, then from
/// the remaining archives in input order. Names already planned (base files)
/// are not written twice.
pub fn plan_media(archives: &[Archive], refs: &[MediaReference], base: Vec<PlannedFile>) -> Result<MediaPlan, IoError> {
    let mut plan = MediaPlan::default();
    let mut planned: HashMap<String, String> = HashMap::new();
    for file in &base {
        planned.insert(file.name.clone(), sha256_hex(&file.bytes));
    }
    plan.files = base;

    for reference in refs {
        let mut candidates: Vec<usize> = reference.origins.iter().map(|o| o.0).collect();
        let rest: Vec<usize> = (0..archives.len()).filter(|i| !candidates.contains(i)).collect();
        candidates.extend(rest);

        let mut found = false;
        for i in candidates {
            let Some(archive) = archives.get(i) else { continue };
            let Some(bytes) = archive.read_entry(&reference.file_name)? else { continue };
            let hash = sha256_hex(&bytes);
            match planned.get(&reference.file_name).cloned() {
                None => {
                    planned.insert(reference.file_name.clone(), hash);
                    plan.files.push(PlannedFile {
                        name: reference.file_name.clone(),
                        origin: SourceId(i),
                        bytes,
                    });
                    found = true;
                }
                Some(existing) if existing == hash => plan.deduplicated += 1,
                Some(_) => {
                    warn!(
                        file = %reference.file_name,
                        archive = %archive.label,
                        "media file differs between archives, keeping the first copy"
                    );
                    if !plan.diverging.contains(&reference.file_name) {
                        plan.diverging.push(reference.file_name.clone());
                    }
                }
            }
        }

        if !found && !planned.contains_key(&reference.file_name) {
            warn!(file = %reference.file_name, "referenced media file not found in any archive");
            plan.missing.push(reference.file_name.clone());
        }
    }
    Ok(plan)
}

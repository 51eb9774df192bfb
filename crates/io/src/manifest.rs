//! `manifest.json` of a backup archive.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MANIFEST_NAME: &str = "manifest.json";

/// Timestamp format used in manifests, e.g. `2024-03-01T08:00:00+0100`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub creation_date: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default, rename = "type")]
    pub kind: i64,
    pub user_data_backup: UserDataBackup,
    /// Fields this tool does not interpret, written back unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDataBackup {
    #[serde(default)]
    pub last_modified_date: String,
    #[serde(default)]
    pub device_name: String,
    pub database_name: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub schema_version: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Manifest for a merged archive, derived from the first source's.
    pub fn merged(&self, database: &[u8], device_name: &str, now: DateTime<Local>) -> Manifest {
        let stamp = now.format(TIMESTAMP_FORMAT).to_string();
        let mut manifest = self.clone();
        manifest.name = merged_archive_name(now);
        manifest.creation_date = stamp.clone();
        manifest.user_data_backup.last_modified_date = stamp;
        manifest.user_data_backup.device_name = device_name.to_string();
        manifest.user_data_backup.hash = sha256_hex(database);
        manifest
    }
}

/// `UserdataBackup_<YYYYmmdd-HHMMSS>_Merged.jwlibrary`
pub fn merged_archive_name(now: DateTime<Local>) -> String {
    format!("UserdataBackup_{}_Merged.jwlibrary", now.format("%Y%m%d-%H%M%S"))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

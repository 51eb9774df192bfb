//! Backup archives: a zip holding `manifest.json`, one SQLite database and
//! media files.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use jwlmerge_engine::{MergeError, Source, SourceId};

use crate::error::IoError;
use crate::manifest::{Manifest, MANIFEST_NAME};
use crate::sqlite;

/// An opened input archive. The database is extracted to a temporary
/// directory that lives as long as the archive.
#[derive(Debug)]
pub struct Archive {
    pub path: PathBuf,
    pub label: String,
    pub manifest: Manifest,
    /// Every entry except the manifest and the database.
    pub entries: Vec<String>,
    database: PathBuf,
    _workdir: TempDir,
}

impl Archive {
    pub fn open(path: &Path) -> Result<Self, IoError> {
        let file = File::open(path)?;
        let mut zip = ZipArchive::new(file)?;
        let names: Vec<String> = zip.file_names().map(str::to_string).collect();

        if !names.iter().any(|n| n == MANIFEST_NAME) {
            return Err(IoError::archive(path, "no manifest.json"));
        }
        let manifest = Manifest::from_json(&read_to_string(&mut zip, MANIFEST_NAME)?)?;

        let db_name = if names.contains(&manifest.user_data_backup.database_name) {
            manifest.user_data_backup.database_name.clone()
        } else {
            names
                .iter()
                .find(|n| n.ends_with(".db"))
                .cloned()
                .ok_or_else(|| IoError::archive(path, "no database in archive"))?
        };

        let workdir = TempDir::new()?;
        let database = workdir.path().join("userData.db");
        {
            let mut entry = zip.by_name(&db_name)?;
            let mut out = File::create(&database)?;
            std::io::copy(&mut entry, &mut out)?;
        }

        let mut entries: Vec<String> = names
            .into_iter()
            .filter(|n| n != MANIFEST_NAME && *n != db_name && !n.ends_with('/'))
            .collect();
        entries.sort();

        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        debug!(archive = %label, database = %db_name, entries = entries.len(), "archive opened");

        Ok(Self {
            path: path.to_path_buf(),
            label,
            manifest,
            entries,
            database,
            _workdir: workdir,
        })
    }

    pub fn schema_version(&self) -> i64 {
        self.manifest.user_data_backup.schema_version
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e == name)
    }

    /// Contents of a media or base file, `None` when the archive lacks it.
    pub fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>, IoError> {
        if !self.has_entry(name) {
            return Ok(None);
        }
        let mut zip = ZipArchive::new(File::open(&self.path)?)?;
        let mut entry = zip.by_name(name)?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    pub fn load_source(&self, id: SourceId) -> Result<Source, IoError> {
        sqlite::load_source(&self.database, id, &self.label)
    }
}

fn read_to_string<R: Read + std::io::Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<String, IoError> {
    let mut entry = zip.by_name(name)?;
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(content)
}

/// All archives must declare the same schema version.
pub fn check_schema_versions(archives: &[Archive]) -> Result<(), IoError> {
    let Some(first) = archives.first() else { return Ok(()) };
    for other in &archives[1..] {
        if other.schema_version() != first.schema_version() {
            return Err(MergeError::SchemaMismatch {
                left: first.label.clone(),
                right: other.label.clone(),
                detail: format!(
                    "manifest schemaVersion {} vs {}",
                    first.schema_version(),
                    other.schema_version()
                ),
            }
            .into());
        }
    }
    Ok(())
}

/// Write an archive atomically: the zip is built in a temporary file next to
/// `path` and renamed into place once complete. Entries are written in the
/// order given, after the manifest and database.
pub fn write_archive(
    path: &Path,
    manifest: &Manifest,
    database: &[u8],
    files: &[(String, Vec<u8>)],
) -> Result<(), IoError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)?;
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    {
        let mut zip = ZipWriter::new(tmp.as_file());
        zip.start_file(MANIFEST_NAME, options)?;
        zip.write_all(manifest.to_json()?.as_bytes())?;
        zip.start_file(manifest.user_data_backup.database_name.as_str(), options)?;
        zip.write_all(database)?;
        for (name, bytes) in files {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }
        zip.finish()?;
    }
    tmp.persist(path)?;
    info!(path = %path.display(), files = files.len() + 2, "archive written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn manifest(schema_version: i64) -> Manifest {
        Manifest::from_json(&format!(
            r#"{{"name":"b","creationDate":"","version":1,"type":0,
                "userDataBackup":{{"lastModifiedDate":"","deviceName":"d",
                "databaseName":"userData.db","hash":"","schemaVersion":{schema_version}}}}}"#
        ))
        .unwrap()
    }

    fn database_bytes(dir: &Path) -> Vec<u8> {
        let path = dir.join("seed.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Tag (TagId INTEGER PRIMARY KEY, Name TEXT);
             INSERT INTO Tag VALUES (1, 'Favorites');",
        )
        .unwrap();
        drop(conn);
        std::fs::read(&path).unwrap()
    }

    #[test]
    fn write_then_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jwlibrary");
        let files = vec![
            ("default_thumbnail.png".to_string(), vec![1, 2, 3]),
            ("photo.jpg".to_string(), vec![9; 64]),
        ];
        write_archive(&path, &manifest(14), &database_bytes(dir.path()), &files).unwrap();

        let archive = Archive::open(&path).unwrap();
        assert_eq!(archive.label, "a.jwlibrary");
        assert_eq!(archive.schema_version(), 14);
        assert_eq!(archive.entries, vec!["default_thumbnail.png", "photo.jpg"]);
        assert_eq!(archive.read_entry("photo.jpg").unwrap(), Some(vec![9; 64]));
        assert_eq!(archive.read_entry("missing.jpg").unwrap(), None);

        let source = archive.load_source(SourceId(0)).unwrap();
        assert_eq!(source.row_count(), 1);
    }

    #[test]
    fn missing_manifest_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.zip");
        {
            let mut zip = ZipWriter::new(File::create(&path).unwrap());
            zip.start_file("userData.db", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"x").unwrap();
            zip.finish().unwrap();
        }
        assert!(matches!(Archive::open(&path), Err(IoError::Archive { .. })));
    }

    #[test]
    fn schema_versions_must_agree() {
        let dir = TempDir::new().unwrap();
        let db = database_bytes(dir.path());
        let a = dir.path().join("a.jwlibrary");
        let b = dir.path().join("b.jwlibrary");
        write_archive(&a, &manifest(14), &db, &[]).unwrap();
        write_archive(&b, &manifest(13), &db, &[]).unwrap();
        let archives = vec![Archive::open(&a).unwrap(), Archive::open(&b).unwrap()];
        let err = check_schema_versions(&archives).unwrap_err();
        assert!(matches!(err, IoError::Merge(MergeError::SchemaMismatch { .. })));
        assert!(check_schema_versions(&archives[..1]).is_ok());
    }
}

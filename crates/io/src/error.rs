use jwlmerge_engine::MergeError;

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("zip: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("xlsx: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("cannot replace output file: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// The archive is readable but not a user-data backup.
    #[error("{path}: {detail}")]
    Archive { path: String, detail: String },

    #[error(transparent)]
    Merge(#[from] MergeError),
}

impl IoError {
    pub fn archive(path: &std::path::Path, detail: impl Into<String>) -> Self {
        IoError::Archive {
            path: path.display().to_string(),
            detail: detail.into(),
        }
    }
}

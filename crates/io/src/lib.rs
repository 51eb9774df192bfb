// File I/O: SQLite user-data databases, backup archives, debug dumps

pub mod archive;
pub mod debug;
pub mod error;
pub mod manifest;
pub mod media;
pub mod sqlite;

pub use archive::Archive;
pub use error::IoError;
pub use manifest::Manifest;

//! `jwlmerge-engine`: merge engine for relational user-data snapshots.
//!
//! Pure engine crate: receives sources already loaded into memory, returns
//! merged tables, key maps and a report. No database, archive or CLI
//! dependencies.
//!
//! Tables are merged parent-before-child. Each source row is rewritten
//! against the key maps of its parents, classified against the rows merged
//! so far (identical, conflicting or distinct) and folded in. Surrogate keys
//! are reassigned densely; the resulting key map is sealed before any child
//! table is processed.

pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod merged;
pub mod model;
pub mod remap;
pub mod report;
pub mod resolve;
pub mod schema;
pub mod validate;
pub mod value;

pub use config::{ConflictPolicy, MergeConfig, TableRule};
pub use engine::run;
pub use error::MergeError;
pub use model::{MergeResult, Source, SourceId};
pub use report::MergeReport;
pub use schema::{Column, Schema, Table};
pub use value::Value;

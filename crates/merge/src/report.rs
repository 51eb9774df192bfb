use std::fmt;

use serde::Serialize;

use crate::model::{MergeMeta, SourceId};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Per-table statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableStats {
    pub table: String,
    pub input_rows: usize,
    pub output_rows: usize,
    pub identical: usize,
    pub conflicts_merged: usize,
    pub conflicts_skipped: usize,
    pub dangling: usize,
    pub renumbered: usize,
}

impl TableStats {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Per-row events
// ---------------------------------------------------------------------------

/// Why a source row is absent from the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Conflicting with an existing row and the table's policy could not
    /// merge the two.
    UnresolvableConflict { merged_row: usize, columns: Vec<String> },
    /// A foreign key could not be rewritten. `cascade` is true when the
    /// parent was itself skipped during this merge, false when the parent
    /// was already missing in the source.
    DanglingReference {
        column: String,
        target_table: String,
        value: Value,
        cascade: bool,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnresolvableConflict { merged_row, columns } => {
                write!(f, "conflicts with merged row {merged_row} on {}", columns.join(", "))
            }
            SkipReason::DanglingReference { column, target_table, value, cascade } => {
                let why = if *cascade { "parent was skipped" } else { "parent missing in source" };
                write!(f, "{column} = {value} has no row in {target_table} ({why})")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkipRecord {
    pub table: String,
    pub origin: SourceId,
    pub original_key: Value,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// A conflict that the table's policy resolved by merging values.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictRecord {
    pub table: String,
    pub origin: SourceId,
    pub original_key: Value,
    /// 1-based position of the surviving row in the merged table.
    pub merged_row: usize,
    pub policy: String,
    /// Columns whose values disagreed.
    pub columns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportTotals {
    pub input_rows: usize,
    pub output_rows: usize,
    pub identical: usize,
    pub conflicts_merged: usize,
    pub conflicts_skipped: usize,
    pub dangling: usize,
    pub renumbered: usize,
}

/// End-of-run report. Skips never fail the run; they are listed here.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub meta: MergeMeta,
    pub totals: ReportTotals,
    pub tables: Vec<TableStats>,
    pub conflicts: Vec<ConflictRecord>,
    pub skips: Vec<SkipRecord>,
}

impl MergeReport {
    pub fn new(meta: MergeMeta) -> Self {
        Self {
            meta,
            totals: ReportTotals::default(),
            tables: Vec::new(),
            conflicts: Vec::new(),
            skips: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableStats> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn finish(&mut self) {
        self.totals = compute_totals(&self.tables);
    }

    /// Source label for an origin, falling back to its index.
    pub fn source_label(&self, origin: SourceId) -> String {
        self.meta
            .sources
            .get(origin.0)
            .cloned()
            .unwrap_or_else(|| origin.to_string())
    }

    pub fn summary_line(&self) -> String {
        let t = &self.totals;
        format!(
            "{} source(s), {} tables: {} rows in, {} rows out; {} identical, {} conflicts merged, {} skipped ({} unresolvable, {} dangling)",
            self.meta.sources.len(),
            self.tables.len(),
            t.input_rows,
            t.output_rows,
            t.identical,
            t.conflicts_merged,
            t.conflicts_skipped + t.dangling,
            t.conflicts_skipped,
            t.dangling,
        )
    }
}

/// Sum per-table statistics.
pub fn compute_totals(tables: &[TableStats]) -> ReportTotals {
    let mut totals = ReportTotals::default();
    for t in tables {
        totals.input_rows += t.input_rows;
        totals.output_rows += t.output_rows;
        totals.identical += t.identical;
        totals.conflicts_merged += t.conflicts_merged;
        totals.conflicts_skipped += t.conflicts_skipped;
        totals.dangling += t.dangling;
        totals.renumbered += t.renumbered;
    }
    totals
}

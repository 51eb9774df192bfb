//! Row identity and conflict resolution.
//!
//! A [`TableProfile`] compiles a table's rule and schema constraints into
//! column indices once per table. [`resolve`] classifies a candidate against
//! an existing merged row; [`merge_conflict`] applies the table's policy to a
//! conflicting pair.

use similar::{ChangeTag, TextDiff};

use crate::config::{ConflictPolicy, TableRule};
use crate::error::MergeError;
use crate::schema::{KeyKind, Schema, Table};
use crate::value::Value;

/// Classification of a candidate row against an existing merged row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Same content after normalization; the candidate folds in silently.
    Identical,
    /// Same logical record, different content.
    Conflicting,
    /// Different records.
    Distinct,
}

/// One natural key: a column set that identifies a logical record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey {
    pub columns: Vec<usize>,
    pub match_nulls: bool,
    /// Backed by a UNIQUE constraint or the primary key: two output rows
    /// may never share it.
    pub enforced: bool,
}

/// A table's rule and constraints resolved to column indices.
#[derive(Debug, Clone)]
pub struct TableProfile {
    pub table: String,
    pub column_names: Vec<String>,
    pub surrogate: Option<usize>,
    /// Columns compared for identity (all but the surrogate and ignored ones).
    pub content: Vec<usize>,
    pub natural_keys: Vec<NaturalKey>,
    /// Columns a merge never overwrites: surrogate, primary key, sequence.
    pub protected: Vec<usize>,
    /// Columns recorded per contribution for the key map.
    pub mapped: Vec<usize>,
    pub modified: Option<usize>,
    pub policy: ConflictPolicy,
    pub text_columns: Vec<usize>,
    pub singleton: bool,
    /// Sequence column and its scope columns.
    pub sequence: Option<(usize, Vec<usize>)>,
    pub trim_text: bool,
    pub blank_is_null: bool,
}

impl TableProfile {
    pub fn compile(schema: &Schema, table: &Table, rule: Option<&TableRule>) -> Result<Self, MergeError> {
        let default_rule = TableRule::default();
        let rule = rule.unwrap_or(&default_rule);
        let index = |name: &str| {
            table.column_index(name).ok_or_else(|| {
                MergeError::ConfigValidation(format!("{}: unknown column '{name}'", table.name))
            })
        };
        let indices = |names: &[String]| names.iter().map(|n| index(n)).collect::<Result<Vec<_>, _>>();

        let kind = table.key_kind();
        let surrogate = match kind {
            KeyKind::Surrogate(i) => Some(i),
            _ => None,
        };
        let ignored = indices(&rule.ignore)?;
        let content = (0..table.columns.len())
            .filter(|i| Some(*i) != surrogate && !ignored.contains(i))
            .collect();

        let sequence = match &rule.sequence {
            Some(seq) => Some((index(&seq.column)?, indices(&seq.scope)?)),
            None => None,
        };
        let seq_col = sequence.as_ref().map(|(c, _)| *c);

        let mut natural_keys: Vec<NaturalKey> = Vec::new();
        let mut push_key = |columns: Vec<usize>, match_nulls: bool, enforced: bool| {
            let usable = !columns.is_empty()
                && !columns.iter().any(|c| Some(*c) == surrogate || Some(*c) == seq_col);
            if !usable {
                return;
            }
            match natural_keys.iter_mut().find(|k| k.columns == columns) {
                Some(existing) => existing.enforced |= enforced,
                None => natural_keys.push(NaturalKey { columns, match_nulls, enforced }),
            }
        };
        for identity in &rule.identity {
            push_key(indices(identity)?, rule.match_nulls, false);
        }
        for unique in &table.unique {
            push_key(indices(unique)?, false, true);
        }
        if let KeyKind::Natural(cols) = &kind {
            push_key(cols.clone(), false, true);
        }

        let mut protected: Vec<usize> = match &kind {
            KeyKind::Surrogate(i) => vec![*i],
            KeyKind::Natural(cols) => cols.clone(),
            KeyKind::None => Vec::new(),
        };
        protected.extend(seq_col);

        let mut mapped = schema.referenced_columns(table);
        if let Some(pk) = table.primary_key_column().and_then(|n| table.column_index(n)) {
            if !mapped.contains(&pk) {
                mapped.push(pk);
                mapped.sort_unstable();
            }
        }

        Ok(Self {
            table: table.name.clone(),
            column_names: table.columns.iter().map(|c| c.name.clone()).collect(),
            surrogate,
            content,
            natural_keys,
            protected,
            mapped,
            modified: rule.modified.as_deref().map(index).transpose()?,
            policy: rule.on_conflict,
            text_columns: indices(&rule.text_columns)?,
            singleton: rule.singleton,
            sequence,
            trim_text: rule.trim_text,
            blank_is_null: rule.blank_is_null,
        })
    }

    pub fn normalize(&self, value: &Value) -> Value {
        value.normalized(self.trim_text, self.blank_is_null)
    }

    /// Content fingerprint used for identical-row detection.
    pub fn content_key(&self, values: &[Value]) -> Vec<Value> {
        self.content.iter().map(|&i| self.normalize(&values[i])).collect()
    }

    /// Normalized key values, or `None` when the row does not participate in
    /// this key (all NULL, or any NULL without `match_nulls`).
    pub fn natural_key(&self, key: &NaturalKey, values: &[Value]) -> Option<Vec<Value>> {
        let normalized: Vec<Value> = key.columns.iter().map(|&i| self.normalize(&values[i])).collect();
        let nulls = normalized.iter().filter(|v| v.is_null()).count();
        if nulls == normalized.len() || (nulls > 0 && !key.match_nulls) {
            return None;
        }
        Some(normalized)
    }

    /// Raw key values as SQLite compares them for a UNIQUE constraint, or
    /// `None` when any is NULL (NULLs never collide).
    pub fn enforced_key(&self, key: &NaturalKey, values: &[Value]) -> Option<Vec<Value>> {
        let raw: Vec<Value> = key.columns.iter().map(|&i| values[i].clone()).collect();
        if !key.enforced || raw.iter().any(Value::is_null) {
            return None;
        }
        Some(raw)
    }

    pub fn column_name(&self, index: usize) -> &str {
        &self.column_names[index]
    }

    fn is_blank(&self, value: &Value) -> bool {
        self.normalize(value).is_null()
    }

    /// Content columns where both rows hold different non-blank values.
    pub fn disagreements(&self, existing: &[Value], candidate: &[Value]) -> Vec<usize> {
        self.content
            .iter()
            .copied()
            .filter(|&i| {
                let (a, b) = (self.normalize(&existing[i]), self.normalize(&candidate[i]));
                !a.is_null() && !b.is_null() && a != b
            })
            .collect()
    }
}

/// Classify `candidate` against `existing`. Both rows must already carry
/// merged foreign-key values.
pub fn resolve(existing: &[Value], candidate: &[Value], profile: &TableProfile) -> Resolution {
    if profile.content_key(existing) == profile.content_key(candidate) {
        return Resolution::Identical;
    }
    if profile.singleton {
        return Resolution::Conflicting;
    }
    let shares_key = profile.natural_keys.iter().any(|key| {
        match (profile.natural_key(key, existing), profile.natural_key(key, candidate)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    });
    if shares_key {
        Resolution::Conflicting
    } else {
        Resolution::Distinct
    }
}

/// Result of applying a conflict policy.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictOutcome {
    /// The existing row now holds the merged values.
    Merged { columns: Vec<usize> },
    /// The policy could not merge; the candidate is dropped.
    Unresolvable { columns: Vec<usize> },
}

/// Apply the profile's conflict policy, updating `existing` in place on
/// success. `existing` is untouched when the outcome is unresolvable.
pub fn merge_conflict(existing: &mut [Value], candidate: &[Value], profile: &TableProfile) -> ConflictOutcome {
    let columns = profile.disagreements(existing, candidate);

    match profile.policy {
        ConflictPolicy::Skip => return ConflictOutcome::Unresolvable { columns },
        ConflictPolicy::FillMissing => {
            if !columns.is_empty() {
                return ConflictOutcome::Unresolvable { columns };
            }
            fill_missing(existing, candidate, profile);
        }
        ConflictPolicy::KeepExisting => fill_missing(existing, candidate, profile),
        ConflictPolicy::Newest => match newer(existing, candidate, profile) {
            Some(Newer::Candidate) => take_candidate(existing, candidate, profile),
            Some(Newer::Existing) => fill_missing(existing, candidate, profile),
            None => {
                if !columns.is_empty() {
                    return ConflictOutcome::Unresolvable { columns };
                }
                fill_missing(existing, candidate, profile);
            }
        },
        ConflictPolicy::DiffText => {
            let older: Vec<Value> = existing.to_vec();
            let candidate_newer = newer(existing, candidate, profile) == Some(Newer::Candidate);
            let (old_row, new_row) = if candidate_newer {
                take_candidate(existing, candidate, profile);
                (older.as_slice(), candidate)
            } else {
                fill_missing(existing, candidate, profile);
                (candidate, older.as_slice())
            };
            for &i in &profile.text_columns {
                let (old, new) = (profile.normalize(&old_row[i]), profile.normalize(&new_row[i]));
                if let (Some(old), Some(new)) = (old.as_str(), new.as_str()) {
                    if old != new {
                        existing[i] = Value::text(line_diff(old, new));
                    }
                }
            }
        }
    }

    if let Some(m) = profile.modified {
        if candidate[m] > existing[m] {
            existing[m] = candidate[m].clone();
        }
    }
    ConflictOutcome::Merged { columns }
}

#[derive(Debug, PartialEq, Eq)]
enum Newer {
    Existing,
    Candidate,
}

/// Which row has the greater `modified` value; `None` on a tie or when either
/// side lacks one.
fn newer(existing: &[Value], candidate: &[Value], profile: &TableProfile) -> Option<Newer> {
    let m = profile.modified?;
    let (a, b) = (&existing[m], &candidate[m]);
    if a.is_null() || b.is_null() {
        return None;
    }
    match b.cmp(a) {
        std::cmp::Ordering::Greater => Some(Newer::Candidate),
        std::cmp::Ordering::Less => Some(Newer::Existing),
        std::cmp::Ordering::Equal => None,
    }
}

fn fill_missing(existing: &mut [Value], candidate: &[Value], profile: &TableProfile) {
    for i in 0..existing.len() {
        if profile.protected.contains(&i) {
            continue;
        }
        if profile.is_blank(&existing[i]) && !profile.is_blank(&candidate[i]) {
            existing[i] = candidate[i].clone();
        }
    }
}

fn take_candidate(existing: &mut [Value], candidate: &[Value], profile: &TableProfile) {
    for i in 0..existing.len() {
        if profile.protected.contains(&i) {
            continue;
        }
        if !profile.is_blank(&candidate[i]) {
            existing[i] = candidate[i].clone();
        }
    }
}

/// Line diff of `older` → `newer`: unchanged lines are prefixed with two
/// spaces, removed lines with `- `, added lines with `+ `.
pub fn line_diff(older: &str, newer: &str) -> String {
    let diff = TextDiff::from_lines(older, newer);
    diff.iter_all_changes()
        .map(|change| {
            let prefix = match change.tag() {
                ChangeTag::Equal => "  ",
                ChangeTag::Delete => "- ",
                ChangeTag::Insert => "+ ",
            };
            let line = change.value().trim_end_matches(|c| c == '\n' || c == '\r');
            format!("{prefix}{line}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::merged::MergedRelation;
use crate::model::{Contribution, MergeMeta, MergeResult, MergedTable, Row, Source};
use crate::remap::KeyRemapper;
use crate::report::{ConflictRecord, MergeReport, SkipReason, SkipRecord, TableStats};
use crate::resolve::{merge_conflict, resolve, ConflictOutcome, Resolution, TableProfile};
use crate::schema::Table;
use crate::validate::check_constraints;
use crate::value::Value;

/// Merge every source into one result.
///
/// Sources are folded in input order; the first source's rows keep the lowest
/// merged keys. Fails only on fatal errors: a schema mismatch, invalid rules,
/// or a constraint violation in the merged output. Row-level problems are
/// listed in the result's report.
pub fn run(config: &MergeConfig, sources: &[Source]) -> Result<MergeResult, MergeError> {
    let first = sources.first().ok_or(MergeError::NoSources)?;
    for other in &sources[1..] {
        first.schema.check_compatible(&other.schema, &first.label, &other.label)?;
    }
    let schema = &first.schema;
    schema.validate()?;
    for warning in config.validate(schema)? {
        warn!("{warning}");
    }
    let order = schema.dependency_order()?;

    info!(
        sources = sources.len(),
        tables = order.len(),
        rules = %config.name,
        "merging"
    );

    let mut report = MergeReport::new(MergeMeta {
        config_name: config.name.clone(),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        run_at: chrono::Utc::now().to_rfc3339(),
        sources: sources.iter().map(|s| s.label.clone()).collect(),
    });
    let mut remapper = KeyRemapper::new();
    let mut tables = Vec::with_capacity(order.len());

    for table in order {
        let profile = TableProfile::compile(schema, table, config.rule(&table.name))?;
        let merged = fold_table(table, &profile, sources, &mut remapper, &mut report)?;
        tables.push(merged);
    }

    check_constraints(schema, &tables)?;
    report.finish();
    info!("{}", report.summary_line());

    Ok(MergeResult {
        schema: schema.clone(),
        tables,
        key_maps: remapper.into_maps(),
        report,
    })
}

/// Merge one table across all sources and seal its key map.
pub fn fold_table(
    table: &Table,
    profile: &TableProfile,
    sources: &[Source],
    remapper: &mut KeyRemapper,
    report: &mut MergeReport,
) -> Result<MergedTable, MergeError> {
    remapper.begin(table)?;
    let mut merged = MergedRelation::new(profile);
    let mut stats = TableStats::new(&table.name);

    for source in sources {
        let Some(relation) = source.relation(&table.name) else { continue };
        for row in &relation.rows {
            stats.input_rows += 1;
            let contribution = contribution_of(row, profile);

            let mut values = match remapper.rewrite(table, row) {
                Ok(values) => values,
                Err(dangling) => {
                    debug!(
                        table = %table.name,
                        source = %source.label,
                        key = %row.original_key,
                        column = %dangling.column,
                        cascade = dangling.cascade,
                        "dangling reference, row skipped"
                    );
                    stats.dangling += 1;
                    report.skips.push(SkipRecord {
                        table: table.name.clone(),
                        origin: row.origin,
                        original_key: row.original_key.clone(),
                        reason: SkipReason::DanglingReference {
                            column: dangling.column,
                            target_table: dangling.target_table,
                            value: dangling.value,
                            cascade: dangling.cascade,
                        },
                    });
                    merged.skip(contribution);
                    continue;
                }
            };

            let matched = merged.find_match(row.origin, &values);
            let resolution = match matched {
                Some(i) => resolve(&merged.row(i).values, &values, profile),
                None => Resolution::Distinct,
            };

            let step = match (resolution, matched) {
                (Resolution::Identical, Some(i)) => Fold::Absorb(i),
                (Resolution::Conflicting, Some(i)) => {
                    let mut updated = merged.row(i).values.clone();
                    match merge_conflict(&mut updated, &values, profile) {
                        ConflictOutcome::Merged { columns } => match merged.collision(&updated, Some(i)) {
                            Some((j, key)) => Fold::Skip(j, key),
                            None => Fold::Merge(i, updated, columns),
                        },
                        ConflictOutcome::Unresolvable { columns } => Fold::Skip(i, columns),
                    }
                }
                // A UNIQUE value already taken by a row this source contributed
                // to: appending would duplicate it.
                _ => match merged.collision(&values, None) {
                    Some((j, key)) => Fold::Skip(j, key),
                    None => Fold::Append,
                },
            };

            match step {
                Fold::Absorb(i) => {
                    stats.identical += 1;
                    merged.absorb(i, &values, contribution);
                }
                Fold::Merge(i, updated, columns) => {
                    stats.conflicts_merged += 1;
                    report.conflicts.push(ConflictRecord {
                        table: table.name.clone(),
                        origin: row.origin,
                        original_key: row.original_key.clone(),
                        merged_row: i + 1,
                        policy: profile.policy.to_string(),
                        columns: column_names(profile, &columns),
                    });
                    merged.replace(i, updated);
                    merged.add_contribution(i, contribution);
                }
                Fold::Skip(i, columns) => {
                    debug!(
                        table = %table.name,
                        source = %source.label,
                        key = %row.original_key,
                        "unresolvable conflict, row skipped"
                    );
                    stats.conflicts_skipped += 1;
                    report.skips.push(SkipRecord {
                        table: table.name.clone(),
                        origin: row.origin,
                        original_key: row.original_key.clone(),
                        reason: SkipReason::UnresolvableConflict {
                            merged_row: i + 1,
                            columns: column_names(profile, &columns),
                        },
                    });
                    merged.skip(contribution);
                }
                Fold::Append => {
                    if let Some(s) = profile.surrogate {
                        values[s] = remapper.assign(table, merged.len());
                    }
                    let (_, renumbered) = merged.append(values, contribution);
                    if renumbered {
                        stats.renumbered += 1;
                    }
                }
            }
        }
    }

    let (merged_table, key_map) = merged.seal(table);
    stats.output_rows = merged_table.len();
    debug!(
        table = %table.name,
        rows_in = stats.input_rows,
        rows_out = stats.output_rows,
        identical = stats.identical,
        conflicts = stats.conflicts_merged,
        skipped = stats.conflicts_skipped + stats.dangling,
        "table merged"
    );
    report.tables.push(stats);
    remapper.seal(key_map);
    Ok(merged_table)
}

/// What happens to one candidate row.
enum Fold {
    Absorb(usize),
    Merge(usize, Vec<Value>, Vec<usize>),
    /// Skipped as unresolvable against a merged row, on these columns.
    Skip(usize, Vec<usize>),
    Append,
}

fn contribution_of(row: &Row, profile: &TableProfile) -> Contribution {
    Contribution {
        origin: row.origin,
        original_key: row.original_key.clone(),
        referenced: profile.mapped.iter().map(|&i| row.values[i].clone()).collect(),
    }
}

fn column_names(profile: &TableProfile, columns: &[usize]) -> Vec<String> {
    columns.iter().map(|&i| profile.column_name(i).to_string()).collect()
}

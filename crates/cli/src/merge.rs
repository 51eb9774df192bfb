//! `jwlmerge merge`: open archives, merge their databases, write one archive.

use std::path::{Path, PathBuf};

use chrono::Local;
use clap::Args;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use jwlmerge_config::Settings;
use jwlmerge_engine::media::media_references;
use jwlmerge_engine::{MergeConfig, MergeReport, SourceId};
use jwlmerge_io::archive::{check_schema_versions, write_archive};
use jwlmerge_io::manifest::merged_archive_name;
use jwlmerge_io::media::{base_files, plan_media, MediaPlan};
use jwlmerge_io::{debug, sqlite, Archive};

use crate::CliError;

#[derive(Args)]
pub struct MergeArgs {
    /// Backup archives to merge (.jwlibrary), in priority order
    #[arg(required = true, num_args = 2..)]
    pub inputs: Vec<PathBuf>,

    /// Output directory [default: from settings, else ./merged]
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Merge rules (TOML) replacing the built-in JW Library rules
    #[arg(long, value_name = "FILE")]
    pub rules: Option<PathBuf>,

    /// Write the merge report as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Print the merge report as JSON to stdout
    #[arg(long)]
    pub json: bool,

    /// Write schema.txt and merged.xlsx here for inspection
    #[arg(long, value_name = "DIR")]
    pub debug_dir: Option<PathBuf>,
}

/// What `--json` and `--report` emit.
#[derive(Serialize)]
struct MergeOutput<'a> {
    archive: String,
    media: MediaSummary<'a>,
    report: &'a MergeReport,
}

#[derive(Serialize)]
struct MediaSummary<'a> {
    files: usize,
    deduplicated: usize,
    missing: &'a [String],
    diverging: &'a [String],
}

/// Rules from `--rules`, else the settings file's `rules`, else built-in.
pub fn load_rules(explicit: Option<&Path>, settings: &Settings) -> Result<MergeConfig, CliError> {
    let Some(path) = explicit.or(settings.rules.as_deref()) else {
        return Ok(MergeConfig::jw_library()?);
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::rules(format!("cannot read rules {}: {e}", path.display())))?;
    MergeConfig::from_toml(&text).map_err(|e| {
        CliError::from(e).with_hint(format!("rules file: {}", path.display()))
    })
}

pub fn cmd_merge(args: MergeArgs, quiet: bool) -> Result<(), CliError> {
    let settings = Settings::load().map_err(|e| {
        CliError::rules(format!("invalid settings: {e}"))
            .with_hint(format!("fix or remove {}", Settings::config_path_display()))
    })?;
    let config = load_rules(args.rules.as_deref(), &settings)?;

    // Load
    let archives = args
        .inputs
        .iter()
        .map(|path| Archive::open(path))
        .collect::<Result<Vec<_>, _>>()?;
    check_schema_versions(&archives)?;
    let sources = archives
        .iter()
        .enumerate()
        .map(|(i, archive)| archive.load_source(SourceId(i)))
        .collect::<Result<Vec<_>, _>>()?;

    // Merge
    let result = jwlmerge_engine::run(&config, &sources)?;

    // Database and media, staged outside the output directory
    let first = &archives[0];
    let staging = TempDir::new().map_err(|e| CliError::io(format!("cannot create staging dir: {e}")))?;
    let db_path = staging.path().join(&first.manifest.user_data_backup.database_name);
    sqlite::write_database(&result, &db_path)?;
    let database = std::fs::read(&db_path)
        .map_err(|e| CliError::io(format!("cannot read {}: {e}", db_path.display())))?;

    let refs = media_references(&result, &config.media);
    let plan = plan_media(&archives, &refs, base_files(first)?)?;

    let now = Local::now();
    let out_dir = args.output.unwrap_or(settings.output_dir);
    let out_path = out_dir.join(merged_archive_name(now));

    // Debug artifacts and report, before anything lands in the output directory
    if let Some(dir) = &args.debug_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| CliError::io(format!("cannot create {}: {e}", dir.display())))?;
        debug::write_schema_dump(&result.schema, &dir.join("schema.txt"))?;
        debug::write_workbook(&result, &dir.join("merged.xlsx"))?;
    }

    let output = MergeOutput {
        archive: out_path.display().to_string(),
        media: media_summary(&plan),
        report: &result.report,
    };
    let json_str = if args.report.is_some() || args.json {
        Some(
            serde_json::to_string_pretty(&output)
                .map_err(|e| CliError::other(format!("JSON serialization error: {e}")))?,
        )
    } else {
        None
    };
    if let (Some(path), Some(json_str)) = (&args.report, &json_str) {
        std::fs::write(path, json_str).map_err(|e| CliError::io(format!("cannot write report: {e}")))?;
        if !quiet {
            eprintln!("wrote {}", path.display());
        }
    }

    // Archive
    let manifest = first.manifest.merged(&database, &settings.device_name, now);
    std::fs::create_dir_all(&out_dir)
        .map_err(|e| CliError::io(format!("cannot create {}: {e}", out_dir.display())))?;
    write_archive(&out_path, &manifest, &database, &plan.entries())?;
    info!(path = %out_path.display(), media = plan.files.len(), "merged archive written");

    if let Some(json_str) = json_str.filter(|_| args.json) {
        println!("{json_str}");
    }

    // Human summary to stderr
    if !quiet {
        print_summary(&result.report, &plan, &out_path);
    }
    for name in &plan.missing {
        warn!(file = %name, "merged archive references a missing media file");
    }
    Ok(())
}

fn media_summary(plan: &MediaPlan) -> MediaSummary<'_> {
    MediaSummary {
        files: plan.files.len(),
        deduplicated: plan.deduplicated,
        missing: &plan.missing,
        diverging: &plan.diverging,
    }
}

fn print_summary(report: &MergeReport, plan: &MediaPlan, out_path: &Path) {
    eprintln!("{}", report.summary_line());
    for stats in report.tables.iter().filter(|t| t.input_rows > 0) {
        eprintln!(
            "  {:<28} {:>6} -> {:<6} identical {:<5} merged {:<4} skipped {}",
            stats.table,
            stats.input_rows,
            stats.output_rows,
            stats.identical,
            stats.conflicts_merged,
            stats.conflicts_skipped + stats.dangling,
        );
    }
    for skip in report.skips.iter().take(20) {
        eprintln!(
            "  skipped {} {} from {}: {}",
            skip.table,
            skip.original_key,
            report.source_label(skip.origin),
            skip.reason,
        );
    }
    if report.skips.len() > 20 {
        eprintln!("  ... {} more skipped rows (see --report)", report.skips.len() - 20);
    }
    eprintln!(
        "media: {} files ({} duplicates dropped, {} missing)",
        plan.files.len(),
        plan.deduplicated,
        plan.missing.len(),
    );
    eprintln!("wrote {}", out_path.display());
}

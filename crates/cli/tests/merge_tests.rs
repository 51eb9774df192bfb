// End-to-end tests for `jwlmerge merge`, `inspect` and `rules`.
// Fixture archives are built on the fly with rusqlite + zip.
// Run with: cargo test -p jwlmerge-cli --test merge_tests -- --nocapture

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rusqlite::Connection;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const SCHEMA: &str = r#"
    CREATE TABLE Location (
        LocationId INTEGER NOT NULL PRIMARY KEY,
        BookNumber INTEGER,
        ChapterNumber INTEGER,
        DocumentId INTEGER,
        Track INTEGER,
        IssueTagNumber INTEGER NOT NULL DEFAULT 0,
        KeySymbol TEXT,
        MepsLanguage INTEGER,
        Type INTEGER NOT NULL,
        Title TEXT
    );
    CREATE TABLE Note (
        NoteId INTEGER NOT NULL PRIMARY KEY,
        Guid TEXT NOT NULL UNIQUE,
        UserMarkId INTEGER,
        LocationId INTEGER REFERENCES Location (LocationId),
        Title TEXT,
        Content TEXT,
        LastModified TEXT NOT NULL,
        Created TEXT NOT NULL,
        BlockType INTEGER NOT NULL DEFAULT 0,
        BlockIdentifier INTEGER
    );
    CREATE TABLE Tag (
        TagId INTEGER NOT NULL PRIMARY KEY,
        Type INTEGER NOT NULL,
        Name TEXT NOT NULL,
        UNIQUE (Type, Name)
    );
    CREATE TABLE TagMap (
        TagMapId INTEGER NOT NULL PRIMARY KEY,
        NoteId INTEGER REFERENCES Note (NoteId),
        TagId INTEGER NOT NULL REFERENCES Tag (TagId),
        Position INTEGER NOT NULL,
        UNIQUE (TagId, Position)
    );
    CREATE TABLE IndependentMedia (
        IndependentMediaId INTEGER NOT NULL PRIMARY KEY,
        OriginalFilename TEXT NOT NULL,
        FilePath TEXT NOT NULL UNIQUE,
        MimeType TEXT NOT NULL,
        Hash TEXT NOT NULL
    );
    CREATE TABLE LastModified (LastModified TEXT NOT NULL);
    CREATE INDEX IX_Note_LocationId ON Note (LocationId);
    PRAGMA user_version = 14;
"#;

const PHONE: &str = r#"
    INSERT INTO Location VALUES (1, 40, 5, NULL, NULL, 0, 'nwtsty', 0, 0, 'Matthew 5');
    INSERT INTO Note VALUES (1, 'note-1', NULL, 1, 'Sermon', 'Blessed are the meek',
        '2024-01-01T08:00:00+00:00', '2024-01-01T08:00:00+00:00', 0, NULL);
    INSERT INTO Tag VALUES (1, 1, 'Favorites');
    INSERT INTO TagMap VALUES (1, 1, 1, 0);
    INSERT INTO IndependentMedia VALUES (1, 'photo.jpg', 'a1b2.jpg', 'image/jpeg', 'abc');
    INSERT INTO LastModified VALUES ('2024-01-01T08:00:00+00:00');
"#;

const TABLET: &str = r#"
    INSERT INTO Location VALUES (7, 40, 5, NULL, NULL, 0, 'nwtsty', 0, 0, 'Matthew 5');
    INSERT INTO Note VALUES (1, 'note-1', NULL, 7, 'Sermon', 'Blessed are the meek',
        '2024-01-03T08:00:00+00:00', '2024-01-01T08:00:00+00:00', 0, NULL);
    INSERT INTO Note VALUES (2, 'note-2', NULL, 7, 'Salt', 'You are the salt of the earth',
        '2024-02-01T08:00:00+00:00', '2024-02-01T08:00:00+00:00', 0, NULL);
    INSERT INTO Tag VALUES (3, 1, 'Favorites');
    INSERT INTO Tag VALUES (4, 1, 'Study');
    INSERT INTO TagMap VALUES (1, 2, 3, 0);
    INSERT INTO LastModified VALUES ('2024-02-01T08:00:00+00:00');
"#;

fn jwlmerge(config_home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_jwlmerge"));
    cmd.env("XDG_CONFIG_HOME", config_home)
        .env("HOME", config_home)
        .env_remove("RUST_LOG");
    cmd
}

fn manifest_json(schema_version: i64) -> String {
    format!(
        r#"{{"name":"UserdataBackup","creationDate":"2024-01-01T08:00:00+0000","version":1,"type":0,
            "userDataBackup":{{"lastModifiedDate":"2024-01-01T08:00:00+0000","deviceName":"Phone",
            "databaseName":"userData.db","hash":"","schemaVersion":{schema_version}}}}}"#
    )
}

/// Build a `.jwlibrary` archive with the fixture schema, `inserts` and
/// extra `files`.
fn build_archive(dir: &Path, name: &str, schema_version: i64, inserts: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let db_path = dir.join(format!("{name}.db"));
    let conn = Connection::open(&db_path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute_batch(inserts).unwrap();
    drop(conn);
    let database = std::fs::read(&db_path).unwrap();

    let path = dir.join(format!("{name}.jwlibrary"));
    let mut zip = ZipWriter::new(File::create(&path).unwrap());
    let options = SimpleFileOptions::default();
    zip.start_file("manifest.json", options).unwrap();
    zip.write_all(manifest_json(schema_version).as_bytes()).unwrap();
    zip.start_file("userData.db", options).unwrap();
    zip.write_all(&database).unwrap();
    for (file, bytes) in files {
        zip.start_file(*file, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
    path
}

struct Fixture {
    dir: TempDir,
    phone: PathBuf,
    tablet: PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let phone = build_archive(
        dir.path(),
        "phone",
        14,
        PHONE,
        &[("default_thumbnail.png", b"png"), ("a1b2.jpg", b"jpeg bytes")],
    );
    let tablet = build_archive(dir.path(), "tablet", 14, TABLET, &[("default_thumbnail.png", b"png")]);
    Fixture { dir, phone, tablet }
}

fn run(cmd: &mut Command) -> Output {
    let output = cmd.output().expect("run jwlmerge");
    eprintln!("stderr:\n{}", String::from_utf8_lossy(&output.stderr));
    output
}

/// The single merged archive written to `out_dir`.
fn merged_archive(out_dir: &Path) -> PathBuf {
    let archives: Vec<PathBuf> = std::fs::read_dir(out_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "jwlibrary"))
        .collect();
    assert_eq!(archives.len(), 1, "expected one merged archive in {}", out_dir.display());
    archives.into_iter().next().unwrap()
}

/// Extract the merged database and return an open connection to it.
fn open_merged_db(archive: &Path, scratch: &Path) -> Connection {
    let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut bytes = Vec::new();
    zip.by_name("userData.db").unwrap().read_to_end(&mut bytes).unwrap();
    let path = scratch.join("merged.db");
    std::fs::write(&path, bytes).unwrap();
    Connection::open(path).unwrap()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0)).unwrap()
}

// ===========================================================================
// merge
// ===========================================================================

#[test]
fn merge_two_archives() {
    let fx = fixture();
    let out = fx.dir.path().join("out");
    let output = run(jwlmerge(fx.dir.path()).args([
        "merge",
        fx.phone.to_str().unwrap(),
        fx.tablet.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
    ]));
    assert!(output.status.success(), "exit code: {:?}", output.status);

    let archive = merged_archive(&out);
    let name = archive.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("UserdataBackup_") && name.ends_with("_Merged.jwlibrary"), "{name}");

    let conn = open_merged_db(&archive, fx.dir.path());
    assert_eq!(count(&conn, "Location"), 1);
    assert_eq!(count(&conn, "Note"), 2);
    assert_eq!(count(&conn, "Tag"), 2);
    assert_eq!(count(&conn, "TagMap"), 2);
    assert_eq!(count(&conn, "LastModified"), 1);

    let newest: String = conn.query_row("SELECT LastModified FROM LastModified", [], |r| r.get(0)).unwrap();
    assert_eq!(newest, "2024-02-01T08:00:00+00:00");

    // Both notes point at the single merged location
    let orphans: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM Note WHERE LocationId NOT IN (SELECT LocationId FROM Location)",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);

    // Positions collided on the shared Favorites tag and were renumbered
    let mut stmt = conn.prepare("SELECT Position FROM TagMap ORDER BY Position").unwrap();
    let positions: Vec<i64> = stmt.query_map([], |r| r.get(0)).unwrap().map(Result::unwrap).collect();
    assert_eq!(positions, vec![0, 1]);

    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
    assert_eq!(user_version, 14);
}

#[test]
fn merged_archive_carries_manifest_and_media() {
    let fx = fixture();
    let out = fx.dir.path().join("out");
    let output = run(jwlmerge(fx.dir.path()).args([
        "merge",
        fx.tablet.to_str().unwrap(),
        fx.phone.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
    ]));
    assert!(output.status.success());

    let archive = merged_archive(&out);
    let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
    let names: Vec<String> = zip.file_names().map(str::to_string).collect();
    assert!(names.contains(&"manifest.json".to_string()));
    assert!(names.contains(&"userData.db".to_string()));
    assert!(names.contains(&"default_thumbnail.png".to_string()));
    // Only the phone holds the photo; it is fetched from there
    assert!(names.contains(&"a1b2.jpg".to_string()));

    let mut manifest = String::new();
    zip.by_name("manifest.json").unwrap().read_to_string(&mut manifest).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(manifest["userDataBackup"]["deviceName"], "jwlmerge");
    assert_eq!(manifest["userDataBackup"]["schemaVersion"], 14);
    assert_eq!(manifest["userDataBackup"]["hash"].as_str().unwrap().len(), 64);
}

#[test]
fn self_merge_adds_nothing() {
    let fx = fixture();
    let out = fx.dir.path().join("out");
    let output = run(jwlmerge(fx.dir.path()).args([
        "merge",
        fx.tablet.to_str().unwrap(),
        fx.tablet.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
    ]));
    assert!(output.status.success());

    let conn = open_merged_db(&merged_archive(&out), fx.dir.path());
    assert_eq!(count(&conn, "Location"), 1);
    assert_eq!(count(&conn, "Note"), 2);
    assert_eq!(count(&conn, "Tag"), 2);
    assert_eq!(count(&conn, "TagMap"), 1);
}

#[test]
fn json_report_on_stdout_and_file() {
    let fx = fixture();
    let out = fx.dir.path().join("out");
    let report = fx.dir.path().join("report.json");
    let output = run(jwlmerge(fx.dir.path()).args([
        "merge",
        fx.phone.to_str().unwrap(),
        fx.tablet.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
        "--json",
    ]));
    assert!(output.status.success());

    let stdout: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout is one JSON value");
    let file: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(stdout, file);

    let totals = &stdout["report"]["totals"];
    assert_eq!(totals["conflicts_skipped"], 0);
    assert_eq!(totals["dangling"], 0);
    assert_eq!(totals["renumbered"], 1);
    assert_eq!(stdout["report"]["meta"]["sources"].as_array().unwrap().len(), 2);
    assert_eq!(stdout["media"]["missing"].as_array().unwrap().len(), 0);
    assert!(stdout["archive"].as_str().unwrap().ends_with("_Merged.jwlibrary"));
}

#[test]
fn debug_dir_gets_schema_and_workbook() {
    let fx = fixture();
    let out = fx.dir.path().join("out");
    let debug = fx.dir.path().join("debug");
    let output = run(jwlmerge(fx.dir.path()).args([
        "merge",
        fx.phone.to_str().unwrap(),
        fx.tablet.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "--debug-dir",
        debug.to_str().unwrap(),
        "-q",
    ]));
    assert!(output.status.success());

    let schema = std::fs::read_to_string(debug.join("schema.txt")).unwrap();
    assert!(schema.contains("TagMap"));
    assert!(schema.contains("fk TagId -> Tag.TagId"));
    assert!(std::fs::metadata(debug.join("merged.xlsx")).unwrap().len() > 0);
}

#[test]
fn settings_file_sets_output_dir_and_device() {
    let fx = fixture();
    let settings_dir = fx.dir.path().join("jwlmerge");
    std::fs::create_dir_all(&settings_dir).unwrap();
    let out = fx.dir.path().join("from-settings");
    std::fs::write(
        settings_dir.join("settings.toml"),
        format!("output_dir = {:?}\ndevice_name = \"Laptop\"\n", out.to_str().unwrap()),
    )
    .unwrap();

    let output = run(jwlmerge(fx.dir.path()).args(["merge", fx.phone.to_str().unwrap(), fx.tablet.to_str().unwrap()]));
    assert!(output.status.success());

    let archive = merged_archive(&out);
    let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
    let mut manifest = String::new();
    zip.by_name("manifest.json").unwrap().read_to_string(&mut manifest).unwrap();
    assert!(manifest.contains("\"deviceName\":\"Laptop\""));
}

// ===========================================================================
// Exit codes
// ===========================================================================

#[test]
fn single_input_is_a_usage_error() {
    let fx = fixture();
    let output = run(jwlmerge(fx.dir.path()).args(["merge", fx.phone.to_str().unwrap()]));
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn schema_version_mismatch_exits_3_and_writes_nothing() {
    let fx = fixture();
    let old = build_archive(fx.dir.path(), "old", 13, PHONE, &[]);
    let out = fx.dir.path().join("out");
    let output = run(jwlmerge(fx.dir.path()).args([
        "merge",
        fx.phone.to_str().unwrap(),
        old.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
    ]));
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: schema mismatch"), "{stderr}");
    assert!(stderr.contains("hint:"));
    assert!(!out.exists());
}

#[test]
fn missing_archive_exits_5() {
    let fx = fixture();
    let output = run(jwlmerge(fx.dir.path()).args([
        "merge",
        fx.phone.to_str().unwrap(),
        fx.dir.path().join("nope.jwlibrary").to_str().unwrap(),
    ]));
    assert_eq!(output.status.code(), Some(5));
}

#[test]
fn unwritable_debug_dir_exits_5_and_writes_no_archive() {
    let fx = fixture();
    let out = fx.dir.path().join("out");
    let blocker = fx.dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();
    let output = run(jwlmerge(fx.dir.path()).args([
        "merge",
        fx.phone.to_str().unwrap(),
        fx.tablet.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "--debug-dir",
        blocker.join("debug").to_str().unwrap(),
    ]));
    assert_eq!(output.status.code(), Some(5));
    assert!(!out.exists());
}

#[test]
fn rules_with_unknown_column_exit_6() {
    let fx = fixture();
    let rules = fx.dir.path().join("bad.toml");
    std::fs::write(&rules, "[tables.Note]\nidentity = [[\"NoSuchColumn\"]]\n").unwrap();
    let output = run(jwlmerge(fx.dir.path()).args([
        "merge",
        fx.phone.to_str().unwrap(),
        fx.tablet.to_str().unwrap(),
        "--rules",
        rules.to_str().unwrap(),
    ]));
    assert_eq!(output.status.code(), Some(6));
    assert!(String::from_utf8_lossy(&output.stderr).contains("NoSuchColumn"));
}

#[test]
fn malformed_settings_exit_6() {
    let fx = fixture();
    let settings_dir = fx.dir.path().join("jwlmerge");
    std::fs::create_dir_all(&settings_dir).unwrap();
    std::fs::write(settings_dir.join("settings.toml"), "output_dir = [").unwrap();
    let output = run(jwlmerge(fx.dir.path()).args(["merge", fx.phone.to_str().unwrap(), fx.tablet.to_str().unwrap()]));
    assert_eq!(output.status.code(), Some(6));
}

// ===========================================================================
// inspect / rules
// ===========================================================================

#[test]
fn inspect_json_lists_tables_parents_first() {
    let fx = fixture();
    let output = run(jwlmerge(fx.dir.path()).args(["inspect", fx.tablet.to_str().unwrap(), "--json"]));
    assert!(output.status.success());

    let val: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(val["schema_version"], 14);
    assert_eq!(val["user_version"], 14);
    let tables = val["tables"].as_array().unwrap();
    let position = |name: &str| tables.iter().position(|t| t["name"] == name).unwrap();
    assert!(position("Location") < position("Note"));
    assert!(position("Note") < position("TagMap"));
    assert!(position("Tag") < position("TagMap"));
    assert_eq!(tables[position("Note")]["rows"], 2);
    assert_eq!(val["media_files"], serde_json::json!(["default_thumbnail.png"]));
}

#[test]
fn rules_prints_builtin_rules() {
    let fx = fixture();
    let output = run(jwlmerge(fx.dir.path()).arg("rules"));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[tables.Location]"));
    assert!(stdout.contains("[tables.TagMap]"));
}

#[test]
fn rules_check_against_archive() {
    let fx = fixture();
    let rules = fx.dir.path().join("rules.toml");
    std::fs::write(&rules, "[tables.Tag]\nidentity = [[\"Name\"]]\n\n[tables.Bookmark]\n").unwrap();
    let output = run(jwlmerge(fx.dir.path()).args([
        "rules",
        "--check",
        rules.to_str().unwrap(),
        "--against",
        fx.phone.to_str().unwrap(),
    ]));
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("warning: rules for table 'Bookmark' ignored"), "{stderr}");

    std::fs::write(&rules, "[tables.Tag\n").unwrap();
    let output = run(jwlmerge(fx.dir.path()).args(["rules", "--check", rules.to_str().unwrap()]));
    assert_eq!(output.status.code(), Some(6));
}

use std::fs;
use std::path::Path;

use rusqlite::Connection;
use tidemark_common::Error;
use tidemark_db::{Database, Dialect, Migration, Migrator, SqlValue};

/// Write the two-version users/email migration set used across these tests.
fn write_user_migrations(dir: &Path) {
    let files = [
        (
            "001_create_users_up.sql",
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
        ),
        ("001_create_users_down.sql", "DROP TABLE users;"),
        ("002_add_email_up.sql", "ALTER TABLE users ADD COLUMN email TEXT;"),
        ("002_add_email_down.sql", "ALTER TABLE users DROP COLUMN email;"),
    ];
    for (name, sql) in files {
        fs::write(dir.join(name), sql).unwrap();
    }
}

fn table_exists(db: &mut dyn Database, table: &str) -> bool {
    db.query_count(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        &[SqlValue::Text(table.to_string())],
    )
    .unwrap()
        > 0
}

fn column_exists(db: &mut dyn Database, table: &str, column: &str) -> bool {
    db.query_count(
        "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
        &[
            SqlValue::Text(table.to_string()),
            SqlValue::Text(column.to_string()),
        ],
    )
    .unwrap()
        > 0
}

fn applied_versions(migrator: &mut Migrator<'_>) -> Vec<u64> {
    migrator
        .applied_versions()
        .unwrap()
        .keys()
        .copied()
        .collect()
}

#[test]
fn users_and_email_scenario() {
    let dir = tempfile::tempdir().unwrap();
    write_user_migrations(dir.path());

    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();
    migrator.load_catalog(dir.path()).unwrap();
    migrator.apply_all().unwrap();

    assert!(table_exists(migrator.database(), "users"));
    assert!(column_exists(migrator.database(), "users", "email"));

    let applied = migrator.applied_versions().unwrap();
    assert_eq!(applied.len(), 2);
    let (t1, t2) = (applied[&1], applied[&2]);
    assert!(t1 < t2);

    migrator.rollback(1).unwrap();
    assert!(!column_exists(migrator.database(), "users", "email"));
    let applied = migrator.applied_versions().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[&1], t1);
}

#[test]
fn rollback_two_reverts_everything() {
    let dir = tempfile::tempdir().unwrap();
    write_user_migrations(dir.path());

    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();
    migrator.load_catalog(dir.path()).unwrap();
    migrator.apply_all().unwrap();

    assert_eq!(migrator.rollback(2).unwrap(), vec![2, 1]);
    assert!(applied_versions(&mut migrator).is_empty());
    assert!(!table_exists(migrator.database(), "users"));
}

#[test]
fn rollback_clamps_to_applied_count() {
    let dir = tempfile::tempdir().unwrap();
    write_user_migrations(dir.path());

    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();
    migrator.load_catalog(dir.path()).unwrap();
    migrator.apply_all().unwrap();

    assert_eq!(migrator.rollback(10).unwrap(), vec![2, 1]);
    assert!(applied_versions(&mut migrator).is_empty());
    assert!(matches!(
        migrator.rollback(1),
        Err(Error::NothingToRollback)
    ));
}

#[test]
fn apply_stops_at_first_failing_migration() {
    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();
    migrator
        .set_catalog(vec![
            Migration::new(1, "first", "CREATE TABLE first (id INTEGER);", "DROP TABLE first;"),
            Migration::new(
                2,
                "broken",
                "CREATE TABLE second (id INTEGER); THIS IS NOT SQL;",
                "DROP TABLE second;",
            ),
            Migration::new(3, "third", "CREATE TABLE third (id INTEGER);", "DROP TABLE third;"),
        ])
        .unwrap();

    match migrator.apply_all() {
        Err(Error::MigrationApply { version, .. }) => assert_eq!(version, 2),
        other => panic!("expected MigrationApply, got {other:?}"),
    }

    assert_eq!(applied_versions(&mut migrator), vec![1]);
    assert!(table_exists(migrator.database(), "first"));
    // The statement that ran before the syntax error was rolled back with it.
    assert!(!table_exists(migrator.database(), "second"));
    assert!(!table_exists(migrator.database(), "third"));
}

#[test]
fn fixing_a_failed_migration_and_rerunning_resumes() {
    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();

    let first = Migration::new(1, "first", "CREATE TABLE first (id INTEGER);", "DROP TABLE first;");
    migrator
        .set_catalog(vec![
            first.clone(),
            Migration::new(2, "second", "CREATE TABL second (id INTEGER);", ""),
        ])
        .unwrap();
    assert!(migrator.apply_all().is_err());

    migrator
        .set_catalog(vec![
            first,
            Migration::new(2, "second", "CREATE TABLE second (id INTEGER);", ""),
        ])
        .unwrap();
    assert_eq!(migrator.apply_all().unwrap(), vec![2]);
    assert_eq!(applied_versions(&mut migrator), vec![1, 2]);
}

#[test]
fn rollback_follows_applied_order_not_version_order() {
    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();

    let one = Migration::new(1, "one", "CREATE TABLE one (id INTEGER);", "DROP TABLE one;");
    let two = Migration::new(2, "two", "CREATE TABLE two (id INTEGER);", "DROP TABLE two;");

    // Version 2 lands first; version 1 arrives later (e.g. from a merged branch).
    migrator.set_catalog(vec![two.clone()]).unwrap();
    migrator.apply_all().unwrap();
    migrator.set_catalog(vec![one, two]).unwrap();
    assert_eq!(migrator.apply_all().unwrap(), vec![1]);

    assert_eq!(migrator.rollback(1).unwrap(), vec![1]);
    assert!(!table_exists(migrator.database(), "one"));
    assert!(table_exists(migrator.database(), "two"));
    assert_eq!(applied_versions(&mut migrator), vec![2]);
}

#[test]
fn failed_rollback_step_discards_the_whole_batch() {
    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();
    migrator
        .set_catalog(vec![
            Migration::new(1, "one", "CREATE TABLE one (id INTEGER);", "DROP TABLE one;"),
            Migration::new(2, "two", "CREATE TABLE two (id INTEGER);", "DROP TABLE nope;"),
            Migration::new(3, "three", "CREATE TABLE three (id INTEGER);", "DROP TABLE three;"),
        ])
        .unwrap();
    migrator.apply_all().unwrap();

    match migrator.rollback(3) {
        Err(Error::MigrationRollback { version, .. }) => assert_eq!(version, 2),
        other => panic!("expected MigrationRollback, got {other:?}"),
    }

    // Version 3 was reverted first inside the batch; that must be undone too.
    assert_eq!(applied_versions(&mut migrator), vec![1, 2, 3]);
    assert!(table_exists(migrator.database(), "three"));
    assert!(table_exists(migrator.database(), "two"));
}

#[test]
fn rollback_skips_versions_missing_from_catalog() {
    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();
    migrator
        .set_catalog(vec![
            Migration::new(1, "one", "CREATE TABLE one (id INTEGER);", "DROP TABLE one;"),
            Migration::new(2, "two", "CREATE TABLE two (id INTEGER);", "DROP TABLE two;"),
        ])
        .unwrap();
    migrator.apply_all().unwrap();

    // The file for version 2 has since been deleted.
    migrator
        .set_catalog(vec![Migration::new(
            1,
            "one",
            "CREATE TABLE one (id INTEGER);",
            "DROP TABLE one;",
        )])
        .unwrap();
    assert_eq!(migrator.rollback(1).unwrap(), vec![1]);
    assert_eq!(applied_versions(&mut migrator), vec![2]);

    assert!(matches!(
        migrator.rollback(1),
        Err(Error::NothingToRollback)
    ));
}

#[test]
fn state_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    fs::create_dir(&migrations).unwrap();
    write_user_migrations(&migrations);
    let db_path = dir.path().join("app.db");

    {
        let mut conn = Connection::open(&db_path).unwrap();
        let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
        migrator.ensure_schema().unwrap();
        migrator.load_catalog(&migrations).unwrap();
        assert_eq!(migrator.apply_all().unwrap(), vec![1, 2]);
    }

    let mut conn = Connection::open(&db_path).unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();
    migrator.load_catalog(&migrations).unwrap();
    assert!(migrator.apply_all().unwrap().is_empty());
    assert_eq!(applied_versions(&mut migrator), vec![1, 2]);

    let rows = migrator
        .database()
        .query_count("SELECT COUNT(*) FROM schema_migrations", &[])
        .unwrap();
    assert_eq!(rows, 2);
}

#[test]
fn empty_up_body_is_recorded_as_applied() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("001_placeholder_down.sql"),
        "DROP TABLE IF EXISTS scratch;",
    )
    .unwrap();

    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();
    migrator.load_catalog(dir.path()).unwrap();

    assert_eq!(migrator.catalog()[0].up_sql, "");
    assert_eq!(migrator.apply_all().unwrap(), vec![1]);
    assert_eq!(migrator.rollback(1).unwrap(), vec![1]);
}

#[test]
fn load_catalog_surfaces_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);

    let err = migrator
        .load_catalog(&dir.path().join("does-not-exist"))
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn timestamp_versioned_files_apply_and_roll_back() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("20240101120000_create_users_up.sql"),
        "CREATE TABLE users (id INTEGER PRIMARY KEY);",
    )
    .unwrap();
    fs::write(
        dir.path().join("20240101120000_create_users_down.sql"),
        "DROP TABLE users;",
    )
    .unwrap();

    let mut conn = Connection::open_in_memory().unwrap();
    let mut migrator = Migrator::new(&mut conn, Dialect::Sqlite);
    migrator.ensure_schema().unwrap();
    migrator.load_catalog(dir.path()).unwrap();

    assert_eq!(migrator.apply_all().unwrap(), vec![20240101120000]);
    assert!(table_exists(migrator.database(), "users"));
    assert_eq!(applied_versions(&mut migrator), vec![20240101120000]);

    assert_eq!(migrator.rollback(1).unwrap(), vec![20240101120000]);
    assert!(!table_exists(migrator.database(), "users"));
}

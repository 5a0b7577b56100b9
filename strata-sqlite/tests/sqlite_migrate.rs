//! End-to-end migration runs against SQLite files.

use std::path::Path;

use pretty_assertions::assert_eq;
use strata_migrate::{
    HistoryLedger, Location, MigrationConfig, MigrationError, MigrationState, RetryPolicy,
    SqlExecutor, VersionKey,
};
use strata_sqlite::{SqliteConfig, SqliteConnection, SqliteHistoryLedger, connect, migration_engine};

fn write(dir: &Path, name: &str, sql: &str) {
    std::fs::write(dir.join(name), sql).expect("Failed to write migration");
}

fn config(dir: &Path) -> MigrationConfig {
    MigrationConfig::new()
        .locations([Location::filesystem(dir)])
        .installed_by("tester")
        .lock_retry(RetryPolicy::new(
            3,
            std::time::Duration::from_millis(5),
            std::time::Duration::from_millis(20),
        ))
}

async fn open(path: &Path) -> SqliteConnection {
    connect(&SqliteConfig::file(path), &RetryPolicy::none())
        .await
        .expect("Failed to open database")
}

async fn tables(conn: &SqliteConnection) -> Vec<String> {
    conn.query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .await
        .expect("Failed to list tables")
        .iter()
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}

/// Test a fresh database is migrated and a second run is a no-op
#[tokio::test]
async fn test_migrate_fresh_database() {
    let scripts = tempfile::tempdir().expect("Failed to create temp dir");
    let db = tempfile::tempdir().expect("Failed to create temp dir");
    write(scripts.path(), "V1__Create_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);");
    write(
        scripts.path(),
        "V2__Seed_users.sql",
        "INSERT INTO users (name) VALUES ('ada');\nINSERT INTO users (name) VALUES ('grace');",
    );
    write(
        scripts.path(),
        "R__Users_view.sql",
        "DROP VIEW IF EXISTS user_names;\nCREATE VIEW user_names AS SELECT name FROM users;",
    );

    let conn = open(&db.path().join("app.db")).await;
    let engine = migration_engine(config(scripts.path()), conn.clone());

    let result = engine.migrate().await.expect("Failed to migrate");
    assert_eq!(result.applied_count, 3);
    assert_eq!(result.target_version, Some(VersionKey::parse("2").unwrap()));
    assert_eq!(
        tables(&conn).await,
        vec!["strata_schema_history".to_string(), "users".to_string()]
    );

    let names = conn.query("SELECT name FROM user_names ORDER BY name").await.unwrap();
    assert_eq!(names.len(), 2);

    let again = engine.migrate().await.expect("Failed to migrate again");
    assert_eq!(again.applied_count, 0);
    assert_eq!(again.summary(), "Schema is up to date. No migration necessary.");

    let report = engine.info().await.expect("Failed to get info");
    assert!(report.all().iter().all(|e| e.state == MigrationState::Success));
    assert_eq!(report.current().and_then(|e| e.version().cloned()), VersionKey::parse("2").ok());
}

/// Test repair realigns the recorded checksum with an edited script
#[tokio::test]
async fn test_repair_realigns_changed_script() {
    let scripts = tempfile::tempdir().expect("Failed to create temp dir");
    let db = tempfile::tempdir().expect("Failed to create temp dir");
    write(scripts.path(), "V1__Create_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");

    let conn = open(&db.path().join("app.db")).await;
    let engine = migration_engine(config(scripts.path()), conn.clone());
    engine.migrate().await.expect("Failed to migrate");

    write(scripts.path(), "V1__Create_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);");
    assert!(matches!(
        engine.validate().await,
        Err(MigrationError::MigrationMismatch { field: "checksum", .. })
    ));

    let report = engine.repair().await.expect("Failed to repair");
    assert_eq!(report.removed_failed, 0);
    assert_eq!(report.aligned, vec!["1".to_string()]);
    engine.validate().await.expect("Validation failed after repair");

    let ledger = SqliteHistoryLedger::new(conn, "strata_schema_history");
    let rows = ledger.applied_migrations().await.unwrap();
    assert_eq!(
        rows[0].checksum,
        Some(strata_migrate::compute_checksum(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);"
        ))
    );
}

/// Test a failing migration rolls back its DDL and records nothing
#[tokio::test]
async fn test_failed_migration_rolls_back() {
    let scripts = tempfile::tempdir().expect("Failed to create temp dir");
    let db = tempfile::tempdir().expect("Failed to create temp dir");
    write(scripts.path(), "V1__Create_users.sql", "CREATE TABLE users (id INTEGER);");
    write(
        scripts.path(),
        "V2__Broken.sql",
        "CREATE TABLE orders (id INTEGER);\nINSERT INTO missing_table VALUES (1);",
    );

    let conn = open(&db.path().join("app.db")).await;
    let engine = migration_engine(config(scripts.path()), conn.clone());

    let err = engine.migrate().await.expect_err("Migration should fail");
    match &err {
        MigrationError::MigrationFailed {
            version,
            rollback_performed,
            ..
        } => {
            assert_eq!(version, "2");
            assert!(*rollback_performed);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(!tables(&conn).await.contains(&"orders".to_string()));

    let ledger = SqliteHistoryLedger::new(conn.clone(), "strata_schema_history");
    let rows = ledger.applied_migrations().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].script, "V1__Create_users.sql");
    assert_eq!(conn.transaction_depth(), 0);

    // Fix the script and run again.
    write(scripts.path(), "V2__Broken.sql", "CREATE TABLE orders (id INTEGER);");
    let engine = migration_engine(config(scripts.path()), conn.clone());
    assert_eq!(engine.migrate().await.unwrap().applied_count, 1);
}

/// Test a second connection cannot take the lock while the first holds it
#[tokio::test]
async fn test_lock_excludes_other_connections() {
    let db = tempfile::tempdir().expect("Failed to create temp dir");
    let path = db.path().join("app.db");

    let first = open(&path).await;
    let second = connect(&SqliteConfig::file(&path).busy_timeout(0), &RetryPolicy::none())
        .await
        .expect("Failed to open second connection");

    let ledger_a = SqliteHistoryLedger::new(first, "strata_schema_history");
    let ledger_b = SqliteHistoryLedger::new(second, "strata_schema_history");
    ledger_a.initialize().await.unwrap();

    let held = ledger_a.try_lock().await.unwrap().expect("Failed to take lock");
    assert!(ledger_b.try_lock().await.unwrap().is_none());
    held.commit().await.unwrap();

    let taken = ledger_b.try_lock().await.unwrap();
    assert!(taken.is_some());
}

/// Test baseline then migrate skips versions at or below the baseline
#[tokio::test]
async fn test_baseline_existing_database() {
    let scripts = tempfile::tempdir().expect("Failed to create temp dir");
    let db = tempfile::tempdir().expect("Failed to create temp dir");
    write(scripts.path(), "V1__Create_users.sql", "CREATE TABLE users (id INTEGER);");
    write(scripts.path(), "V2__Create_orders.sql", "CREATE TABLE orders (id INTEGER);");

    let conn = open(&db.path().join("app.db")).await;
    conn.execute("CREATE TABLE users (id INTEGER)").await.unwrap();

    let engine = migration_engine(config(scripts.path()), conn.clone());
    let row = engine
        .baseline_with(VersionKey::parse("1").unwrap(), "existing schema")
        .await
        .expect("Failed to baseline");
    assert_eq!(row.installed_by, "tester");

    let result = engine.migrate().await.expect("Failed to migrate");
    assert_eq!(result.applied_count, 1);

    let states: Vec<_> = engine.info().await.unwrap().all().iter().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![MigrationState::Baseline, MigrationState::BelowBaseline, MigrationState::Success]
    );
}

/// Test connect fails with a connection error after exhausting retries
#[tokio::test]
async fn test_connect_reports_exhaustion() {
    let db = tempfile::tempdir().expect("Failed to create temp dir");
    let missing = db.path().join("no/such/dir/app.db");

    let err = connect(
        &SqliteConfig::file(&missing),
        &RetryPolicy::new(1, std::time::Duration::from_millis(1), std::time::Duration::from_millis(1)),
    )
    .await
    .expect_err("Connect should fail");

    match err {
        MigrationError::Connection { attempts, message } => {
            assert_eq!(attempts, 2);
            assert!(!message.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
}

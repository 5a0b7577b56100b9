//! Integration tests for the Strata CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Get the strata binary, isolated from the caller's environment
#[allow(deprecated)]
fn strata_cmd(cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("strata").unwrap();
    cmd.current_dir(cwd)
        .env_remove("STRATA_URL")
        .env_remove("STRATA_ENV")
        .env_remove("STRATA_CONFIG")
        .env_remove("STRATA_LOG");
    cmd
}

/// A project directory with a migrations folder and a SQLite database path
struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("db/migrations")).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn url(&self) -> String {
        format!("sqlite://{}", self.path().join("app.db").display())
    }

    fn script(&self, name: &str, sql: &str) -> &Self {
        fs::write(self.path().join("db/migrations").join(name), sql).unwrap();
        self
    }

    fn cmd(&self, args: &[&str]) -> Command {
        let mut cmd = strata_cmd(self.path());
        cmd.args(args)
            .args(["--url", &self.url(), "--location", "db/migrations"]);
        cmd
    }
}

#[test]
fn test_help_command() {
    let dir = TempDir::new().unwrap();
    strata_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Strata CLI"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("info"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("baseline"))
        .stdout(predicate::str::contains("repair"));
}

#[test]
fn test_version_command() {
    let dir = TempDir::new().unwrap();
    strata_cmd(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("Version"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_migrate_help() {
    let dir = TempDir::new().unwrap();
    strata_cmd(dir.path())
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--out-of-order"))
        .stdout(predicate::str::contains("--group"));
}

#[test]
fn test_migrate_then_info() {
    let project = Project::new();
    project
        .script("V1__Create_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);")
        .script("V2__Add_name.sql", "ALTER TABLE users ADD COLUMN name TEXT;");

    project
        .cmd(&["migrate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Successfully applied 2 migrations"));

    project
        .cmd(&["migrate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Schema is up to date"));

    project
        .cmd(&["info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Create users"))
        .stdout(predicate::str::contains("Success"));
}

#[test]
fn test_info_json() {
    let project = Project::new();
    project
        .script("V1__Create_users.sql", "CREATE TABLE users (id INTEGER);")
        .script("V2__Create_orders.sql", "CREATE TABLE orders (id INTEGER);");

    project.cmd(&["migrate", "--target", "1"]).assert().success();

    let output = project.cmd(&["info", "--json"]).output().unwrap();
    assert!(output.status.success());

    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let states: Vec<(&str, &str)> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| (r["version"].as_str().unwrap(), r["state"].as_str().unwrap()))
        .collect();
    assert_eq!(states, vec![("1", "Success"), ("2", "Pending")]);
}

#[test]
fn test_failed_migration_exits_with_error() {
    let project = Project::new();
    project
        .script("V1__Create_users.sql", "CREATE TABLE users (id INTEGER);")
        .script("V2__Broken.sql", "INSERT INTO nowhere VALUES (1);");

    project
        .cmd(&["migrate"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Migration error"))
        .stderr(predicate::str::contains("rolled back"));

    project
        .cmd(&["info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending"));
}

#[test]
fn test_validate_detects_changed_script() {
    let project = Project::new();
    project.script("V1__Create_users.sql", "CREATE TABLE users (id INTEGER);");
    project.cmd(&["migrate"]).assert().success();

    project
        .cmd(&["validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Successfully validated"));

    project.script("V1__Create_users.sql", "CREATE TABLE users (id BIGINT);");
    project
        .cmd(&["validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Validation error"))
        .stderr(predicate::str::contains("checksum"));
}

#[test]
fn test_repair_accepts_changed_script() {
    let project = Project::new();
    project.script("V1__Create_users.sql", "CREATE TABLE users (id INTEGER);");
    project.cmd(&["migrate"]).assert().success();

    project.script("V1__Create_users.sql", "CREATE TABLE users (id BIGINT);");
    project.cmd(&["validate"]).assert().failure();

    project
        .cmd(&["repair"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Aligned checksums of 1 migration(s)"));

    project
        .cmd(&["validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Successfully validated"));
}

#[test]
fn test_baseline_and_repair() {
    let project = Project::new();
    project
        .script("V1__Legacy.sql", "CREATE TABLE legacy (id INTEGER);")
        .script("V2__New.sql", "CREATE TABLE fresh (id INTEGER);");

    project
        .cmd(&["baseline", "--version", "1", "--description", "legacy schema"])
        .assert()
        .success()
        .stdout(predicate::str::contains("baselined at version 1"));

    project
        .cmd(&["migrate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Successfully applied 1 migration"));

    project
        .cmd(&["repair"])
        .assert()
        .success()
        .stdout(predicate::str::contains("needs no repair"));
}

#[test]
fn test_missing_database_url() {
    let dir = TempDir::new().unwrap();
    strata_cmd(dir.path())
        .arg("info")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no database url configured"));
}

#[test]
fn test_config_file_environment() {
    let project = Project::new();
    project.script("V1__Create_users.sql", "CREATE TABLE users (id INTEGER);");

    let config = format!(
        r#"
[database]
url = "sqlite://{}"

[migrations]
locations = ["filesystem:db/migrations"]
table = "main_history"

[environments.ci.migrations]
table = "ci_history"
"#,
        project.path().join("app.db").display()
    );
    fs::write(project.path().join("strata.toml"), config).unwrap();

    strata_cmd(project.path())
        .args(["migrate", "--env", "ci"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ci_history"));

    strata_cmd(project.path())
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("main_history"))
        .stdout(predicate::str::contains("Pending"));

    strata_cmd(project.path())
        .args(["info", "--env", "staging"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown environment 'staging'"));
}

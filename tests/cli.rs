// The forge binary only exists when the `cli` feature is on.
#![cfg(feature = "cli")]
#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const TICKET: &str = r#"entity: Ticket
schema: tenant
identifier: number
fields:
  number: text!
  subject: text!
actions:
  - name: create_ticket
    steps:
      - insert: Ticket
        values:
          number: input_data.number
          subject: input_data.subject
"#;

fn forge(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("forge").unwrap();
    // Config resolution walks the working directory and the env var, so
    // pin both to the sandbox.
    cmd.current_dir(dir.path()).env_remove("ACTIONFORGE_CONFIG");
    cmd
}

fn write_ticket(dir: &TempDir) {
    std::fs::write(dir.path().join("ticket.yaml"), TICKET).unwrap();
}

// ---------------------------------------------------------------------------
// forge generate
// ---------------------------------------------------------------------------

#[test]
fn generate_writes_schema_files() {
    let dir = TempDir::new().unwrap();
    write_ticket(&dir);

    forge(&dir)
        .args(["generate", "ticket.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ticket_actions.sql"));

    let sql =
        std::fs::read_to_string(dir.path().join("generated/tenant/ticket_actions.sql")).unwrap();
    assert!(sql.contains("CREATE OR REPLACE FUNCTION tenant.create_ticket_core("));
    assert!(sql.contains("CREATE OR REPLACE FUNCTION tenant.create_ticket("));
}

#[test]
fn generate_skips_foundation_by_default() {
    let dir = TempDir::new().unwrap();
    write_ticket(&dir);

    forge(&dir)
        .args(["generate", "ticket.yaml"])
        .assert()
        .success();

    assert!(!dir.path().join("generated/app").exists());
}

#[test]
fn generate_foundation_flag_adds_shared_artifacts() {
    let dir = TempDir::new().unwrap();
    write_ticket(&dir);

    forge(&dir)
        .args(["generate", "--foundation", "ticket.yaml"])
        .assert()
        .success();

    let sql = std::fs::read_to_string(dir.path().join("generated/app/foundation.sql")).unwrap();
    assert!(sql.contains("CREATE TYPE app.mutation_result AS ("));
    assert!(sql.contains("app.log_and_return_mutation"));
}

#[test]
fn generate_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    write_ticket(&dir);

    forge(&dir)
        .args(["generate", "--dry-run", "ticket.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("would write"));

    assert!(!dir.path().join("generated").exists());
}

#[test]
fn generate_out_flag_overrides_config() {
    let dir = TempDir::new().unwrap();
    write_ticket(&dir);

    forge(&dir)
        .args(["generate", "--out", "sql", "ticket.yaml"])
        .assert()
        .success();

    assert!(dir.path().join("sql/tenant/ticket_actions.sql").exists());
    assert!(!dir.path().join("generated").exists());
}

#[test]
fn generate_reads_project_config() {
    let dir = TempDir::new().unwrap();
    write_ticket(&dir);
    std::fs::write(dir.path().join("actionforge.yaml"), "output_dir: build/sql\n").unwrap();

    forge(&dir)
        .args(["generate", "ticket.yaml"])
        .assert()
        .success();

    assert!(dir.path().join("build/sql/tenant/ticket_actions.sql").exists());
}

#[test]
fn generate_requires_at_least_one_file() {
    let dir = TempDir::new().unwrap();

    forge(&dir).arg("generate").assert().failure();
}

// ---------------------------------------------------------------------------
// forge check
// ---------------------------------------------------------------------------

#[test]
fn check_reports_counts_without_writing() {
    let dir = TempDir::new().unwrap();
    write_ticket(&dir);

    forge(&dir)
        .args(["check", "ticket.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 entity / 1 action(s) compile"));

    assert!(!dir.path().join("generated").exists());
}

#[test]
fn check_rejects_unknown_step() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("broken.yaml"),
        "entity: Broken\nfields:\n  name: text!\nactions:\n  - name: do_thing\n    steps:\n      - frobnicate: now\n",
    )
    .unwrap();

    forge(&dir)
        .args(["check", "broken.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parse failed"));
}

#[test]
fn check_missing_file_fails() {
    let dir = TempDir::new().unwrap();

    forge(&dir)
        .args(["check", "absent.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

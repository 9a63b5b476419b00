mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use common::script;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/deal_script.jsonl")
        .env("RUST_LOG", "dealroom=info");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "deal,stage,agreed_price,pending,escrowed,released,refunded,milestones_done,milestones_total",
        ))
        .stdout(predicate::str::contains("deal-1,CLOSING,20000000,0,18000000,2000000,0,1,2"))
        // Blocked NDA-less deal never exists
        .stdout(predicate::str::contains("deal-2").not())
        .stderr(predicate::str::contains("Failed to apply command"))
        .stderr(predicate::str::contains("Failed to read command"));

    Ok(())
}

#[test]
fn test_blocked_transition_is_logged_and_skipped() {
    let file = script(&[
        r#"{"op":"request_nda","id":"nda-1","listing":"l-1","buyer":"b","seller":"s","at":"2024-01-01T00:00:00Z"}"#,
        r#"{"op":"approve_nda","id":"nda-1","actor":"s","at":"2024-01-01T01:00:00Z"}"#,
        r#"{"op":"open_deal","id":"d-1","listing":"l-1","buyer":"b","seller":"s","agreed_price":"900000","actor":"s","at":"2024-01-02T00:00:00Z"}"#,
        r#"{"op":"transition","deal":"d-1","to":"CLOSING","actor":"s","at":"2024-01-03T00:00:00Z"}"#,
        r#"{"op":"transition","deal":"d-1","to":"CANCELLED","actor":"b","at":"2024-01-04T00:00:00Z"}"#,
    ]);

    let mut cmd = Command::new(cargo_bin!("dealroom"));
    cmd.arg(file.path()).env("RUST_LOG", "dealroom=info");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Invalid deal transition: LOI_SIGNED -> CLOSING"))
        .stdout(predicate::str::contains("d-1,CANCELLED,900000,0,0,0,0,0,0"));
}

#[test]
fn test_empty_script_prints_header_only() {
    let file = script(&[]);

    let mut cmd = Command::new(cargo_bin!("dealroom"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(
            predicate::str::starts_with("deal,stage,agreed_price,")
                .and(predicate::str::contains("\n").count(1)),
        );
}

#[test]
fn test_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("dealroom"));
    cmd.arg("tests/fixtures/does_not_exist.jsonl");

    cmd.assert().failure();
}

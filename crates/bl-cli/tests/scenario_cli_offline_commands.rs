//! `bl` subcommands that need no database: config hashing, event-log
//! verification and TOTP helpers.

use std::fs;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZA";

#[test]
fn config_hash_is_stable_and_validates_settings() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("base.yaml");
    let env = dir.path().join("env.yaml");
    fs::write(&base, "retry:\n  max_attempts: 4\ndaemon:\n  addr: 127.0.0.1:9100\n")?;
    fs::write(&env, "retry:\n  max_attempts: 6\n")?;

    let run = || -> anyhow::Result<String> {
        let out = Command::cargo_bin("bl")?
            .args(["config-hash"])
            .arg(&base)
            .arg(&env)
            .output()?;
        assert!(out.status.success());
        Ok(String::from_utf8(out.stdout)?)
    };
    let first = run()?;
    assert!(first.contains("config_hash="));
    assert!(first.contains("store_backend=Memory"));
    assert!(first.contains("\"max_attempts\":6"));
    assert_eq!(first, run()?);

    fs::write(&env, "retry:\n  max_attempts: 0\n")?;
    Command::cargo_bin("bl")?
        .args(["config-hash"])
        .arg(&base)
        .arg(&env)
        .assert()
        .failure()
        .stderr(predicate::str::contains("retry.max_attempts"));
    Ok(())
}

#[test]
fn audit_verify_detects_tampering() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("events.jsonl");
    let mut log = bl_audit::EventLog::new(&path, true)?;
    log.append("rfq_created", serde_json::json!({ "rfq_id": "r1" }))?;
    log.append("bid_submitted", serde_json::json!({ "rfq_id": "r1", "amount": 100 }))?;

    Command::cargo_bin("bl")?
        .args(["audit", "verify"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("chain_valid=true lines=2"));

    let tampered = fs::read_to_string(&path)?.replace("\"amount\":100", "\"amount\":1");
    fs::write(&path, tampered)?;

    Command::cargo_bin("bl")?
        .args(["audit", "verify"])
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("chain_valid=false line=2"));
    Ok(())
}

#[test]
fn totp_code_matches_reference_vector() -> anyhow::Result<()> {
    Command::cargo_bin("bl")?
        .args(["totp", "code", "--secret", RFC_SECRET, "--at", "59", "--digits", "8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("code=46119246"))
        .stdout(predicate::str::contains("step=1"));

    Command::cargo_bin("bl")?
        .args(["totp", "code", "--secret", "not base32!", "--at", "59"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not valid base32"));
    Ok(())
}

#[test]
fn totp_secret_round_trips_through_code() -> anyhow::Result<()> {
    let out = Command::cargo_bin("bl")?.args(["totp", "secret"]).output()?;
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout)?;
    let secret = stdout
        .trim()
        .strip_prefix("secret=")
        .expect("secret= prefix")
        .to_string();
    assert!(bl_twofactor::totp::base32_decode(&secret).is_some());

    Command::cargo_bin("bl")?
        .args(["totp", "code", "--secret", &secret, "--at", "1700000000"])
        .assert()
        .success()
        .stdout(predicate::str::is_match("code=[0-9]{6}\n")?);
    Ok(())
}

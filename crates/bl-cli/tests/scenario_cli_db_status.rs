use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

/// `bl db migrate` then `bl db status` against a live database.
///
/// Skipped if BL_DATABASE_URL is not set.
#[test]
fn db_status_reports_records_table_after_migrate() -> anyhow::Result<()> {
    let url = match std::env::var(bl_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: BL_DATABASE_URL not set");
            return Ok(());
        }
    };

    Command::cargo_bin("bl")?
        .env(bl_db::ENV_DB_URL, &url)
        .args(["db", "migrate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("migrations_applied=true"));

    Command::cargo_bin("bl")?
        .env(bl_db::ENV_DB_URL, &url)
        .args(["db", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("db_ok=true has_records_table=true"));
    Ok(())
}

//! `bl` operator CLI: database, config, event-log and TOTP utilities.
//!
//! Output is `key=value` lines so scripts can grep it.

use anyhow::{Context, Result};
use bl_audit::VerifyResult;
use bl_twofactor::Totp;
use chrono::Utc;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bl")]
#[command(about = "Procurement backend operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash, validate settings, print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Event log utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },

    /// Second-factor helpers for operators and local testing
    Totp {
        #[command(subcommand)]
        cmd: TotpCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Connectivity, schema presence and per-collection record counts
    Status,

    /// Apply SQL migrations
    Migrate,
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of a JSONL event log. Exits non-zero when broken.
    Verify {
        /// Path to the .jsonl file
        path: String,
    },
}

#[derive(Subcommand)]
enum TotpCmd {
    /// Print a fresh base32 secret
    Secret,

    /// Print the code for a secret at a point in time
    Code {
        /// Base32 secret
        #[arg(long)]
        secret: String,

        /// Unix seconds (defaults to now)
        #[arg(long)]
        at: Option<i64>,

        #[arg(long, default_value_t = 30)]
        step_secs: u64,

        #[arg(long, default_value_t = 6)]
        digits: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = bl_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = bl_db::status(&pool).await?;
                    println!("db_ok={} has_records_table={}", s.ok, s.has_records_table);
                    if s.has_records_table {
                        for (collection, n) in bl_db::collection_counts(&pool).await? {
                            println!("records.{collection}={n}");
                        }
                    }
                }
                DbCmd::Migrate => {
                    bl_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = bl_config::load_layered_yaml(&path_refs)?;
            let settings = loaded.settings()?;
            println!("config_hash={}", loaded.config_hash);
            println!("store_backend={:?}", settings.store.backend);
            println!("{}", loaded.canonical_json);
        }

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => match bl_audit::verify_hash_chain(&path)? {
                VerifyResult::Valid { lines } => {
                    println!("chain_valid=true lines={lines}");
                }
                VerifyResult::Broken { line, reason } => {
                    println!("chain_valid=false line={line}");
                    anyhow::bail!("hash chain broken at line {line}: {reason}");
                }
            },
        },

        Commands::Totp { cmd } => match cmd {
            TotpCmd::Secret => {
                println!("secret={}", bl_twofactor::totp::generate_secret());
            }
            TotpCmd::Code {
                secret,
                at,
                step_secs,
                digits,
            } => {
                let totp = Totp::new(step_secs, digits, 0);
                let at = at.unwrap_or_else(|| Utc::now().timestamp());
                let code = totp
                    .code_at(&secret, at)
                    .context("secret is not valid base32")?;
                println!("code={code}");
                println!("step={}", totp.step_at(at));
            }
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}

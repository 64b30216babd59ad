use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Change-feed buffer per store; slower subscribers resync.
    pub change_buffer: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            change_buffer: 1024,
        }
    }
}

/// Bounded retry for optimistic multi-record commits (award, bid, advance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 10,
        }
    }
}

impl RetrySettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoFactorSettings {
    pub issuer: String,
    pub step_secs: u64,
    pub digits: u32,
    pub skew_steps: u32,
}

impl Default for TwoFactorSettings {
    fn default() -> Self {
        Self {
            issuer: "BuildLink".to_string(),
            step_secs: 30,
            digits: 6,
            skew_steps: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub addr: String,
    pub heartbeat_secs: u64,
    /// Idle time after which a session id starts over unverified.
    pub session_ttl_secs: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8899".to_string(),
            heartbeat_secs: 15,
            session_ttl_secs: 12 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Empty disables the JSONL event log.
    pub path: String,
    pub hash_chain: bool,
}

impl DaemonSettings {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            path: "exports/events.jsonl".to_string(),
            hash_chain: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcureSettings {
    pub store: StoreSettings,
    pub retry: RetrySettings,
    pub two_factor: TwoFactorSettings,
    pub daemon: DaemonSettings,
    pub audit: AuditSettings,
}

impl ProcureSettings {
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("CONFIG_INVALID retry.max_attempts must be >= 1");
        }
        if self.two_factor.step_secs == 0 {
            bail!("CONFIG_INVALID two_factor.step_secs must be >= 1");
        }
        if !(6..=8).contains(&self.two_factor.digits) {
            bail!(
                "CONFIG_INVALID two_factor.digits must be 6..=8 (got {})",
                self.two_factor.digits
            );
        }
        if self.two_factor.issuer.trim().is_empty() || self.two_factor.issuer.contains(':') {
            bail!("CONFIG_INVALID two_factor.issuer must be non-empty and contain no ':'");
        }
        if self.daemon.session_ttl_secs == 0 {
            bail!("CONFIG_INVALID daemon.session_ttl_secs must be >= 1");
        }
        if self.store.change_buffer == 0 {
            bail!("CONFIG_INVALID store.change_buffer must be >= 1");
        }
        Ok(())
    }
}
